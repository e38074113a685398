//! Active (PORT) / passive (PASV) data-channel negotiation and transport
//! tuning.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Data-channel negotiation state for one session.
#[derive(Debug, Default)]
pub enum DataMode {
    /// No PORT/PASV has been issued (or the previous transfer closed).
    #[default]
    None,
    /// `PORT` was accepted; the server will connect out to this endpoint.
    Active(SocketAddr),
    /// `PASV` opened a listener awaiting exactly one inbound connection.
    Passive(TcpListener),
}

impl DataMode {
    /// Human-readable tag, used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            DataMode::None => "none",
            DataMode::Active(_) => "active",
            DataMode::Passive(_) => "passive",
        }
    }
}

/// Parse the six-octet `h1,h2,h3,h4,p1,p2` form used by `PORT`.
pub fn parse_port_args(args: &str) -> Option<SocketAddr> {
    let parts: Vec<&str> = args.split(',').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut nums = [0u16; 6];
    for (i, p) in parts.iter().enumerate() {
        nums[i] = p.trim().parse::<u16>().ok()?;
        if nums[i] > 255 {
            return None;
        }
    }
    let ip = Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
    let port = (nums[4] << 8) | nums[5];
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Format a [`SocketAddr`] (must be IPv4) in `h1,h2,h3,h4,p1,p2` form.
pub fn format_port_args(addr: SocketAddr) -> Option<String> {
    match addr.ip() {
        IpAddr::V4(ip) => {
            let [a, b, c, d] = ip.octets();
            let port = addr.port();
            Some(format!("{a},{b},{c},{d},{},{}", port >> 8, port & 0xff))
        }
        IpAddr::V6(_) => None,
    }
}

/// Apply spec.md §4.3's data-socket tuning: Nagle left on, large send/recv
/// buffers, keepalive, a linger drain window, and I/O timeouts.
pub fn tune_data_socket(stream: &TcpStream, cfg: &DataSocketTuning) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(false).map_err(|e| Error::Unknown(e.to_string()))?;
    let _ = sock.set_send_buffer_size(cfg.buffer_bytes);
    let _ = sock.set_recv_buffer_size(cfg.buffer_bytes);
    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(cfg.keepalive_idle_secs))
        .with_interval(Duration::from_secs(cfg.keepalive_interval_secs));
    let _ = sock.set_tcp_keepalive(&keepalive);
    let _ = sock.set_linger(Some(Duration::from_secs(cfg.linger_secs)));
    Ok(())
}

/// Parameters needed to tune a freshly opened data socket.
#[derive(Debug, Clone, Copy)]
pub struct DataSocketTuning {
    /// `SO_SNDBUF`/`SO_RCVBUF` size, in bytes.
    pub buffer_bytes: usize,
    /// Keepalive idle time, in seconds.
    pub keepalive_idle_secs: u64,
    /// Keepalive probe interval, in seconds.
    pub keepalive_interval_secs: u64,
    /// `SO_LINGER` drain window, in seconds.
    pub linger_secs: u64,
}

/// Open the data connection implied by the current [`DataMode`], consuming
/// it and returning the negotiated [`TcpStream`].
///
/// `Active` connects out to the remembered endpoint; `Passive` accepts the
/// single pending connection on the held listener. Both paths are bounded
/// by `connect_timeout`.
pub async fn open(
    mode: DataMode,
    connect_timeout: Duration,
    tuning: &DataSocketTuning,
) -> Result<TcpStream> {
    let stream = match mode {
        DataMode::Active(addr) => timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| Error::SocketAccept(e.to_string()))?,
        DataMode::Passive(listener) => {
            let (stream, _peer) = timeout(connect_timeout, listener.accept())
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|e| Error::SocketAccept(e.to_string()))?;
            stream
        }
        DataMode::None => return Err(Error::InvalidParameter("no data mode negotiated".into())),
    };
    tune_data_socket(&stream, tuning)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_args_builds_socket_addr() {
        let addr = parse_port_args("127,0,0,1,0,21").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 21));
    }

    #[test]
    fn parse_port_args_rejects_out_of_range_octet() {
        assert!(parse_port_args("256,0,0,1,0,21").is_none());
    }

    #[test]
    fn parse_port_args_rejects_wrong_arity() {
        assert!(parse_port_args("127,0,0,1,21").is_none());
    }

    #[test]
    fn format_port_args_round_trips() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 4404);
        let text = format_port_args(addr).unwrap();
        let parsed = parse_port_args(&text).unwrap();
        assert_eq!(parsed, addr);
    }
}
