//! Fixed-capacity session pool and the control-channel acceptor loop.
//!
//! The pool never grows past `max_sessions`: a fixed `Vec` of slot states is
//! allocated once at startup, and a single mutex guards slot selection. This
//! mirrors the reference server's static `ftp_session_t[FTP_MAX_SESSIONS]`
//! table — an async task per accepted connection stands in for the
//! reference's one-thread-per-session model.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::session::Session;
use crate::buffer_pool::BufferPool;

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Occupied,
}

/// Fixed-capacity table of session slots. `acquire`/`release` are the only
/// way a caller learns whether a slot was available; there is no growth
/// path.
pub struct SessionPool {
    slots: Vec<Mutex<SlotState>>,
    active: AtomicUsize,
}

impl SessionPool {
    /// Build a pool with exactly `capacity` slots, all initially free.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Mutex::new(SlotState::Free)).collect(),
            active: AtomicUsize::new(0),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently occupied.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Claim the first free slot, or `None` if every slot is occupied.
    pub async fn acquire(&self) -> Option<SlotGuard<'_>> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.lock().await;
            if *guard == SlotState::Free {
                *guard = SlotState::Occupied;
                self.active.fetch_add(1, Ordering::Relaxed);
                drop(guard);
                return Some(SlotGuard { pool: self, index });
            }
        }
        None
    }

    async fn release(&self, index: usize) {
        let mut guard = self.slots[index].lock().await;
        *guard = SlotState::Free;
        self.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII handle to one claimed slot. Dropping it (via [`SlotGuard::release`])
/// frees the slot for reuse; a session that panics mid-task still leaves the
/// slot marked occupied until the runtime unwinds and the guard drops, which
/// `tokio::spawn`'s task boundary guarantees.
pub struct SlotGuard<'a> {
    pool: &'a SessionPool,
    index: usize,
}

impl SlotGuard<'_> {
    /// Slot index, used only as the session identifier in logs.
    pub fn index(&self) -> u64 {
        self.index as u64
    }

    async fn release(self) {
        self.pool.release(self.index).await;
    }
}

/// Accept control connections until `running` is cleared, spawning one
/// session task per accepted client and turning away connections once the
/// pool is full.
pub async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    root: Arc<str>,
    pool: Arc<SessionPool>,
    buffer_pool: BufferPool,
    metrics: Metrics,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = wait_while_running(&running) => break,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "control accept failed");
                continue;
            }
        };

        if let Err(e) = tune_control_socket(&stream, config.listen_backlog) {
            warn!(error = %e, "failed to tune control socket");
        }

        let Some(slot) = pool.acquire().await else {
            metrics.inc_sessions_rejected();
            reject_connection(stream).await;
            continue;
        };

        metrics.inc_sessions_accepted();
        let session_id = slot.index();
        let session = Session::new(
            session_id,
            stream,
            peer_addr,
            root.to_string(),
            Arc::clone(&config),
            buffer_pool.clone(),
            metrics.clone(),
        );

        tokio::spawn(async move {
            info!(session = session_id, peer = %peer_addr, "session accepted");
            session.run().await;
            slot.release().await;
        });
    }
}

async fn wait_while_running(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

async fn reject_connection(mut stream: TcpStream) {
    use tokio::io::AsyncWriteExt;
    let _ = stream.write_all(crate::reply::format_default(421).as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn tune_control_socket(stream: &TcpStream, _backlog: u32) -> Result<()> {
    let sock = SockRef::from(stream);
    sock.set_nodelay(true).map_err(|e| Error::Unknown(e.to_string()))?;
    let keepalive = TcpKeepalive::new()
        .with_time(std::time::Duration::from_secs(60))
        .with_interval(std::time::Duration::from_secs(10));
    let _ = sock.set_tcp_keepalive(&keepalive);
    Ok(())
}

/// Bind the control-channel listener and apply the configured backlog.
pub async fn bind_control_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
    } else {
        socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::STREAM, Some(socket2::Protocol::TCP))
    }
    .map_err(|e| Error::SocketCreate(e.to_string()))?;

    socket.set_reuse_address(true).map_err(|e| Error::SocketBind(e.to_string()))?;
    socket.set_nonblocking(true).map_err(|e| Error::SocketBind(e.to_string()))?;
    socket.bind(&addr.into()).map_err(|e| Error::SocketBind(e.to_string()))?;
    socket.listen(backlog as i32).map_err(|e| Error::SocketListen(e.to_string()))?;

    TcpListener::from_std(socket.into()).map_err(|e| Error::SocketListen(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_enforces_fixed_capacity() {
        let pool = SessionPool::new(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert!(pool.acquire().await.is_none());
        assert_eq!(pool.active(), 2);
        a.release().await;
        assert_eq!(pool.active(), 1);
        assert!(pool.acquire().await.is_some());
        drop(b);
    }

    #[tokio::test]
    async fn bind_control_listener_picks_an_ephemeral_port() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = bind_control_listener(addr, 8).await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
    }
}
