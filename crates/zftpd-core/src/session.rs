//! Per-connection session state machine: control-channel line buffering,
//! command dispatch, and the command handlers themselves.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::audit::{self, AuditEvent, CommonFields};
use crate::buffer_pool::BufferPool;
use crate::command;
use crate::config::Config;
use crate::crypto::Cipher;
use crate::data_channel::{self, DataMode, DataSocketTuning};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::path;
use crate::rate_limit::TokenBucket;
use crate::reply;

/// Session lifecycle state (spec.md §4.5). `Init` is represented by the
/// pool slot being unassigned and is never observed by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP accepted, not yet authenticated.
    Connected,
    /// `USER`/`PASS` accepted.
    Authenticated,
    /// A transfer is in progress. Informational only.
    Transferring,
    /// Cleanup pending or complete.
    Terminating,
}

/// `TYPE` setting. `Ascii` is accepted but never translated (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    Ascii,
    Binary,
}

enum LineOutcome {
    Line(String),
    Overflow,
    Timeout,
    Closed,
}

enum DispatchOutcome {
    Continue,
    Quit,
    Fatal,
}

/// Which side of a failed STOR/APPE transfer faulted, for the 426 detail
/// message (spec.md §4.3).
#[derive(Debug, Clone, Copy)]
enum StorFailure {
    /// The data-channel recv errored or closed abnormally.
    Recv,
    /// The local write (or the closing fsync) to the destination file failed.
    Disk,
}

impl StorFailure {
    fn message(self) -> &'static str {
        match self {
            StorFailure::Recv => "Connection closed; network receive error.",
            StorFailure::Disk => "Connection closed; disk write error.",
        }
    }
}

/// One accepted client connection and all state owned exclusively by its
/// worker task.
pub struct Session {
    id: u64,
    uuid: uuid::Uuid,
    ctrl: TcpStream,
    peer_addr: std::net::SocketAddr,
    root: String,
    cwd: String,
    rename_from: Option<String>,
    data_mode: DataMode,
    transfer_type: TransferType,
    restart_offset: u64,
    user_accepted: bool,
    authenticated: bool,
    auth_attempts: u8,
    state: SessionState,
    last_activity: Instant,
    rate_limiter: TokenBucket,
    cipher: Cipher,
    rx_buf: Vec<u8>,
    rx_len: usize,
    config: Arc<Config>,
    buffer_pool: BufferPool,
    metrics: Metrics,
}

impl Session {
    /// Build a new session for a freshly accepted control connection.
    /// `root` must already be canonicalized.
    pub fn new(
        id: u64,
        ctrl: TcpStream,
        peer_addr: std::net::SocketAddr,
        root: String,
        config: Arc<Config>,
        buffer_pool: BufferPool,
        metrics: Metrics,
    ) -> Self {
        let rate_limiter =
            TokenBucket::new(config.rate_limit_bytes_per_sec, config.rate_limit_burst_bytes);
        let buf_size = config.command_buffer_size;
        Self {
            id,
            uuid: uuid::Uuid::new_v4(),
            ctrl,
            peer_addr,
            cwd: root.clone(),
            root,
            rename_from: None,
            data_mode: DataMode::None,
            transfer_type: TransferType::Binary,
            restart_offset: 0,
            user_accepted: false,
            authenticated: false,
            auth_attempts: 0,
            state: SessionState::Connected,
            last_activity: Instant::now(),
            rate_limiter,
            cipher: Cipher::new(),
            rx_buf: vec![0u8; buf_size],
            rx_len: 0,
            config,
            buffer_pool,
            metrics,
        }
    }

    fn common_fields(&self) -> CommonFields {
        CommonFields { session_id: self.uuid, peer_ip: self.peer_addr.ip() }
    }

    /// Run the session to completion: greeting, command loop, cleanup.
    pub async fn run(mut self) {
        audit::record(&AuditEvent::SessionOpened { common: self.common_fields() });
        if self.send_reply(&reply::format_default(220)).await.is_err() {
            return;
        }

        let close_reason = self.command_loop().await;

        if !matches!(self.data_mode, DataMode::None) {
            self.close_data_connection();
        }
        self.state = SessionState::Terminating;
        audit::record(&AuditEvent::SessionClosed {
            common: self.common_fields(),
            reason: close_reason.to_string(),
        });
        info!(session = self.id, reason = close_reason, "session closed");
    }

    async fn command_loop(&mut self) -> &'static str {
        let io_timeout = Duration::from_millis(self.config.control_io_timeout_ms);
        let idle_timeout = Duration::from_secs(self.config.session_timeout_secs);

        loop {
            match self.read_line(io_timeout).await {
                Ok(LineOutcome::Timeout) => {
                    if self.last_activity.elapsed() > idle_timeout {
                        let _ = self.send_reply(&reply::format_default(421)).await;
                        return "idle timeout";
                    }
                    continue;
                }
                Ok(LineOutcome::Closed) => return "peer closed",
                Ok(LineOutcome::Overflow) => {
                    if self.send_reply(&reply::format_default(500)).await.is_err() {
                        return "control write error";
                    }
                    continue;
                }
                Err(_) => return "control i/o error",
                Ok(LineOutcome::Line(line)) => {
                    self.last_activity = Instant::now();
                    match self.dispatch(&line).await {
                        DispatchOutcome::Quit => return "quit",
                        DispatchOutcome::Fatal => return "fatal error",
                        DispatchOutcome::Continue => continue,
                    }
                }
            }
        }
    }

    async fn read_line(&mut self, io_timeout: Duration) -> Result<LineOutcome> {
        loop {
            if let Some(pos) = find_crlf(&self.rx_buf[..self.rx_len]) {
                let line = String::from_utf8_lossy(&self.rx_buf[..pos]).into_owned();
                self.rx_buf.copy_within(pos + 2..self.rx_len, 0);
                self.rx_len -= pos + 2;
                return Ok(LineOutcome::Line(line));
            }

            if self.rx_len >= self.rx_buf.len() {
                self.rx_len = 0;
                return Ok(LineOutcome::Overflow);
            }

            let mut tmp = [0u8; 512];
            let max_read = tmp.len().min(self.rx_buf.len() - self.rx_len);
            match timeout(io_timeout, self.ctrl.read(&mut tmp[..max_read])).await {
                Err(_) => return Ok(LineOutcome::Timeout),
                Ok(Ok(0)) => return Ok(LineOutcome::Closed),
                Ok(Ok(n)) => {
                    if self.cipher.is_active() {
                        self.cipher.xor(&mut tmp[..n]);
                    }
                    self.rx_buf[self.rx_len..self.rx_len + n].copy_from_slice(&tmp[..n]);
                    self.rx_len += n;
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn send_reply(&mut self, text: &str) -> Result<()> {
        let mut bytes = text.as_bytes().to_vec();
        if self.cipher.is_active() {
            self.cipher.xor(&mut bytes);
        }
        self.ctrl.write_all(&bytes).await.map_err(|e| Error::SocketSend(e.to_string()))
    }

    async fn dispatch(&mut self, line: &str) -> DispatchOutcome {
        let (verb, args) = command::parse_line(line);

        let spec = match command::find(&verb) {
            Some(s) => *s,
            None => {
                if self.send_reply(&reply::format_default(500)).await.is_err() {
                    return DispatchOutcome::Fatal;
                }
                return DispatchOutcome::Continue;
            }
        };

        if !self.authenticated && !spec.pre_auth {
            if self
                .send_reply(&reply::format_single(530, "Please login with USER and PASS."))
                .await
                .is_err()
            {
                return DispatchOutcome::Fatal;
            }
            return DispatchOutcome::Continue;
        }

        if !command::validate_arity(&spec, &args) {
            if self.send_reply(&reply::format_default(501)).await.is_err() {
                return DispatchOutcome::Fatal;
            }
            return DispatchOutcome::Continue;
        }

        self.metrics.inc_commands_processed();

        let result = self.execute(&verb, &args).await;
        match result {
            Ok(true) => DispatchOutcome::Quit,
            Ok(false) => DispatchOutcome::Continue,
            Err(e) => {
                self.metrics.inc_errors();
                warn!(session = self.id, verb = %verb, error = %e, "command failed");
                if self.send_reply(&reply::format_default(550)).await.is_err() {
                    return DispatchOutcome::Fatal;
                }
                DispatchOutcome::Continue
            }
        }
    }

    /// Execute one already-validated command. Returns `Ok(true)` if the
    /// session should terminate (QUIT).
    async fn execute(&mut self, verb: &str, args: &str) -> Result<bool> {
        match verb {
            "USER" => self.cmd_user(args).await,
            "PASS" => self.cmd_pass(args).await,
            "QUIT" => self.cmd_quit().await,
            "NOOP" => self.reply_ok(200).await,
            "FEAT" => self.cmd_feat().await,
            "SYST" => self.reply_default(215).await,
            "PWD" => self.cmd_pwd().await,
            "CDUP" => self.cmd_cwd("..").await,
            "CWD" => self.cmd_cwd(args).await,
            "TYPE" => self.cmd_type(args).await,
            "MODE" => self.cmd_mode_stru(args).await,
            "STRU" => self.cmd_mode_stru(args).await,
            "PORT" => self.cmd_port(args).await,
            "PASV" => self.cmd_pasv().await,
            "REST" => self.cmd_rest(args).await,
            "RETR" => self.cmd_retr(args).await,
            "STOR" => self.cmd_stor(args, false).await,
            "APPE" => self.cmd_stor(args, true).await,
            "DELE" => self.cmd_dele(args).await,
            "MKD" => self.cmd_mkd(args).await,
            "RMD" => self.cmd_rmd(args).await,
            "RNFR" => self.cmd_rnfr(args).await,
            "RNTO" => self.cmd_rnto(args).await,
            "SIZE" => self.cmd_size(args).await,
            "MDTM" => self.cmd_mdtm(args).await,
            "LIST" => self.cmd_list(args, true).await,
            "NLST" => self.cmd_list(args, false).await,
            "MLSD" => self.cmd_list(args, true).await,
            "MLST" => self.reply_default(502).await,
            "AUTH" => self.cmd_auth(args).await,
            "STAT" => self.reply_ok(211).await,
            "HELP" => self.reply_ok(214).await,
            _ => self.reply_default(502).await,
        }
    }

    async fn reply_ok(&mut self, code: u16) -> Result<bool> {
        self.send_reply(&reply::format_default(code)).await?;
        Ok(false)
    }

    async fn reply_default(&mut self, code: u16) -> Result<bool> {
        self.send_reply(&reply::format_default(code)).await?;
        Ok(false)
    }

    async fn cmd_user(&mut self, args: &str) -> Result<bool> {
        if args == "anonymous" || args == "ftp" {
            self.user_accepted = true;
            self.send_reply(&reply::format_single(331, "Any password will work.")).await?;
            return Ok(false);
        }

        self.auth_attempts = self.auth_attempts.saturating_add(1);
        audit::record(&AuditEvent::AuthFailed {
            common: self.common_fields(),
            attempt: self.auth_attempts,
        });
        tokio::time::sleep(Duration::from_secs(self.config.auth_failure_delay_secs)).await;

        if self.auth_attempts >= self.config.max_auth_attempts {
            self.send_reply(&reply::format_single(530, "Too many authentication attempts."))
                .await?;
            return Ok(true);
        }
        self.send_reply(&reply::format_single(530, "Only anonymous login supported.")).await?;
        Ok(false)
    }

    async fn cmd_pass(&mut self, _args: &str) -> Result<bool> {
        if !self.user_accepted {
            self.send_reply(&reply::format_default(503)).await?;
            return Ok(false);
        }
        self.authenticated = true;
        self.state = SessionState::Authenticated;
        audit::record(&AuditEvent::AuthSucceeded { common: self.common_fields() });
        self.send_reply(&reply::format_default(230)).await?;
        Ok(false)
    }

    async fn cmd_quit(&mut self) -> Result<bool> {
        self.send_reply(&reply::format_default(221)).await?;
        Ok(true)
    }

    async fn cmd_feat(&mut self) -> Result<bool> {
        let lines =
            ["Features:", "SIZE", "MDTM", "REST STREAM", "APPE", "UTF8", "MLSD", "MLST", "XCRYPT", "End"];
        self.send_reply(&reply::format_multi(211, &lines)).await?;
        Ok(false)
    }

    async fn cmd_pwd(&mut self) -> Result<bool> {
        let msg = format!("\"{}\" is current directory.", self.cwd);
        self.send_reply(&reply::format_single(257, &msg)).await?;
        Ok(false)
    }

    async fn cmd_cwd(&mut self, args: &str) -> Result<bool> {
        match path::resolve(&self.root, &self.cwd, args) {
            Ok(resolved) if tokio::fs::metadata(&resolved).await.map(|m| m.is_dir()).unwrap_or(false) => {
                self.cwd = resolved;
                self.send_reply(&reply::format_default(250)).await?;
            }
            _ => {
                self.send_reply(&reply::format_single(550, "Invalid path.")).await?;
            }
        }
        Ok(false)
    }

    async fn cmd_type(&mut self, args: &str) -> Result<bool> {
        match args.to_ascii_uppercase().chars().next() {
            Some('A') => {
                self.transfer_type = TransferType::Ascii;
                self.reply_ok(200).await
            }
            Some('I') => {
                self.transfer_type = TransferType::Binary;
                self.reply_ok(200).await
            }
            _ => self.reply_default(504).await,
        }
    }

    async fn cmd_mode_stru(&mut self, args: &str) -> Result<bool> {
        match args.to_ascii_uppercase().chars().next() {
            Some('S') | Some('F') => self.reply_ok(200).await,
            _ => self.reply_default(504).await,
        }
    }

    async fn cmd_port(&mut self, args: &str) -> Result<bool> {
        match data_channel::parse_port_args(args) {
            Some(addr) if addr.ip() == self.peer_addr.ip() => {
                self.data_mode = DataMode::Active(addr);
                self.reply_ok(200).await
            }
            _ => {
                self.data_mode = DataMode::None;
                self.send_reply(&reply::format_single(501, "Illegal PORT command.")).await?;
                Ok(false)
            }
        }
    }

    async fn cmd_pasv(&mut self) -> Result<bool> {
        let listener = match tokio::net::TcpListener::bind("0.0.0.0:0").await {
            Ok(l) => l,
            Err(e) => return Err(Error::SocketListen(e.to_string())),
        };
        let local = listener.local_addr().map_err(|e| Error::Unknown(e.to_string()))?;
        let ctrl_local = self.ctrl.local_addr().map_err(|e| Error::Unknown(e.to_string()))?;
        let advertise_ip = match ctrl_local.ip() {
            std::net::IpAddr::V4(ip) if !ip.is_unspecified() => ip,
            _ => match local.ip() {
                std::net::IpAddr::V4(ip) => ip,
                _ => std::net::Ipv4Addr::new(127, 0, 0, 1),
            },
        };
        let advertised = std::net::SocketAddr::new(std::net::IpAddr::V4(advertise_ip), local.port());
        self.data_mode = DataMode::Passive(listener);
        let text = data_channel::format_port_args(advertised)
            .unwrap_or_else(|| "0,0,0,0,0,0".to_string());
        self.send_reply(&reply::format_single(227, &format!("Entering Passive Mode ({text})."))).await?;
        Ok(false)
    }

    async fn cmd_rest(&mut self, args: &str) -> Result<bool> {
        match args.parse::<u64>() {
            Ok(offset) => {
                self.restart_offset = offset;
                self.reply_ok(350).await
            }
            Err(_) => self.reply_default(501).await,
        }
    }

    fn data_tuning(&self) -> DataSocketTuning {
        DataSocketTuning {
            buffer_bytes: self.config.tcp_socket_buffer_bytes,
            keepalive_idle_secs: self.config.keepalive_idle_secs,
            keepalive_interval_secs: self.config.keepalive_interval_secs,
            linger_secs: self.config.linger_secs,
        }
    }

    fn take_data_mode(&mut self) -> DataMode {
        std::mem::take(&mut self.data_mode)
    }

    fn close_data_connection(&mut self) {
        self.data_mode = DataMode::None;
        self.restart_offset = 0;
    }

    async fn open_data_connection(&mut self) -> Result<TcpStream> {
        let mode = self.take_data_mode();
        let timeout_dur = Duration::from_millis(self.config.data_connect_timeout_ms);
        let tuning = self.data_tuning();
        data_channel::open(mode, timeout_dur, &tuning).await
    }

    async fn cmd_retr(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => {
                self.restart_offset = 0;
                return self.reply_invalid_path().await;
            }
        };

        let metadata = match tokio::fs::metadata(&resolved).await {
            Ok(m) if m.is_file() => m,
            _ => {
                self.restart_offset = 0;
                return self.reply_default(550).await;
            }
        };

        if self.restart_offset > metadata.len() {
            self.restart_offset = 0;
            return self.reply_default(550).await;
        }

        self.send_reply(&reply::format_default(150)).await?;
        self.state = SessionState::Transferring;

        let outcome = self.stream_file_out(&resolved, self.restart_offset).await;
        self.restart_offset = 0;
        self.close_data_connection();
        self.state = SessionState::Authenticated;

        let (success, bytes) = outcome.unwrap_or((false, 0));
        audit::record(&AuditEvent::TransferCompleted {
            common: self.common_fields(),
            path: resolved,
            bytes,
            success,
        });
        if success {
            self.metrics.inc_files_sent();
            self.reply_ok(226).await
        } else {
            self.reply_default(426).await
        }
    }

    async fn stream_file_out(&mut self, resolved: &str, offset: u64) -> Result<(bool, u64)> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt as _};

        let mut file = tokio::fs::File::open(resolved).await.map_err(|e| Error::FileOpen(e.to_string()))?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| Error::FileRead(e.to_string()))?;
        }

        let mut data_stream = self.open_data_connection().await?;
        let mut total = 0u64;

        let zero_copy_eligible =
            !self.cipher.is_active() && self.config.rate_limit_bytes_per_sec == 0;

        if zero_copy_eligible {
            match tokio::io::copy(&mut file, &mut data_stream).await {
                Ok(n) => {
                    self.metrics.add_bytes_sent(n);
                    let _ = data_stream.shutdown().await;
                    return Ok((true, n));
                }
                Err(_) => return Ok((false, 0)),
            }
        }

        let Some(pooled) = self.buffer_pool.acquire().await else {
            return Ok((false, 0));
        };
        loop {
            let n = {
                let mut buf = pooled.buffer().await;
                match tokio::io::AsyncReadExt::read(&mut file, &mut buf[..]).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => return Ok((false, total)),
                }
            };
            let mut chunk = {
                let buf = pooled.buffer().await;
                buf[..n].to_vec()
            };
            if self.cipher.is_active() {
                self.cipher.xor(&mut chunk);
            }
            self.rate_limiter.consume(n as u64).await;
            if data_stream.write_all(&chunk).await.is_err() {
                return Ok((false, total));
            }
            total += n as u64;
        }
        let _ = data_stream.shutdown().await;
        self.metrics.add_bytes_sent(total);
        Ok((true, total))
    }

    async fn cmd_stor(&mut self, args: &str, append: bool) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => {
                self.restart_offset = 0;
                return self.reply_invalid_path().await;
            }
        };

        self.send_reply(&reply::format_default(150)).await?;
        self.state = SessionState::Transferring;

        let outcome = self.stream_file_in(&resolved, self.restart_offset, append).await;
        self.restart_offset = 0;
        self.close_data_connection();
        self.state = SessionState::Authenticated;

        let (success, bytes, detail) = outcome.unwrap_or((false, 0, Some(StorFailure::Recv)));
        audit::record(&AuditEvent::TransferCompleted {
            common: self.common_fields(),
            path: resolved,
            bytes,
            success,
        });
        if success {
            self.metrics.inc_files_received();
            self.reply_ok(226).await
        } else {
            let msg = detail.map_or("Connection closed; transfer aborted.", StorFailure::message);
            self.send_reply(&reply::format_single(426, msg)).await?;
            Ok(false)
        }
    }

    /// Which side of a failed STOR/APPE transfer faulted, so the 426 reply
    /// can distinguish a network problem from a local-disk one.
    async fn stream_file_in(
        &mut self,
        resolved: &str,
        offset: u64,
        append: bool,
    ) -> Result<(bool, u64, Option<StorFailure>)> {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncSeekExt;

        let mut opts = OpenOptions::new();
        opts.write(true).create(true);
        if append && offset == 0 {
            opts.append(true);
        }
        let mut file = opts.open(resolved).await.map_err(|e| Error::FileOpen(e.to_string()))?;
        if offset > 0 {
            file.seek(std::io::SeekFrom::Start(offset)).await.map_err(|e| Error::FileWrite(e.to_string()))?;
        } else if !append {
            file.set_len(0).await.map_err(|e| Error::FileWrite(e.to_string()))?;
        }

        let mut data_stream = self.open_data_connection().await?;
        let mut total = 0u64;
        let mut buf = [0u8; 8192];

        loop {
            let n = match data_stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => return Ok((false, total, Some(StorFailure::Recv))),
            };
            self.rate_limiter.consume(n as u64).await;
            let mut chunk = buf[..n].to_vec();
            if self.cipher.is_active() {
                self.cipher.xor(&mut chunk);
            }
            if tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await.is_err() {
                return Ok((false, total, Some(StorFailure::Disk)));
            }
            total += n as u64;
        }

        if file.sync_all().await.is_err() {
            return Ok((false, total, Some(StorFailure::Disk)));
        }
        self.metrics.add_bytes_received(total);
        Ok((true, total, None))
    }

    async fn cmd_dele(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => self.reply_ok(250).await,
            Err(_) => self.reply_default(550).await,
        }
    }

    async fn cmd_mkd(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };
        match tokio::fs::create_dir(&resolved).await {
            Ok(()) => {
                let msg = format!("\"{resolved}\" created.");
                self.send_reply(&reply::format_single(257, &msg)).await?;
                Ok(false)
            }
            Err(_) => self.reply_default(550).await,
        }
    }

    async fn cmd_rmd(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };
        match tokio::fs::remove_dir(&resolved).await {
            Ok(()) => self.reply_ok(250).await,
            Err(_) => self.reply_default(550).await,
        }
    }

    async fn cmd_rnfr(&mut self, args: &str) -> Result<bool> {
        match path::resolve(&self.root, &self.cwd, args) {
            Ok(resolved) if tokio::fs::metadata(&resolved).await.is_ok() => {
                self.rename_from = Some(resolved);
                self.reply_ok(350).await
            }
            _ => {
                self.rename_from = None;
                self.reply_default(550).await
            }
        }
    }

    async fn cmd_rnto(&mut self, args: &str) -> Result<bool> {
        let Some(from) = self.rename_from.take() else {
            return self.reply_default(503).await;
        };
        let to = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };

        match tokio::fs::rename(&from, &to).await {
            Ok(()) => self.reply_ok(250).await,
            Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
                match tokio::fs::copy(&from, &to).await {
                    Ok(_) => {
                        let _ = tokio::fs::remove_file(&from).await;
                        self.reply_ok(250).await
                    }
                    Err(_) => self.reply_default(550).await,
                }
            }
            Err(_) => self.reply_default(550).await,
        }
    }

    async fn cmd_size(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };
        match tokio::fs::metadata(&resolved).await {
            Ok(m) if m.is_file() => {
                self.send_reply(&reply::format_single(213, &m.len().to_string())).await?;
                Ok(false)
            }
            _ => self.reply_default(550).await,
        }
    }

    async fn cmd_mdtm(&mut self, args: &str) -> Result<bool> {
        let resolved = match path::resolve(&self.root, &self.cwd, args) {
            Ok(p) => p,
            Err(_) => return self.reply_invalid_path().await,
        };
        match tokio::fs::metadata(&resolved).await.and_then(|m| m.modified()) {
            Ok(t) => {
                let dt: DateTime<Utc> = t.into();
                let text = dt.format("%Y%m%d%H%M%S").to_string();
                self.send_reply(&reply::format_single(213, &text)).await?;
                Ok(false)
            }
            Err(_) => self.reply_default(550).await,
        }
    }

    async fn cmd_list(&mut self, args: &str, long: bool) -> Result<bool> {
        let target = if args.is_empty() { self.cwd.clone() } else {
            match path::resolve(&self.root, &self.cwd, args) {
                Ok(p) => p,
                Err(_) => return self.reply_invalid_path().await,
            }
        };

        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(r) => r,
            Err(_) => return self.reply_default(451).await,
        };

        self.send_reply(&reply::format_default(150)).await?;
        let mut data_stream = match self.open_data_connection().await {
            Ok(s) => s,
            Err(_) => return self.reply_default(425).await,
        };

        let mut ok = true;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "." || name == ".." {
                continue;
            }
            let line = if long {
                match entry.metadata().await {
                    Ok(m) => format_list_line(&name, &m),
                    Err(_) => continue,
                }
            } else {
                format!("{name}\r\n")
            };
            if data_stream.write_all(line.as_bytes()).await.is_err() {
                ok = false;
                break;
            }
        }
        let _ = data_stream.shutdown().await;
        self.close_data_connection();

        if ok {
            self.reply_ok(226).await
        } else {
            self.reply_default(451).await
        }
    }

    async fn cmd_auth(&mut self, args: &str) -> Result<bool> {
        if !args.eq_ignore_ascii_case("XCRYPT") {
            return self.reply_default(504).await;
        }
        if self.cipher.is_active() {
            return self.reply_default(503).await;
        }
        let Some(psk) = self.config.psk() else {
            return self.reply_default(504).await;
        };
        let nonce = crate::crypto::random_nonce();
        let key = crate::crypto::derive_key(&psk, &nonce);
        let nonce_hex = nonce.iter().map(|b| format!("{b:02x}")).collect::<String>();
        self.send_reply(&reply::format_single(234, &format!("XCRYPT {nonce_hex}"))).await?;
        self.cipher.activate(key, nonce);
        audit::record(&AuditEvent::CryptoNegotiated { common: self.common_fields() });
        Ok(false)
    }

    async fn reply_invalid_path(&mut self) -> Result<bool> {
        self.send_reply(&reply::format_single(550, "Invalid path.")).await?;
        Ok(false)
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn format_list_line(name: &str, metadata: &std::fs::Metadata) -> String {
    let is_dir = metadata.is_dir();
    let perms = unix_permission_string(metadata, is_dir);
    let size = metadata.len();
    let mtime: DateTime<Utc> = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH).into();
    let mtime_str = mtime.format("%b %d %H:%M").to_string();
    format!("{perms} 1 ftp ftp {size:>10} {mtime_str} {name}\r\n")
}

#[cfg(unix)]
fn unix_permission_string(metadata: &std::fs::Metadata, is_dir: bool) -> String {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    let mut s = String::with_capacity(10);
    s.push(if is_dir { 'd' } else { '-' });
    for &(shift, r, w, x) in &[(8, 'r', 'w', 'x'), (5, 'r', 'w', 'x'), (2, 'r', 'w', 'x')] {
        s.push(if mode & (1 << (shift + 2)) != 0 { r } else { '-' });
        s.push(if mode & (1 << (shift + 1)) != 0 { w } else { '-' });
        s.push(if mode & (1 << shift) != 0 { x } else { '-' });
    }
    s
}

#[cfg(not(unix))]
fn unix_permission_string(_metadata: &std::fs::Metadata, is_dir: bool) -> String {
    if is_dir { "drwxr-xr-x".to_string() } else { "-rw-r--r--".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_crlf_locates_terminator() {
        assert_eq!(find_crlf(b"PWD\r\n"), Some(3));
        assert_eq!(find_crlf(b"no terminator"), None);
    }

    #[test]
    fn format_list_line_has_minimum_width_size_field() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("a.txt");
        std::fs::write(&file_path, b"hi").unwrap();
        let metadata = std::fs::metadata(&file_path).unwrap();
        let line = format_list_line("a.txt", &metadata);
        assert!(line.contains("a.txt"));
        assert!(line.ends_with("\r\n"));
    }
}
