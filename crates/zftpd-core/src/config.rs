//! Server configuration: CLI/TOML-driven constants for every tunable named
//! in spec.md §6, following this codebase's `serde` + per-field default-fn
//! convention.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    2121
}
fn default_max_sessions() -> usize {
    32
}
fn default_session_timeout_secs() -> u64 {
    300
}
fn default_control_io_timeout_ms() -> u64 {
    1000
}
fn default_data_io_timeout_ms() -> u64 {
    120_000
}
fn default_data_connect_timeout_ms() -> u64 {
    15_000
}
fn default_linger_secs() -> u64 {
    10
}
fn default_listen_backlog() -> u32 {
    8
}
fn default_command_buffer_size() -> usize {
    512
}
fn default_reply_buffer_size() -> usize {
    1024
}
fn default_path_max() -> usize {
    4096
}
fn default_max_path_depth() -> usize {
    32
}
fn default_max_auth_attempts() -> u8 {
    3
}
fn default_auth_failure_delay_secs() -> u64 {
    2
}
fn default_transfer_buffer_size() -> usize {
    256 * 1024
}
fn default_tcp_socket_buffer_bytes() -> usize {
    1024 * 1024
}
fn default_keepalive_idle_secs() -> u64 {
    60
}
fn default_keepalive_interval_secs() -> u64 {
    10
}
fn default_keepalive_probes() -> u32 {
    3
}
fn default_rate_limit_bytes_per_sec() -> u64 {
    0
}
fn default_rate_limit_burst_bytes() -> u64 {
    0
}
fn default_psk_hex() -> String {
    "0".repeat(64)
}

/// Full server configuration, loadable from a TOML file and overridable
/// from the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the control-channel listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Control-channel listening port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Server root directory; every session is chrooted beneath it.
    pub root_dir: PathBuf,
    /// Maximum concurrent sessions (size of the fixed session pool).
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Idle timeout before a session is force-closed, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Control-channel read timeout, in milliseconds.
    #[serde(default = "default_control_io_timeout_ms")]
    pub control_io_timeout_ms: u64,
    /// Data-channel I/O timeout, in milliseconds.
    #[serde(default = "default_data_io_timeout_ms")]
    pub data_io_timeout_ms: u64,
    /// Data-channel connect timeout, in milliseconds.
    #[serde(default = "default_data_connect_timeout_ms")]
    pub data_connect_timeout_ms: u64,
    /// `SO_LINGER` drain window applied to data sockets, in seconds.
    #[serde(default = "default_linger_secs")]
    pub linger_secs: u64,
    /// Listen backlog for the control-channel acceptor.
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    /// Maximum control command line length, in bytes.
    #[serde(default = "default_command_buffer_size")]
    pub command_buffer_size: usize,
    /// Reply line buffer size, in bytes.
    #[serde(default = "default_reply_buffer_size")]
    pub reply_buffer_size: usize,
    /// Maximum resolved path length.
    #[serde(default = "default_path_max")]
    pub path_max: usize,
    /// Maximum accepted path component depth.
    #[serde(default = "default_max_path_depth")]
    pub max_path_depth: usize,
    /// Failed `USER` attempts allowed before session termination.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u8,
    /// Delay applied after each failed authentication attempt, in seconds.
    #[serde(default = "default_auth_failure_delay_secs")]
    pub auth_failure_delay_secs: u64,
    /// Size of each buffer-pool entry, in bytes.
    #[serde(default = "default_transfer_buffer_size")]
    pub transfer_buffer_size: usize,
    /// `SO_SNDBUF`/`SO_RCVBUF` applied to data sockets.
    #[serde(default = "default_tcp_socket_buffer_bytes")]
    pub tcp_socket_buffer_bytes: usize,
    /// TCP keepalive idle time, in seconds.
    #[serde(default = "default_keepalive_idle_secs")]
    pub keepalive_idle_secs: u64,
    /// TCP keepalive probe interval, in seconds.
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
    /// TCP keepalive probe count before the peer is considered dead.
    #[serde(default = "default_keepalive_probes")]
    pub keepalive_probes: u32,
    /// Data-channel rate limit, in bytes/sec (0 disables limiting).
    #[serde(default = "default_rate_limit_bytes_per_sec")]
    pub rate_limit_bytes_per_sec: u64,
    /// Data-channel rate-limit burst size, in bytes (0 = same as rate).
    #[serde(default = "default_rate_limit_burst_bytes")]
    pub rate_limit_burst_bytes: u64,
    /// 256-bit pre-shared key for `AUTH XCRYPT`, as 64 lowercase hex
    /// characters.
    #[serde(default = "default_psk_hex")]
    pub psk_hex: String,
    /// Optional TCP port for the auxiliary HTTP file-browser (out of
    /// scope for the core; carried only so the CLI surface matches
    /// spec.md §6).
    pub http_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: PathBuf::from("."),
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout_secs(),
            control_io_timeout_ms: default_control_io_timeout_ms(),
            data_io_timeout_ms: default_data_io_timeout_ms(),
            data_connect_timeout_ms: default_data_connect_timeout_ms(),
            linger_secs: default_linger_secs(),
            listen_backlog: default_listen_backlog(),
            command_buffer_size: default_command_buffer_size(),
            reply_buffer_size: default_reply_buffer_size(),
            path_max: default_path_max(),
            max_path_depth: default_max_path_depth(),
            max_auth_attempts: default_max_auth_attempts(),
            auth_failure_delay_secs: default_auth_failure_delay_secs(),
            transfer_buffer_size: default_transfer_buffer_size(),
            tcp_socket_buffer_bytes: default_tcp_socket_buffer_bytes(),
            keepalive_idle_secs: default_keepalive_idle_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            keepalive_probes: default_keepalive_probes(),
            rate_limit_bytes_per_sec: default_rate_limit_bytes_per_sec(),
            rate_limit_burst_bytes: default_rate_limit_burst_bytes(),
            psk_hex: default_psk_hex(),
            http_port: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::FileOpen(format!("{}: {e}", path.as_ref().display())))?;
        toml::from_str(&text).map_err(|e| Error::InvalidParameter(e.to_string()))
    }

    /// Validate filesystem/network preconditions that can't be checked at
    /// parse time.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::InvalidParameter("port must be 1..=65535".into()));
        }
        if self.max_sessions == 0 || self.max_sessions > 256 {
            return Err(Error::InvalidParameter("max_sessions must be 1..=256".into()));
        }
        if !self.root_dir.is_dir() {
            return Err(Error::InvalidParameter(format!(
                "root_dir {} is not a directory",
                self.root_dir.display()
            )));
        }
        if self.psk().is_none() {
            return Err(Error::InvalidParameter(
                "psk_hex must be exactly 64 hex characters".into(),
            ));
        }
        Ok(())
    }

    /// Decode [`Config::psk_hex`] into a 32-byte key, or `None` if it is
    /// malformed.
    pub fn psk(&self) -> Option<[u8; 32]> {
        if self.psk_hex.len() != 64 {
            return None;
        }
        let mut key = [0u8; 32];
        for i in 0..32 {
            key[i] = u8::from_str_radix(&self.psk_hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_spec_constants() {
        let c = Config::default();
        assert_eq!(c.port, 2121);
        assert_eq!(c.max_sessions, 32);
        assert_eq!(c.session_timeout_secs, 300);
        assert_eq!(c.data_connect_timeout_ms, 15_000);
        assert_eq!(c.data_io_timeout_ms, 120_000);
        assert_eq!(c.max_auth_attempts, 3);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Config::default();
        c.root_dir = dir.path().to_path_buf();
        let toml_text = toml::to_string(&c).unwrap();

        let file_path = dir.path().join("zftpd.toml");
        let mut f = std::fs::File::create(&file_path).unwrap();
        f.write_all(toml_text.as_bytes()).unwrap();

        let loaded = Config::from_file(&file_path).unwrap();
        assert_eq!(loaded.port, c.port);
        assert_eq!(loaded.root_dir, c.root_dir);
    }

    #[test]
    fn validate_rejects_missing_root_dir() {
        let mut c = Config::default();
        c.root_dir = PathBuf::from("/does/not/exist/zftpd-test");
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_psk_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Config::default();
        c.root_dir = dir.path().to_path_buf();
        c.psk_hex = "abc".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults_with_real_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = Config::default();
        c.root_dir = dir.path().to_path_buf();
        assert!(c.validate().is_ok());
    }
}
