//! Top-level server: owns configuration, the session pool, the buffer
//! pool, and metrics, and drives the accept loop to completion.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::http_stub::HttpStub;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::pool::{self, SessionPool};

/// Owns every long-lived resource shared across sessions and runs the
/// control-channel accept loop until asked to stop.
pub struct Server {
    config: Arc<Config>,
    pool: Arc<SessionPool>,
    buffer_pool: BufferPool,
    metrics: Metrics,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Build a server from a validated configuration.
    ///
    /// # Errors
    /// Returns an error if `config` fails [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(SessionPool::new(config.max_sessions));
        let buffer_pool = BufferPool::new(config.max_sessions, DEFAULT_BUFFER_SIZE);
        Ok(Self {
            config: Arc::new(config),
            pool,
            buffer_pool,
            metrics: Metrics::new(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// A cheaply cloned handle to the server's live metrics.
    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Take a point-in-time snapshot of server metrics.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// A handle that, when cleared, asks the accept loop to stop after its
    /// current iteration.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Bind the configured control-channel address and return the listener
    /// together with the address actually bound (useful when `port` is 0).
    ///
    /// # Errors
    /// Returns an error if the configured address fails to bind.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr)> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| Error::InvalidParameter(e.to_string()))?;
        let listener = pool::bind_control_listener(addr, self.config.listen_backlog).await?;
        let bound = listener.local_addr().map_err(|e| Error::Unknown(e.to_string()))?;
        Ok((listener, bound))
    }

    /// Bind the control-channel listener and run the accept loop until
    /// `running` is cleared (see [`Server::shutdown_handle`]) or the
    /// process receives an interrupt.
    ///
    /// # Errors
    /// Returns an error if the configured address fails to bind.
    pub async fn run(self) -> Result<()> {
        let (listener, bound) = self.bind().await?;
        info!(
            addr = %bound,
            max_sessions = self.config.max_sessions,
            root = %self.config.root_dir.display(),
            "control channel listening"
        );

        let running = self.running;
        let shutdown_signal = Arc::clone(&running);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, stopping accept loop");
                shutdown_signal.store(false, Ordering::Relaxed);
            }
        });

        self.serve(listener, running).await
    }

    /// Run the accept loop against an already-bound listener until `running`
    /// is cleared. Split out from [`Server::run`] so tests can learn the
    /// bound (possibly ephemeral) port before the loop starts.
    ///
    /// # Errors
    /// Returns an error if the server root cannot be canonicalized.
    pub async fn serve(self, listener: TcpListener, running: Arc<AtomicBool>) -> Result<()> {
        if let Some(http_port) = self.config.http_port {
            HttpStub::new(http_port).announce(&self.config.bind_address);
        }

        let root: Arc<str> = Arc::from(
            self.config
                .root_dir
                .canonicalize()
                .map_err(|e| Error::InvalidParameter(e.to_string()))?
                .to_string_lossy()
                .into_owned(),
        );

        pool::accept_loop(
            listener,
            self.config,
            root,
            self.pool,
            self.buffer_pool,
            self.metrics,
            running,
        )
        .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(root: PathBuf) -> Config {
        let mut c = Config::default();
        c.root_dir = root;
        c.port = 12121;
        c.bind_address = "127.0.0.1".to_string();
        c
    }

    #[test]
    fn new_rejects_invalid_config() {
        let config = test_config(PathBuf::from("/does/not/exist"));
        assert!(Server::new(config).is_err());
    }

    #[tokio::test]
    async fn new_accepts_valid_config_and_exposes_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf());
        let server = Server::new(config).unwrap();
        let snap = server.metrics_snapshot();
        assert_eq!(snap.sessions_accepted, 0);
    }
}
