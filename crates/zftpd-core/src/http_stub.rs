//! Narrow placeholder for the auxiliary HTTP file-browser.
//!
//! The browser itself is out of scope for this crate; this module exists so
//! [`crate::server::Server`] has something concrete to hold and shut down
//! when `http_port` is configured, without pulling an HTTP framework into
//! the dependency graph for a surface this crate does not implement.

use std::net::SocketAddr;

use tracing::info;

/// A no-op stand-in for the HTTP browser listener.
///
/// Binds nothing; logs once so operators can see that the configured
/// `http_port` was acknowledged but not served by this crate.
pub struct HttpStub {
    port: u16,
}

impl HttpStub {
    /// Record the configured port without binding a socket.
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    /// Log the placeholder's presence. Called once at server startup.
    pub fn announce(&self, bind_address: &str) {
        let addr: Option<SocketAddr> = format!("{bind_address}:{}", self.port).parse().ok();
        info!(
            port = self.port,
            addr = ?addr,
            "HTTP file browser is out of scope for this server; no listener started"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_does_not_panic() {
        let stub = HttpStub::new(8080);
        stub.announce("0.0.0.0");
    }
}
