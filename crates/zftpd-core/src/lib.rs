//! Core engine for an RFC 959/3659 FTP server: session state machine,
//! command dispatch, chroot-aware path resolution, the `AUTH XCRYPT`
//! stream cipher, and the fixed-capacity session and buffer pools that
//! back the accept loop.

pub mod audit;
pub mod buffer_pool;
pub mod command;
pub mod config;
pub mod crypto;
pub mod data_channel;
pub mod error;
pub mod http_stub;
pub mod metrics;
pub mod path;
pub mod pool;
pub mod rate_limit;
pub mod reply;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use server::Server;
