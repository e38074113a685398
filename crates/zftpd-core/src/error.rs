//! Error taxonomy for the FTP core.
//!
//! One variant per semantic error kind the server can encounter internally.
//! Command handlers translate these into the single most specific FTP reply
//! code (see [`crate::reply`]) before returning a non-OK result to the
//! dispatcher; the variant itself never reaches the wire.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Semantic error kinds produced anywhere in the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller passed a malformed or out-of-range argument.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The buffer pool or session pool has no free slot left.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Failed to create a socket.
    #[error("socket create failed: {0}")]
    SocketCreate(String),

    /// Failed to bind a listening socket.
    #[error("socket bind failed: {0}")]
    SocketBind(String),

    /// Failed to put a socket into the listening state.
    #[error("socket listen failed: {0}")]
    SocketListen(String),

    /// Failed to accept an incoming connection.
    #[error("socket accept failed: {0}")]
    SocketAccept(String),

    /// A send on a socket failed.
    #[error("socket send failed: {0}")]
    SocketSend(String),

    /// A recv on a socket failed.
    #[error("socket recv failed: {0}")]
    SocketRecv(String),

    /// Spawning the per-session task failed.
    #[error("task spawn failed: {0}")]
    TaskSpawn(String),

    /// Opening a file failed.
    #[error("file open failed: {0}")]
    FileOpen(String),

    /// Reading from a file failed.
    #[error("file read failed: {0}")]
    FileRead(String),

    /// Writing to a file failed.
    #[error("file write failed: {0}")]
    FileWrite(String),

    /// Stat'ing a file failed.
    #[error("file stat failed: {0}")]
    FileStat(String),

    /// Opening a directory for listing failed.
    #[error("directory open failed: {0}")]
    DirOpen(String),

    /// A resolved path escaped the session root, or does not exist/verify.
    #[error("invalid path: {0}")]
    PathInvalid(PathBuf),

    /// A path exceeded the platform path-length or component-depth limit.
    #[error("path too long")]
    PathTooLong,

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not permitted on the target resource.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An operation exceeded its bounded timeout.
    #[error("timed out")]
    Timeout,

    /// The session pool has no free slot.
    #[error("maximum sessions reached")]
    MaxSessionsReached,

    /// Authentication was rejected or exhausted its attempt budget.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The client sent a line that violates the control-channel protocol.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Catch-all for conditions with no more specific mapping.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            NotFound => Error::NotFound(e.to_string()),
            PermissionDenied => Error::PermissionDenied(e.to_string()),
            TimedOut => Error::Timeout,
            _ => Error::Unknown(e.to_string()),
        }
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(e: std::net::AddrParseError) -> Self {
        Error::InvalidParameter(e.to_string())
    }
}
