//! Structured audit events, emitted through `tracing` rather than ad hoc
//! log lines — the same tagged-enum shape this codebase's other protocol
//! crates use for their audit trails.

use serde::Serialize;
use std::net::IpAddr;
use tracing::info;

/// Fields common to every audit event.
#[derive(Debug, Clone, Serialize)]
pub struct CommonFields {
    /// Session identifier.
    pub session_id: uuid::Uuid,
    /// Peer IP address.
    pub peer_ip: IpAddr,
}

/// A security- or lifecycle-relevant occurrence worth recording verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A new control connection was accepted into a session slot.
    SessionOpened {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
    },
    /// `USER` was accepted (username recognized as anonymous/ftp).
    AuthSucceeded {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
    },
    /// `USER` was rejected, or the session exhausted its attempt budget.
    AuthFailed {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
        /// Number of failed attempts so far this session.
        attempt: u8,
    },
    /// A file transfer completed or aborted.
    TransferCompleted {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
        /// Resolved path of the transferred file.
        path: String,
        /// Bytes actually moved.
        bytes: u64,
        /// Whether the transfer reached its terminal 226 reply.
        success: bool,
    },
    /// `AUTH XCRYPT` was negotiated for this session.
    CryptoNegotiated {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
    },
    /// The session was torn down.
    SessionClosed {
        /// Shared fields.
        #[serde(flatten)]
        common: CommonFields,
        /// Human-readable reason (idle timeout, QUIT, I/O error, ...).
        reason: String,
    },
}

/// Emit an [`AuditEvent`] as a structured `tracing` event at `info` level.
pub fn record(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(audit = %json, "audit event"),
        Err(_) => info!(?event, "audit event (unserializable)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn serializes_with_tagged_event_type() {
        let event = AuditEvent::AuthFailed {
            common: CommonFields {
                session_id: uuid::Uuid::nil(),
                peer_ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            },
            attempt: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"auth_failed\""));
        assert!(json.contains("\"attempt\":2"));
    }
}
