//! Error taxonomy.
//!
//! Three funnels: local detections build an alert, send it best-effort, and
//! surface as [`Error::LocalAlert`]; peer alerts surface as
//! [`Error::RemoteAlert`]; transport failures and abrupt closes are distinct
//! kinds. Once any error is returned the connection is permanently unusable.

use thiserror::Error;

use crate::alert::{AlertDescription, AlertLevel};
use crate::fault::FaultError;

#[derive(Debug, Error)]
pub enum Error {
    /// The peer sent an alert.
    #[error("peer sent {level} alert: {description}")]
    RemoteAlert {
        level: AlertLevel,
        description: AlertDescription,
    },

    /// We detected a violation, sent an alert, and tore the connection down.
    #[error("sent {description} alert: {reason}")]
    LocalAlert {
        description: AlertDescription,
        reason: &'static str,
    },

    /// The transport closed without a preceding close_notify. Possible
    /// truncation attack.
    #[error("peer closed the transport without close_notify")]
    AbruptClose,

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The post-handshake identity checker rejected the peer.
    #[error("authentication rejected: {0}")]
    Authentication(#[from] AuthError),

    /// Verdict of a fault-injection handshake.
    #[error("fault harness: {0}")]
    Fault(#[from] FaultError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("operation not valid in the current connection state")]
    WrongState,
}

/// Authentication-policy failures raised by a [`crate::checker::Checker`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("peer presented no credential")]
    NoCredential,
    #[error("peer credential has the wrong type")]
    WrongCredentialType,
    #[error("certificate fingerprint mismatch")]
    FingerprintMismatch,
    #[error("peer identity not authorized")]
    NotAuthorized,
    #[error("peer credential failed validation")]
    Invalid,
}

/// A local protocol violation: the alert to send plus the reason surfaced to
/// the caller. Every abort path inside the engine funnels through one of
/// these.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Violation {
    pub alert: AlertDescription,
    pub reason: &'static str,
}

impl Violation {
    pub fn new(alert: AlertDescription, reason: &'static str) -> Self {
        Violation { alert, reason }
    }

    pub fn internal(reason: &'static str) -> Self {
        Violation::new(AlertDescription::InternalError, reason)
    }
}
