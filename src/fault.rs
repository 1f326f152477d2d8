//! Handshake fault injection.
//!
//! A connection armed with a [`Fault`] deliberately corrupts one value
//! during the next handshake and reports how the peer reacted. A fault-mode
//! handshake never yields a working connection: the result is always a
//! [`FaultError`], with [`FaultError::Rejected`] as the pass verdict.

use crate::alert::AlertDescription;
use crate::error::Error;

/// One deliberate corruption to apply during the next handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Send an SRP username the server does not know.
    BadUsername,
    /// Derive the SRP premaster from a corrupted password.
    BadPassword,
    /// Send A = N as the client SRP ephemeral.
    BadA,
    /// Send B = N as the server SRP ephemeral.
    BadServerB,
    /// Corrupt the shared-key session identifier.
    BadIdentifier,
    /// Derive the shared-key master from a corrupted key.
    BadSharedKey,
    /// Flip a byte of the encrypted RSA premaster.
    BadPremasterPadding,
    /// Send a 47-byte premaster instead of 48.
    ShortPremasterSecret,
    /// Flip a byte of the CertificateVerify signature.
    BadVerifyMessage,
    /// Flip a byte of the Finished verify data.
    BadFinished,
    /// Corrupt the MAC of every outgoing record.
    BadMac,
    /// Corrupt the CBC padding of every outgoing record.
    BadPadding,
}

impl Fault {
    /// The alerts a correct peer may answer this fault with.
    pub fn expected_alerts(self) -> &'static [AlertDescription] {
        use AlertDescription::*;
        match self {
            Fault::BadUsername => &[UnknownSrpUsername, BadRecordMac],
            Fault::BadPassword => &[BadRecordMac],
            Fault::BadA => &[IllegalParameter],
            Fault::BadServerB => &[IllegalParameter],
            Fault::BadIdentifier => &[HandshakeFailure],
            Fault::BadSharedKey => &[BadRecordMac],
            Fault::BadPremasterPadding => &[BadRecordMac],
            Fault::ShortPremasterSecret => &[BadRecordMac],
            Fault::BadVerifyMessage => &[DecryptError],
            Fault::BadFinished => &[DecryptError],
            Fault::BadMac => &[BadRecordMac],
            Fault::BadPadding => &[BadRecordMac],
        }
    }
}

/// Verdict of a fault-mode handshake.
#[derive(Debug, thiserror::Error)]
pub enum FaultError {
    /// The peer rejected the corrupted handshake with an expected alert.
    /// This is the pass verdict.
    #[error("fault rejected with alert {alert}")]
    Rejected { alert: AlertDescription },
    /// The handshake completed even though a value was corrupted.
    #[error("handshake succeeded despite an injected fault")]
    NoFailure,
    /// The peer rejected the handshake, but with the wrong alert.
    #[error("fault rejected with alert {got}, expected one of {expected:?}")]
    WrongAlert {
        got: AlertDescription,
        expected: &'static [AlertDescription],
    },
    /// The peer closed the transport without sending an alert.
    #[error("peer closed the connection without an alert")]
    AbruptClose,
    /// The transport failed before a verdict was reached.
    #[error("transport failure during fault handshake: {0}")]
    Transport(String),
    /// The handshake failed in a way unrelated to the injected fault.
    #[error("unexpected failure during fault handshake: {0}")]
    Unexpected(String),
}

/// Map a handshake outcome to the fault verdict. Both local detection (we
/// noticed the corruption and sent the alert ourselves) and remote alerts
/// count as rejections.
pub(crate) fn classify(fault: Fault, err: Error) -> FaultError {
    let alert = match &err {
        Error::RemoteAlert { description, .. } => Some(*description),
        Error::LocalAlert { description, .. } => Some(*description),
        _ => None,
    };
    match (alert, err) {
        (Some(alert), _) => {
            let expected = fault.expected_alerts();
            if expected.contains(&alert) {
                FaultError::Rejected { alert }
            } else {
                FaultError::WrongAlert {
                    got: alert,
                    expected,
                }
            }
        }
        (None, Error::AbruptClose) => FaultError::AbruptClose,
        (None, Error::Transport(e)) => FaultError::Transport(e.to_string()),
        (None, other) => FaultError::Unexpected(other.to_string()),
    }
}
