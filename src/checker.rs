//! Post-handshake credential checks.

use crate::crypto::sha1;
use crate::error::AuthError;
use crate::session::Session;

/// Inspects the completed session and decides whether the peer's credential
/// is acceptable. A failure tears the connection down after the handshake
/// finishes.
pub trait Checker {
    fn check(&self, session: &Session) -> Result<(), AuthError>;
}

/// Accepts exactly one end-entity certificate, identified by the SHA-1
/// fingerprint of its DER encoding.
pub struct FingerprintChecker {
    fingerprint: String,
}

impl FingerprintChecker {
    /// `fingerprint` is the lowercase hex SHA-1 digest of the expected
    /// certificate.
    pub fn new(fingerprint: &str) -> Self {
        FingerprintChecker {
            fingerprint: fingerprint.to_ascii_lowercase(),
        }
    }
}

impl Checker for FingerprintChecker {
    fn check(&self, session: &Session) -> Result<(), AuthError> {
        let Some(end_entity) = session.peer_chain().first() else {
            return Err(AuthError::NoCredential);
        };
        if hex(&sha1(end_entity)) == self.fingerprint {
            Ok(())
        } else {
            Err(AuthError::FingerprintMismatch)
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
