//! Handshake negotiation policy.

use crate::error::Error;
use crate::suite::BulkCipher;
use crate::version::Version;

/// Certificate types negotiable in the hello extensions. Only X.509 chains
/// are supported; the negotiation plumbing is kept so a peer offering more
/// types still interoperates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    X509 = 0,
}

impl CertificateType {
    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CertificateType::X509),
            _ => None,
        }
    }
}

/// Parameters a caller can tune for a handshake.
///
/// `validate` is called once at handshake start and yields the effective
/// immutable policy for that handshake.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Minimum bit length accepted for the peer's asymmetric key or SRP group.
    pub min_key_size: usize,
    /// Maximum bit length accepted for the peer's asymmetric key or SRP group.
    pub max_key_size: usize,
    /// Enabled bulk ciphers, in preference order. A client offers suites in
    /// this order; a server picks the first of its own entries the client
    /// also offered.
    pub cipher_names: Vec<BulkCipher>,
    /// Allowed certificate types, in preference order.
    pub certificate_types: Vec<CertificateType>,
    pub min_version: Version,
    pub max_version: Version,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            min_key_size: 1023,
            max_key_size: 8193,
            cipher_names: vec![
                BulkCipher::Aes256,
                BulkCipher::Aes128,
                BulkCipher::TripleDes,
                BulkCipher::Rc4,
            ],
            certificate_types: vec![CertificateType::X509],
            min_version: Version::SSL30,
            max_version: Version::TLS11,
        }
    }
}

impl Settings {
    /// Validate into the effective policy snapshot used for one handshake.
    pub fn validate(&self) -> Result<Settings, Error> {
        if self.min_key_size < 512 {
            return Err(Error::Config("min_key_size too small".into()));
        }
        if self.min_key_size > 16384 {
            return Err(Error::Config("min_key_size too large".into()));
        }
        if self.max_key_size < 512 {
            return Err(Error::Config("max_key_size too small".into()));
        }
        if self.max_key_size > 16384 {
            return Err(Error::Config("max_key_size too large".into()));
        }
        if self.cipher_names.is_empty() {
            return Err(Error::Config("no ciphers enabled".into()));
        }
        if self.certificate_types.is_empty() {
            return Err(Error::Config("no certificate types enabled".into()));
        }
        if !self.min_version.is_known() || !self.max_version.is_known() {
            return Err(Error::Config("unsupported protocol version".into()));
        }
        if self.min_version > self.max_version {
            return Err(Error::Config("version range set incorrectly".into()));
        }
        Ok(self.clone())
    }
}
