use core::fmt;

/// An SSL/TLS protocol version as a (major, minor) pair.
///
/// Ordering follows the wire encoding, so `Version::SSL30 < Version::TLS10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const SSL30: Version = Version::new(3, 0);
    pub const TLS10: Version = Version::new(3, 1);
    pub const TLS11: Version = Version::new(3, 2);

    pub const fn new(major: u8, minor: u8) -> Self {
        Version { major, minor }
    }

    /// Whether this is one of the versions the engine can negotiate.
    pub fn is_known(self) -> bool {
        matches!(self, Version::SSL30 | Version::TLS10 | Version::TLS11)
    }

    /// TLS (as opposed to SSL 3.0) changes the MAC construction, the PRF,
    /// and the ClientKeyExchange encoding.
    pub(crate) fn is_tls(self) -> bool {
        self >= Version::TLS10
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Version::SSL30 => f.write_str("SSL 3.0"),
            Version::TLS10 => f.write_str("TLS 1.0"),
            Version::TLS11 => f.write_str("TLS 1.1"),
            Version { major, minor } => write!(f, "({major},{minor})"),
        }
    }
}
