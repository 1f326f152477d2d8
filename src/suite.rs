//! Cipher-suite identifiers, family predicates, and bulk-cipher parameters.
//!
//! Three families are supported: SRP (mutual password authentication),
//! SRP+RSA (SRP with RSA-signed exchange parameters), and plain RSA
//! certificate suites. Every suite uses HMAC/keyed SHA-1 record protection.

pub const SRP_SHA_WITH_3DES_EDE_CBC_SHA: u16 = 0x0050;
pub const SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0x0051;
pub const SRP_SHA_WITH_AES_128_CBC_SHA: u16 = 0x0053;
pub const SRP_SHA_RSA_WITH_AES_128_CBC_SHA: u16 = 0x0054;
pub const SRP_SHA_WITH_AES_256_CBC_SHA: u16 = 0x0056;
pub const SRP_SHA_RSA_WITH_AES_256_CBC_SHA: u16 = 0x0057;
pub const RSA_WITH_RC4_128_SHA: u16 = 0x0005;
pub const RSA_WITH_3DES_EDE_CBC_SHA: u16 = 0x000A;
pub const RSA_WITH_AES_128_CBC_SHA: u16 = 0x002F;
pub const RSA_WITH_AES_256_CBC_SHA: u16 = 0x0035;

/// SHA-1 record MAC length, shared by every supported suite.
pub(crate) const MAC_LEN: usize = 20;

/// Bulk record-protection ciphers, in default preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkCipher {
    Aes256,
    Aes128,
    TripleDes,
    Rc4,
}

impl BulkCipher {
    pub fn name(self) -> &'static str {
        match self {
            BulkCipher::Aes256 => "aes256",
            BulkCipher::Aes128 => "aes128",
            BulkCipher::TripleDes => "3des",
            BulkCipher::Rc4 => "rc4",
        }
    }

    pub(crate) fn key_len(self) -> usize {
        match self {
            BulkCipher::Aes256 => 32,
            BulkCipher::Aes128 => 16,
            BulkCipher::TripleDes => 24,
            BulkCipher::Rc4 => 16,
        }
    }

    pub(crate) fn iv_len(self) -> usize {
        match self {
            BulkCipher::Aes256 | BulkCipher::Aes128 => 16,
            BulkCipher::TripleDes => 8,
            BulkCipher::Rc4 => 0,
        }
    }

    pub(crate) fn is_block(self) -> bool {
        !matches!(self, BulkCipher::Rc4)
    }
}

/// Key-exchange family of a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyExchange {
    Srp,
    SrpRsa,
    Rsa,
}

pub(crate) fn key_exchange(suite: u16) -> Option<KeyExchange> {
    if is_srp(suite) {
        Some(KeyExchange::Srp)
    } else if is_srp_rsa(suite) {
        Some(KeyExchange::SrpRsa)
    } else if is_rsa(suite) {
        Some(KeyExchange::Rsa)
    } else {
        None
    }
}

pub fn is_srp(suite: u16) -> bool {
    matches!(
        suite,
        SRP_SHA_WITH_3DES_EDE_CBC_SHA
            | SRP_SHA_WITH_AES_128_CBC_SHA
            | SRP_SHA_WITH_AES_256_CBC_SHA
    )
}

pub fn is_srp_rsa(suite: u16) -> bool {
    matches!(
        suite,
        SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA
            | SRP_SHA_RSA_WITH_AES_128_CBC_SHA
            | SRP_SHA_RSA_WITH_AES_256_CBC_SHA
    )
}

pub fn is_rsa(suite: u16) -> bool {
    matches!(
        suite,
        RSA_WITH_RC4_128_SHA
            | RSA_WITH_3DES_EDE_CBC_SHA
            | RSA_WITH_AES_128_CBC_SHA
            | RSA_WITH_AES_256_CBC_SHA
    )
}

/// Either SRP family; used when deciding whether a hello that lacks an SRP
/// identity was still angling for SRP.
pub fn in_srp_families(suite: u16) -> bool {
    is_srp(suite) || is_srp_rsa(suite)
}

pub fn bulk_cipher(suite: u16) -> Option<BulkCipher> {
    match suite {
        SRP_SHA_WITH_AES_256_CBC_SHA
        | SRP_SHA_RSA_WITH_AES_256_CBC_SHA
        | RSA_WITH_AES_256_CBC_SHA => Some(BulkCipher::Aes256),
        SRP_SHA_WITH_AES_128_CBC_SHA
        | SRP_SHA_RSA_WITH_AES_128_CBC_SHA
        | RSA_WITH_AES_128_CBC_SHA => Some(BulkCipher::Aes128),
        SRP_SHA_WITH_3DES_EDE_CBC_SHA
        | SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA
        | RSA_WITH_3DES_EDE_CBC_SHA => Some(BulkCipher::TripleDes),
        RSA_WITH_RC4_128_SHA => Some(BulkCipher::Rc4),
        _ => None,
    }
}

/// SRP suites in the caller's cipher-preference order.
pub(crate) fn srp_suites(ciphers: &[BulkCipher]) -> Vec<u16> {
    ciphers
        .iter()
        .filter_map(|c| match c {
            BulkCipher::Aes256 => Some(SRP_SHA_WITH_AES_256_CBC_SHA),
            BulkCipher::Aes128 => Some(SRP_SHA_WITH_AES_128_CBC_SHA),
            BulkCipher::TripleDes => Some(SRP_SHA_WITH_3DES_EDE_CBC_SHA),
            BulkCipher::Rc4 => None,
        })
        .collect()
}

/// SRP+RSA suites in the caller's cipher-preference order.
pub(crate) fn srp_rsa_suites(ciphers: &[BulkCipher]) -> Vec<u16> {
    ciphers
        .iter()
        .filter_map(|c| match c {
            BulkCipher::Aes256 => Some(SRP_SHA_RSA_WITH_AES_256_CBC_SHA),
            BulkCipher::Aes128 => Some(SRP_SHA_RSA_WITH_AES_128_CBC_SHA),
            BulkCipher::TripleDes => Some(SRP_SHA_RSA_WITH_3DES_EDE_CBC_SHA),
            BulkCipher::Rc4 => None,
        })
        .collect()
}

/// RSA certificate suites in the caller's cipher-preference order.
pub(crate) fn rsa_suites(ciphers: &[BulkCipher]) -> Vec<u16> {
    ciphers
        .iter()
        .map(|c| match c {
            BulkCipher::Aes256 => RSA_WITH_AES_256_CBC_SHA,
            BulkCipher::Aes128 => RSA_WITH_AES_128_CBC_SHA,
            BulkCipher::TripleDes => RSA_WITH_3DES_EDE_CBC_SHA,
            BulkCipher::Rc4 => RSA_WITH_RC4_128_SHA,
        })
        .collect()
}
