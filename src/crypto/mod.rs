//! Hash primitives and the running handshake transcript.

pub(crate) mod prf;
pub mod srp;

use digest::Digest;
use md5::Md5;
use sha1::Sha1;
use subtle::ConstantTimeEq;

pub(crate) fn sha1(data: &[u8]) -> [u8; 20] {
    let mut h = Sha1::new();
    h.update(data);
    h.finalize().into()
}

/// Constant-time equality for MACs and Finished verify data.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Running MD5+SHA-1 over every handshake message sent or received,
/// including the four-byte message headers. Feeds the Finished verify data
/// and the CertificateVerify digests.
#[derive(Clone)]
pub(crate) struct TranscriptHash {
    md5: Md5,
    sha1: Sha1,
}

impl TranscriptHash {
    pub fn new() -> Self {
        TranscriptHash {
            md5: Md5::new(),
            sha1: Sha1::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
    }

    pub fn md5_hasher(&self) -> Md5 {
        self.md5.clone()
    }

    pub fn sha1_hasher(&self) -> Sha1 {
        self.sha1.clone()
    }

    /// MD5(transcript) || SHA1(transcript) without disturbing the running
    /// state.
    pub fn digest36(&self) -> [u8; 36] {
        let mut out = [0u8; 36];
        out[..16].copy_from_slice(&self.md5.clone().finalize());
        out[16..].copy_from_slice(&self.sha1.clone().finalize());
        out
    }
}
