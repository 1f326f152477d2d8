//! Collaborator capability interfaces: asymmetric keys, certificate parsing,
//! and credential stores.
//!
//! RSA and X.509 internals live behind these traits; the engine only relies
//! on the contracts below. In-memory store implementations are provided for
//! servers that keep credentials in process.

use std::collections::HashMap;

use num_bigint::BigUint;
use zeroize::Zeroizing;

use crate::crypto::srp::{self, SrpGroup};

/// Public half of an asymmetric capability object.
pub trait PublicKey {
    /// Modulus size in bits, checked against the configured key-size bounds.
    fn bit_len(&self) -> usize;

    /// Verify `signature` over `digest`.
    fn verify(&self, signature: &[u8], digest: &[u8]) -> bool;

    /// PKCS#1 v1.5 encrypt; `None` when `data` cannot be encrypted.
    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Private half; implies the public operations.
pub trait PrivateKey: PublicKey {
    /// PKCS#1 v1.5 decrypt. Returns `None` on any padding or format
    /// failure; the server masks that outcome rather than reporting it.
    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// Sign `digest`.
    fn sign(&self, digest: &[u8]) -> Vec<u8>;
}

/// Extracts the subject public key from a DER certificate chain.
pub trait CertificateParser {
    /// The end-entity certificate is `chain[0]`.
    fn public_key(&self, chain: &[Vec<u8>]) -> Option<Box<dyn PublicKey>>;
}

/// One SRP credential: the group, salt, and verifier for an identity.
#[derive(Debug, Clone)]
pub struct SrpEntry {
    pub group: SrpGroup,
    pub salt: Vec<u8>,
    pub verifier: BigUint,
}

/// Keyed lookup of SRP credentials.
pub trait VerifierStore {
    fn lookup(&self, username: &[u8]) -> Option<SrpEntry>;
}

#[derive(Default)]
pub struct InMemoryVerifierStore {
    entries: HashMap<Vec<u8>, SrpEntry>,
}

impl InMemoryVerifierStore {
    pub fn new() -> Self {
        InMemoryVerifierStore::default()
    }

    pub fn insert(&mut self, username: &[u8], entry: SrpEntry) {
        self.entries.insert(username.to_vec(), entry);
    }

    /// Derive and store a verifier from a password, using the allow-listed
    /// group of `bits` bits. Returns false when no such group is listed.
    pub fn insert_password(
        &mut self,
        username: &[u8],
        password: &[u8],
        salt: &[u8],
        bits: u64,
    ) -> bool {
        let Some(group) = srp::group_for_bits(bits) else {
            return false;
        };
        let verifier = srp::make_verifier(username, password, salt, group);
        self.insert(
            username,
            SrpEntry {
                group: group.clone(),
                salt: salt.to_vec(),
                verifier,
            },
        );
        true
    }
}

impl VerifierStore for InMemoryVerifierStore {
    fn lookup(&self, username: &[u8]) -> Option<SrpEntry> {
        self.entries.get(username).cloned()
    }
}

/// Keyed lookup of pre-shared keys.
pub trait SharedKeyStore {
    fn lookup(&self, username: &[u8]) -> Option<Zeroizing<Vec<u8>>>;
}

#[derive(Default)]
pub struct InMemorySharedKeyStore {
    keys: HashMap<Vec<u8>, Zeroizing<Vec<u8>>>,
}

impl InMemorySharedKeyStore {
    pub fn new() -> Self {
        InMemorySharedKeyStore::default()
    }

    pub fn insert(&mut self, username: &[u8], key: &[u8]) {
        self.keys
            .insert(username.to_vec(), Zeroizing::new(key.to_vec()));
    }
}

impl SharedKeyStore for InMemorySharedKeyStore {
    fn lookup(&self, username: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        self.keys.get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_store_round_trip() {
        let mut store = InMemoryVerifierStore::new();
        assert!(store.insert_password(b"alice", b"pw", b"salt", 1024));
        assert!(!store.insert_password(b"bob", b"pw", b"salt", 4096));
        let entry = store.lookup(b"alice").unwrap();
        assert_eq!(entry.salt, b"salt");
        assert!(store.lookup(b"bob").is_none());
    }
}
