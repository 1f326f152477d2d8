//! Negotiated session state and the resumption cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::crypto::prf;
use crate::error::Error;
use crate::suite;
use crate::version::Version;

/// The outcome of one full handshake: everything needed to resume it, plus
/// the identities the peer claimed along the way.
#[derive(Clone)]
pub struct Session {
    pub(crate) session_id: Vec<u8>,
    pub(crate) cipher_suite: u16,
    pub(crate) master_secret: Zeroizing<Vec<u8>>,
    pub(crate) peer_chain: Vec<Vec<u8>>,
    pub(crate) srp_username: Option<Vec<u8>>,
    pub(crate) shared_key_username: Option<Vec<u8>>,
    pub(crate) resumable: bool,
}

impl Session {
    /// Build a shared-key session for a client. The username doubles as the
    /// session identifier on the wire, zero-padded to 16 bytes, and the
    /// master secret is derived from the key alone.
    pub fn for_shared_key(username: &[u8], shared_key: &[u8]) -> Result<Session, Error> {
        if username.is_empty() || username.len() > 16 {
            return Err(Error::Config(
                "shared-key username must be 1 to 16 bytes".into(),
            ));
        }
        if shared_key.is_empty() || shared_key.len() > 47 {
            return Err(Error::Config(
                "shared key must be 1 to 47 bytes".into(),
            ));
        }
        let mut session_id = vec![0u8; 16];
        session_id[..username.len()].copy_from_slice(username);

        let master = shared_key_master(shared_key);
        Ok(Session {
            session_id,
            cipher_suite: 0,
            master_secret: master,
            peer_chain: Vec::new(),
            srp_username: None,
            shared_key_username: Some(username.to_vec()),
            resumable: false,
        })
    }

    /// The server's session identifier; empty when the server declined to
    /// make the handshake resumable.
    pub fn id(&self) -> &[u8] {
        &self.session_id
    }

    pub fn cipher_suite(&self) -> u16 {
        self.cipher_suite
    }

    /// Display name of the negotiated bulk cipher, if the suite is known.
    pub fn cipher_name(&self) -> Option<&'static str> {
        suite::bulk_cipher(self.cipher_suite).map(|c| c.name())
    }

    /// The peer's certificate chain, outermost (end-entity) first. Empty
    /// when the peer presented none.
    pub fn peer_chain(&self) -> &[Vec<u8>] {
        &self.peer_chain
    }

    pub fn srp_username(&self) -> Option<&[u8]> {
        self.srp_username.as_deref()
    }

    pub fn shared_key_username(&self) -> Option<&[u8]> {
        self.shared_key_username.as_deref()
    }

    /// Whether this session may be offered for resumption.
    pub fn valid(&self) -> bool {
        self.resumable && !self.session_id.is_empty()
    }

    pub(crate) fn invalidate(&mut self) {
        self.resumable = false;
    }
}

/// Shared-key master secret: the premaster is 48 bytes of len(key) || key
/// repeated cyclically, fed through the TLS PRF with the "shared secret"
/// label and an empty seed.
fn shared_key_master(shared_key: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut pattern = Zeroizing::new(Vec::with_capacity(shared_key.len() + 1));
    pattern.push(shared_key.len() as u8);
    pattern.extend_from_slice(shared_key);
    let mut premaster = Zeroizing::new(Vec::with_capacity(48));
    while premaster.len() < 48 {
        let take = (48 - premaster.len()).min(pattern.len());
        premaster.extend_from_slice(&pattern[..take]);
    }
    Zeroizing::new(prf::prf(&premaster, b"shared secret", b"", 48).to_vec())
}

/// Server-side session cache keyed by session identifier.
pub trait SessionCache: Send + Sync {
    fn get(&self, session_id: &[u8]) -> Option<Session>;
    fn put(&self, session_id: &[u8], session: &Session);
}

#[derive(Default)]
pub struct InMemorySessionCache {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
}

impl InMemorySessionCache {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemorySessionCache::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Vec<u8>, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SessionCache for InMemorySessionCache {
    fn get(&self, session_id: &[u8]) -> Option<Session> {
        self.lock().get(session_id).cloned()
    }

    fn put(&self, session_id: &[u8], session: &Session) {
        self.lock().insert(session_id.to_vec(), session.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_key_session_pads_the_id() {
        let s = Session::for_shared_key(b"user", b"secret").unwrap();
        assert_eq!(s.id().len(), 16);
        assert_eq!(&s.id()[..4], b"user");
        assert!(s.id()[4..].iter().all(|&b| b == 0));
        assert_eq!(s.master_secret.len(), 48);
        assert!(!s.valid());
    }

    #[test]
    fn shared_key_bounds_are_enforced() {
        assert!(Session::for_shared_key(&[b'u'; 17], b"k").is_err());
        assert!(Session::for_shared_key(b"u", &[b'k'; 48]).is_err());
        assert!(Session::for_shared_key(b"", b"k").is_err());
        assert!(Session::for_shared_key(&[b'u'; 16], &[b'k'; 47]).is_ok());
    }

    #[test]
    fn same_key_same_master() {
        let a = Session::for_shared_key(b"u", b"key").unwrap();
        let b = Session::for_shared_key(b"u", b"key").unwrap();
        let c = Session::for_shared_key(b"u", b"yek").unwrap();
        assert_eq!(*a.master_secret, *b.master_secret);
        assert_ne!(*a.master_secret, *c.master_secret);
    }

    #[test]
    fn cache_stores_and_returns_sessions() {
        let cache = InMemorySessionCache::new();
        let mut s = Session::for_shared_key(b"u", b"k").unwrap();
        s.session_id = vec![1; 32];
        s.resumable = true;
        cache.put(&[1; 32], &s);
        assert!(cache.get(&[1; 32]).is_some());
        assert!(cache.get(&[2; 32]).is_none());
    }
}
