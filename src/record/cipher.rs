//! Per-direction record protection state.
//!
//! Each direction carries a sequence number, a MAC (HMAC-SHA1 for TLS, the
//! keyed SSL 3.0 construction otherwise), and a bulk cipher. CBC state is
//! kept alive across records so SSL 3.0 and TLS 1.0 chain their IVs; TLS
//! 1.1 prepends a throwaway random block per record instead.

use aes::{Aes128, Aes256};
use cipher::{Block, BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyIvInit};
use des::TdesEde3;
use digest::{KeyInit, Mac};
use hmac::Hmac;
use rand_core::CryptoRngCore;
use rc4::consts::U16;
use rc4::{Rc4, StreamCipher};
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::alert::AlertDescription;
use crate::crypto::{self, prf};
use crate::error::Violation;
use crate::suite::{self, BulkCipher, MAC_LEN};
use crate::version::Version;

type HmacSha1 = Hmac<Sha1>;

const SSL3_PAD1: u8 = 0x36;
const SSL3_PAD2: u8 = 0x5c;

fn cbc_encrypt<C: BlockEncryptMut>(cipher: &mut C, buf: &mut [u8]) {
    for chunk in buf.chunks_exact_mut(C::block_size()) {
        cipher.encrypt_block_mut(Block::<C>::from_mut_slice(chunk));
    }
}

fn cbc_decrypt<C: BlockDecryptMut>(cipher: &mut C, buf: &mut [u8]) {
    for chunk in buf.chunks_exact_mut(C::block_size()) {
        cipher.decrypt_block_mut(Block::<C>::from_mut_slice(chunk));
    }
}

enum EncCipher {
    Null,
    Rc4(Box<Rc4<U16>>),
    Aes128(Box<cbc::Encryptor<Aes128>>),
    Aes256(Box<cbc::Encryptor<Aes256>>),
    TripleDes(Box<cbc::Encryptor<TdesEde3>>),
}

impl EncCipher {
    fn block_len(&self) -> Option<usize> {
        match self {
            EncCipher::Null | EncCipher::Rc4(_) => None,
            EncCipher::Aes128(_) | EncCipher::Aes256(_) => Some(16),
            EncCipher::TripleDes(_) => Some(8),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            EncCipher::Null => {}
            EncCipher::Rc4(c) => c.apply_keystream(buf),
            EncCipher::Aes128(c) => cbc_encrypt(c.as_mut(), buf),
            EncCipher::Aes256(c) => cbc_encrypt(c.as_mut(), buf),
            EncCipher::TripleDes(c) => cbc_encrypt(c.as_mut(), buf),
        }
    }
}

enum DecCipher {
    Null,
    Rc4(Box<Rc4<U16>>),
    Aes128(Box<cbc::Decryptor<Aes128>>),
    Aes256(Box<cbc::Decryptor<Aes256>>),
    TripleDes(Box<cbc::Decryptor<TdesEde3>>),
}

impl DecCipher {
    fn block_len(&self) -> Option<usize> {
        match self {
            DecCipher::Null | DecCipher::Rc4(_) => None,
            DecCipher::Aes128(_) | DecCipher::Aes256(_) => Some(16),
            DecCipher::TripleDes(_) => Some(8),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            DecCipher::Null => {}
            DecCipher::Rc4(c) => c.apply_keystream(buf),
            DecCipher::Aes128(c) => cbc_decrypt(c.as_mut(), buf),
            DecCipher::Aes256(c) => cbc_decrypt(c.as_mut(), buf),
            DecCipher::TripleDes(c) => cbc_decrypt(c.as_mut(), buf),
        }
    }
}

fn enc_cipher(bulk: BulkCipher, key: &[u8], iv: &[u8]) -> Result<EncCipher, Violation> {
    let bad = |_| Violation::internal("bad cipher key material");
    Ok(match bulk {
        BulkCipher::Rc4 => {
            let rc4: Rc4<U16> = KeyInit::new_from_slice(key).map_err(bad)?;
            EncCipher::Rc4(Box::new(rc4))
        }
        BulkCipher::Aes128 => {
            EncCipher::Aes128(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
        BulkCipher::Aes256 => {
            EncCipher::Aes256(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
        BulkCipher::TripleDes => {
            EncCipher::TripleDes(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
    })
}

fn dec_cipher(bulk: BulkCipher, key: &[u8], iv: &[u8]) -> Result<DecCipher, Violation> {
    let bad = |_| Violation::internal("bad cipher key material");
    Ok(match bulk {
        BulkCipher::Rc4 => {
            let rc4: Rc4<U16> = KeyInit::new_from_slice(key).map_err(bad)?;
            DecCipher::Rc4(Box::new(rc4))
        }
        BulkCipher::Aes128 => {
            DecCipher::Aes128(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
        BulkCipher::Aes256 => {
            DecCipher::Aes256(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
        BulkCipher::TripleDes => {
            DecCipher::TripleDes(Box::new(KeyIvInit::new_from_slices(key, iv).map_err(bad)?))
        }
    })
}

/// Version-specific record MAC.
enum RecordMac {
    Tls(HmacSha1),
    Ssl3(Zeroizing<Vec<u8>>),
}

impl RecordMac {
    fn new(version: Version, key: &[u8]) -> Result<Self, Violation> {
        if version.is_tls() {
            let mac = <HmacSha1 as Mac>::new_from_slice(key)
                .map_err(|_| Violation::internal("bad MAC key material"))?;
            Ok(RecordMac::Tls(mac))
        } else {
            Ok(RecordMac::Ssl3(Zeroizing::new(key.to_vec())))
        }
    }

    /// MAC over sequence number, record header fields, and fragment. SSL
    /// 3.0 omits the version bytes and uses the keyed dual-hash.
    fn compute(&self, seq: u64, content_type: u8, version: Version, fragment: &[u8]) -> [u8; 20] {
        let len = (fragment.len() as u16).to_be_bytes();
        match self {
            RecordMac::Tls(keyed) => {
                let mut mac = keyed.clone();
                mac.update(&seq.to_be_bytes());
                mac.update(&[content_type, version.major, version.minor]);
                mac.update(&len);
                mac.update(fragment);
                mac.finalize().into_bytes().into()
            }
            RecordMac::Ssl3(key) => {
                use digest::Digest;
                let mut inner = Sha1::new();
                inner.update(&**key);
                inner.update([SSL3_PAD1; 40]);
                inner.update(seq.to_be_bytes());
                inner.update([content_type]);
                inner.update(len);
                inner.update(fragment);
                let mut outer = Sha1::new();
                outer.update(&**key);
                outer.update([SSL3_PAD2; 40]);
                outer.update(inner.finalize());
                outer.finalize().into()
            }
        }
    }
}

/// Outgoing record protection.
pub(crate) struct WriteState {
    seq: u64,
    mac: Option<RecordMac>,
    cipher: EncCipher,
    fixed_iv: Vec<u8>,
    pub corrupt_mac: bool,
    pub corrupt_padding: bool,
}

impl WriteState {
    pub fn plaintext() -> Self {
        WriteState {
            seq: 0,
            mac: None,
            cipher: EncCipher::Null,
            fixed_iv: Vec::new(),
            corrupt_mac: false,
            corrupt_padding: false,
        }
    }

    pub fn active(&self) -> bool {
        self.mac.is_some()
    }

    pub fn is_block(&self) -> bool {
        self.cipher.block_len().is_some()
    }

    /// Protect one fragment and return the full record, header included.
    pub fn seal(&mut self, content_type: u8, version: Version, fragment: &[u8]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(fragment.len() + 64);
        payload.extend_from_slice(fragment);

        if let Some(mac) = &self.mac {
            let mut tag = mac.compute(self.seq, content_type, version, fragment);
            if self.corrupt_mac {
                tag[0] = tag[0].wrapping_add(1);
            }
            payload.extend_from_slice(&tag);
        }

        if let Some(block) = self.cipher.block_len() {
            if version >= Version::TLS11 {
                payload.splice(0..0, self.fixed_iv.iter().copied());
            }
            let pad = (block - (payload.len() + 1) % block) % block;
            let mut padding = vec![pad as u8; pad + 1];
            if self.corrupt_padding {
                padding[0] = padding[0].wrapping_add(1);
            }
            payload.extend_from_slice(&padding);
        }
        self.cipher.apply(&mut payload);
        self.seq = self.seq.wrapping_add(1);

        let mut record = Vec::with_capacity(payload.len() + 5);
        record.push(content_type);
        record.push(version.major);
        record.push(version.minor);
        record.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        record.extend_from_slice(&payload);
        record
    }
}

/// Incoming record protection.
pub(crate) struct ReadState {
    seq: u64,
    mac: Option<RecordMac>,
    cipher: DecCipher,
}

impl ReadState {
    pub fn plaintext() -> Self {
        ReadState {
            seq: 0,
            mac: None,
            cipher: DecCipher::Null,
        }
    }

    /// Strip the record protection from one payload, returning the
    /// plaintext fragment.
    pub fn open(
        &mut self,
        content_type: u8,
        version: Version,
        payload: &[u8],
    ) -> Result<Vec<u8>, Violation> {
        let mut data = payload.to_vec();

        if let Some(block) = self.cipher.block_len() {
            // SSL 3.0 predates the decryption_failed alert
            let length_alert = if version.is_tls() {
                AlertDescription::DecryptionFailed
            } else {
                AlertDescription::BadRecordMac
            };
            if data.is_empty() || data.len() % block != 0 {
                return Err(Violation::new(length_alert, "bad ciphertext length"));
            }
            self.cipher.apply(&mut data);
            if version >= Version::TLS11 {
                if data.len() < block {
                    return Err(Violation::new(length_alert, "bad ciphertext length"));
                }
                data.drain(..block);
            }
            let pad = *data.last().ok_or(Violation::new(
                AlertDescription::BadRecordMac,
                "bad padding",
            ))? as usize;
            if pad + 1 > data.len() {
                return Err(Violation::new(AlertDescription::BadRecordMac, "bad padding"));
            }
            if version.is_tls() {
                let start = data.len() - (pad + 1);
                if data[start..].iter().any(|&b| b as usize != pad) {
                    return Err(Violation::new(
                        AlertDescription::BadRecordMac,
                        "bad padding",
                    ));
                }
            }
            data.truncate(data.len() - (pad + 1));
        } else if matches!(self.cipher, DecCipher::Rc4(_)) {
            self.cipher.apply(&mut data);
        }

        if let Some(mac) = &self.mac {
            if data.len() < MAC_LEN {
                return Err(Violation::new(
                    AlertDescription::BadRecordMac,
                    "record shorter than its MAC",
                ));
            }
            let split = data.len() - MAC_LEN;
            let expected = mac.compute(self.seq, content_type, version, &data[..split]);
            if !crypto::ct_eq(&expected, &data[split..]) {
                return Err(Violation::new(
                    AlertDescription::BadRecordMac,
                    "record MAC mismatch",
                ));
            }
            data.truncate(split);
        }
        self.seq = self.seq.wrapping_add(1);
        Ok(data)
    }
}

pub(crate) struct PendingStates {
    pub write: WriteState,
    pub read: ReadState,
}

/// Expand the key block for `suite` and build both pending direction
/// states. The key block lays out client MAC, server MAC, client key,
/// server key, client IV, server IV in that order.
pub(crate) fn pending_states(
    cipher_suite: u16,
    master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    version: Version,
    is_client: bool,
    rng: &mut impl CryptoRngCore,
) -> Result<PendingStates, Violation> {
    let bulk = suite::bulk_cipher(cipher_suite)
        .ok_or(Violation::internal("unknown cipher suite"))?;
    let (key_len, iv_len) = (bulk.key_len(), bulk.iv_len());
    let block = prf::key_block(
        version,
        master,
        client_random,
        server_random,
        2 * (MAC_LEN + key_len + iv_len),
    );

    let mut at = 0;
    let mut span = |n: usize| {
        let r = at..at + n;
        at += n;
        r
    };
    let client_mac = &block[span(MAC_LEN)];
    let server_mac = &block[span(MAC_LEN)];
    let client_key = &block[span(key_len)];
    let server_key = &block[span(key_len)];
    let client_iv = &block[span(iv_len)];
    let server_iv = &block[span(iv_len)];

    let (write_mac, write_key, write_iv, read_mac, read_key, read_iv) = if is_client {
        (client_mac, client_key, client_iv, server_mac, server_key, server_iv)
    } else {
        (server_mac, server_key, server_iv, client_mac, client_key, client_iv)
    };

    let mut fixed_iv = Vec::new();
    if version >= Version::TLS11 && bulk.is_block() {
        fixed_iv = vec![0u8; iv_len];
        rng.fill_bytes(&mut fixed_iv);
    }

    Ok(PendingStates {
        write: WriteState {
            seq: 0,
            mac: Some(RecordMac::new(version, write_mac)?),
            cipher: enc_cipher(bulk, write_key, write_iv)?,
            fixed_iv,
            corrupt_mac: false,
            corrupt_padding: false,
        },
        read: ReadState {
            seq: 0,
            mac: Some(RecordMac::new(version, read_mac)?),
            cipher: dec_cipher(bulk, read_key, read_iv)?,
        },
    })
}
