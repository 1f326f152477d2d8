//! Version-specific key derivation.
//!
//! TLS uses the split-secret P_MD5 xor P_SHA1 PRF; SSL 3.0 uses the
//! concatenated MD5(SHA1(...)) block scheme and a keyed dual-hash for the
//! Finished and CertificateVerify values. All intermediate secrets are wiped
//! on drop.

use digest::{Digest, KeyInit, Mac};
use hmac::Hmac;
use md5::Md5;
use sha1::Sha1;
use zeroize::Zeroizing;

use crate::crypto::TranscriptHash;
use crate::version::Version;

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

const SSL3_PAD1: u8 = 0x36;
const SSL3_PAD2: u8 = 0x5c;

fn p_hash<M: Mac + KeyInit + Clone>(secret: &[u8], seed: &[u8], out_len: usize) -> Zeroizing<Vec<u8>> {
    // HMAC accepts keys of any length
    let keyed: M = <M as Mac>::new_from_slice(secret).expect("HMAC key init");
    let mut out = Zeroizing::new(Vec::with_capacity(out_len + 20));
    let mut a = {
        let mut m = keyed.clone();
        m.update(seed);
        m.finalize().into_bytes()
    };
    while out.len() < out_len {
        let mut m = keyed.clone();
        m.update(&a);
        m.update(seed);
        out.extend_from_slice(&m.finalize().into_bytes());
        let mut next = keyed.clone();
        next.update(&a);
        a = next.finalize().into_bytes();
    }
    out.truncate(out_len);
    out
}

/// TLS PRF: P_MD5 over the first half of the secret xored with P_SHA1 over
/// the second half (the halves overlap by one byte when the length is odd).
pub(crate) fn prf(secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Zeroizing<Vec<u8>> {
    let half = (secret.len() + 1) / 2;
    let s1 = &secret[..half];
    let s2 = &secret[secret.len() - half..];

    let mut label_seed = Vec::with_capacity(label.len() + seed.len());
    label_seed.extend_from_slice(label);
    label_seed.extend_from_slice(seed);

    let p1 = p_hash::<HmacMd5>(s1, &label_seed, out_len);
    let p2 = p_hash::<HmacSha1>(s2, &label_seed, out_len);

    let mut out = Zeroizing::new(vec![0u8; out_len]);
    for i in 0..out_len {
        out[i] = p1[i] ^ p2[i];
    }
    out
}

/// SSL 3.0 PRF: concatenated MD5(secret || SHA1('A'.. blocks || secret ||
/// seed)) outputs.
pub(crate) fn prf_ssl(secret: &[u8], seed: &[u8], out_len: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(out_len + 16));
    let mut round = 0u8;
    while out.len() < out_len {
        let label = vec![b'A' + round; round as usize + 1];
        let mut inner = Sha1::new();
        inner.update(&label);
        inner.update(secret);
        inner.update(seed);
        let mut outer = Md5::new();
        outer.update(secret);
        outer.update(inner.finalize());
        out.extend_from_slice(&outer.finalize());
        round += 1;
    }
    out.truncate(out_len);
    out
}

/// 48-byte master secret from the premaster secret and both nonces.
pub(crate) fn master_secret(
    version: Version,
    premaster: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Zeroizing<Vec<u8>> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);
    if version.is_tls() {
        prf(premaster, b"master secret", &seed, 48)
    } else {
        prf_ssl(premaster, &seed, 48)
    }
}

/// Key-block expansion; the seed order is reversed relative to the master
/// secret derivation.
pub(crate) fn key_block(
    version: Version,
    master: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    out_len: usize,
) -> Zeroizing<Vec<u8>> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);
    if version.is_tls() {
        prf(master, b"key expansion", &seed, out_len)
    } else {
        prf_ssl(master, &seed, out_len)
    }
}

/// SSL 3.0 keyed handshake hash: 36 bytes. `sender` is the four-byte role
/// tag for Finished, or empty for CertificateVerify.
pub(crate) fn ssl_handshake_hash(
    master: &[u8],
    transcript: &TranscriptHash,
    sender: &[u8],
) -> Vec<u8> {
    let mut imd5 = transcript.md5_hasher();
    imd5.update(sender);
    imd5.update(master);
    imd5.update([SSL3_PAD1; 48]);
    let mut omd5 = Md5::new();
    omd5.update(master);
    omd5.update([SSL3_PAD2; 48]);
    omd5.update(imd5.finalize());

    let mut isha = transcript.sha1_hasher();
    isha.update(sender);
    isha.update(master);
    isha.update([SSL3_PAD1; 40]);
    let mut osha = Sha1::new();
    osha.update(master);
    osha.update([SSL3_PAD2; 40]);
    osha.update(isha.finalize());

    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&omd5.finalize());
    out.extend_from_slice(&osha.finalize());
    out
}

/// Finished verify data: 12 bytes for TLS, 36 for SSL 3.0.
pub(crate) fn finished_verify(
    version: Version,
    master: &[u8],
    transcript: &TranscriptHash,
    is_client: bool,
) -> Vec<u8> {
    if version.is_tls() {
        let label: &[u8] = if is_client {
            b"client finished"
        } else {
            b"server finished"
        };
        prf(master, label, &transcript.digest36(), 12).to_vec()
    } else {
        let sender: &[u8] = if is_client { b"CLNT" } else { b"SRVR" };
        ssl_handshake_hash(master, transcript, sender)
    }
}
