//! Shared test harness: an in-memory non-blocking pipe, a handshake
//! driver, and a fixed RSA key behind the capability traits with a
//! synthetic certificate format.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use num_bigint::BigUint;
use rand_core::{OsRng, RngCore};

use morel::{CertificateParser, Connection, Error, PrivateKey, PublicKey, Status};

/// One end of a bidirectional in-memory byte pipe. Reads return
/// `WouldBlock` when the peer has written nothing, so every suspension
/// point gets exercised. Clones share the same buffers, which lets tests
/// tamper with bytes in flight.
#[derive(Clone)]
pub struct Pipe {
    pub incoming: Rc<RefCell<VecDeque<u8>>>,
    pub outgoing: Rc<RefCell<VecDeque<u8>>>,
}

pub fn pipe_pair() -> (Pipe, Pipe) {
    let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
    (
        Pipe {
            incoming: b_to_a.clone(),
            outgoing: a_to_b.clone(),
        },
        Pipe {
            incoming: a_to_b,
            outgoing: b_to_a,
        },
    )
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.incoming.borrow_mut();
        if incoming.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "pipe empty"));
        }
        let n = buf.len().min(incoming.len());
        for b in buf.iter_mut().take(n) {
            *b = incoming.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.borrow_mut().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Alternate handshake steps on both ends until each resolves.
pub fn drive(
    a: &mut Connection<Pipe>,
    b: &mut Connection<Pipe>,
) -> (Result<(), Error>, Result<(), Error>) {
    let mut ra: Option<Result<(), Error>> = None;
    let mut rb: Option<Result<(), Error>> = None;
    for _ in 0..200 {
        if ra.is_none() {
            match a.handshake_step() {
                Ok(Status::Complete) => ra = Some(Ok(())),
                Ok(_) => {}
                Err(e) => ra = Some(Err(e)),
            }
        }
        if rb.is_none() {
            match b.handshake_step() {
                Ok(Status::Complete) => rb = Some(Ok(())),
                Ok(_) => {}
                Err(e) => rb = Some(Err(e)),
            }
        }
        if ra.is_some() && rb.is_some() {
            return (ra.unwrap(), rb.unwrap());
        }
    }
    panic!("handshake made no progress");
}

// A fixed 1024-bit key; generating primes per test run would dominate the
// suite's runtime.
const N_HEX: &[u8] = b"97cc152fbcb64cbaeeb07634b2a8c37533be5ce4746f192d4cd1fa6f3482820075021ba2adf2bf3f9d54eaa6481c3ef0b40717a96ae20ef23c67b9ed4e9af9882437327fc392a89fa31d8f19a2d6805fc6d0d140ac09d5d26b9c9e8bc9d4d155dd4c1aebbb014b2e8e41240585da72faaf52a818344c16721c3c022b95cd4d81";
const D_HEX: &[u8] = b"2a47afc7021b0cb82c6f7e1d237e1a22f4ec9ad70f0f3ac60155a3198258af790d1e2f305a9ef861f1a28b511158bcb7328d9f2b9317afee0ca11f8a579096dbc3e9ec83e19ccbea66b7829212a9ed41567ac2197a9b3d254ab73709a7055472036613222b2e9779234478fcbec13510b4d2c1e46a142069092e6ea740523499";

fn modulus() -> BigUint {
    BigUint::parse_bytes(N_HEX, 16).unwrap()
}

/// Left-pad a big-endian encoding to `k` bytes.
fn i2osp(x: &BigUint, k: usize) -> Vec<u8> {
    let bytes = x.to_bytes_be();
    let mut out = vec![0u8; k - bytes.len()];
    out.extend_from_slice(&bytes);
    out
}

fn pkcs1_type1(k: usize, data: &[u8]) -> Vec<u8> {
    let mut em = vec![0xff; k];
    em[0] = 0x00;
    em[1] = 0x01;
    em[k - data.len() - 1] = 0x00;
    em[k - data.len()..].copy_from_slice(data);
    em
}

pub struct TestRsaPub {
    n: BigUint,
    e: BigUint,
}

impl TestRsaPub {
    fn k(&self) -> usize {
        (self.n.bits() as usize + 7) / 8
    }
}

impl PublicKey for TestRsaPub {
    fn bit_len(&self) -> usize {
        self.n.bits() as usize
    }

    fn verify(&self, signature: &[u8], digest: &[u8]) -> bool {
        let k = self.k();
        if signature.len() != k {
            return false;
        }
        let s = BigUint::from_bytes_be(signature);
        if s >= self.n {
            return false;
        }
        let em = i2osp(&s.modpow(&self.e, &self.n), k);
        em == pkcs1_type1(k, digest)
    }

    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        let k = self.k();
        if data.len() > k - 11 {
            return None;
        }
        let mut em = vec![0u8; k];
        em[1] = 0x02;
        let pad_len = k - 3 - data.len();
        OsRng.fill_bytes(&mut em[2..2 + pad_len]);
        for b in &mut em[2..2 + pad_len] {
            if *b == 0 {
                *b = 0x01;
            }
        }
        em[2 + pad_len] = 0x00;
        em[3 + pad_len..].copy_from_slice(data);
        let m = BigUint::from_bytes_be(&em);
        Some(i2osp(&m.modpow(&self.e, &self.n), k))
    }
}

pub struct TestRsaKey {
    public: TestRsaPub,
    d: BigUint,
}

pub fn test_key() -> TestRsaKey {
    TestRsaKey {
        public: TestRsaPub {
            n: modulus(),
            e: BigUint::from(65537u32),
        },
        d: BigUint::parse_bytes(D_HEX, 16).unwrap(),
    }
}

impl PublicKey for TestRsaKey {
    fn bit_len(&self) -> usize {
        self.public.bit_len()
    }

    fn verify(&self, signature: &[u8], digest: &[u8]) -> bool {
        self.public.verify(signature, digest)
    }

    fn encrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        self.public.encrypt(data)
    }
}

impl PrivateKey for TestRsaKey {
    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        let k = self.public.k();
        if data.len() != k {
            return None;
        }
        let c = BigUint::from_bytes_be(data);
        if c >= self.public.n {
            return None;
        }
        let em = i2osp(&c.modpow(&self.d, &self.public.n), k);
        if em[0] != 0x00 || em[1] != 0x02 {
            return None;
        }
        let sep = em[2..].iter().position(|&b| b == 0)? + 2;
        if sep < 10 {
            return None;
        }
        Some(em[sep + 1..].to_vec())
    }

    fn sign(&self, digest: &[u8]) -> Vec<u8> {
        let k = self.public.k();
        let em = pkcs1_type1(k, digest);
        let m = BigUint::from_bytes_be(&em);
        i2osp(&m.modpow(&self.d, &self.public.n), k)
    }
}

/// A toy certificate: two length-prefixed integers, modulus then exponent.
pub fn test_cert() -> Vec<u8> {
    let key = test_key();
    let n = key.public.n.to_bytes_be();
    let e = key.public.e.to_bytes_be();
    let mut der = Vec::new();
    der.extend_from_slice(&(n.len() as u16).to_be_bytes());
    der.extend_from_slice(&n);
    der.extend_from_slice(&(e.len() as u16).to_be_bytes());
    der.extend_from_slice(&e);
    der
}

pub struct TestCertParser;

impl CertificateParser for TestCertParser {
    fn public_key(&self, chain: &[Vec<u8>]) -> Option<Box<dyn PublicKey>> {
        let der = chain.first()?;
        let n_len = u16::from_be_bytes([*der.first()?, *der.get(1)?]) as usize;
        let n = der.get(2..2 + n_len)?;
        let at = 2 + n_len;
        let e_len = u16::from_be_bytes([*der.get(at)?, *der.get(at + 1)?]) as usize;
        let e = der.get(at + 2..at + 2 + e_len)?;
        Some(Box::new(TestRsaPub {
            n: BigUint::from_bytes_be(n),
            e: BigUint::from_bytes_be(e),
        }))
    }
}

/// Lowercase hex SHA-1 of the test certificate, for fingerprint checks.
pub fn test_cert_fingerprint() -> String {
    use digest::Digest;
    let digest = sha1::Sha1::digest(test_cert());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
