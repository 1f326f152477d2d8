//! SRP math for the SRP-over-TLS suites.
//!
//! The group allow-list holds the RFC 5054 1024- and 1536-bit parameters;
//! both endpoints must use a listed group, so a server key exchange naming
//! anything else is rejected before any exponentiation happens.

use std::sync::LazyLock;

use digest::Digest;
use num_bigint::BigUint;
use num_traits::Zero;
use rand_core::CryptoRngCore;
use sha1::Sha1;
use zeroize::Zeroizing;

/// A (N, g) SRP group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrpGroup {
    pub n: BigUint,
    pub g: BigUint,
}

const N_1024_HEX: &[u8] = b"EEAF0AB9ADB38DD69C33F80AFA8FC5E86072618775FF3C0B9EA2314C9C256576\
D674DF7496EA81D3383B4813D692C6E0E0D5D8E250B98BE48E495C1D6089DAD1\
5DC7D7B46154D6B6CE8EF4AD69B15D4982559B297BCF1885C529F566660E57EC\
68EDBC3C05726CC02FD4CBF4976EAA9AFD5138FE8376435B9FC61D2FC0EB06E3";

const N_1536_HEX: &[u8] = b"9DEF3CAFB939277AB1F12A8617A47BBBDBA51DF499AC4C80BEEEA9614B19CC4D\
5F4F5F556E27CBDE51C6A94BE4607A291558903BA0D0F84380B655BB9A22E8DC\
DF028A7CEC67F0D08134B1C8B97989149B609E0BE3BAB63D47548381DBC5B1FC\
764E3F4B53DD9DA1158BFD3E2B9C8CF56EDF019539349627DB2FD53D24B7C486\
65772E437D6C7F8CE442734AF7CCB7AE837C264AE3A9BEB87F8A2FE9B8B5292E\
5A021FFF5E91479E8CE7A28C2442C6F315180F93499A234DCF76E3FED135F9BB";

/// Allow-listed groups, smallest first.
pub static GROUPS: LazyLock<Vec<SrpGroup>> = LazyLock::new(|| {
    let parse = |hex: &[u8]| -> SrpGroup {
        // constants, checked by the group_sizes test
        let n = BigUint::parse_bytes(hex, 16).expect("SRP group constant");
        SrpGroup {
            n,
            g: BigUint::from(2u8),
        }
    };
    vec![parse(N_1024_HEX), parse(N_1536_HEX)]
});

/// The listed group whose modulus has exactly `bits` bits.
pub fn group_for_bits(bits: u64) -> Option<&'static SrpGroup> {
    GROUPS.iter().find(|g| g.n.bits() == bits)
}

pub(crate) fn known_group(n: &BigUint, g: &BigUint) -> bool {
    GROUPS.iter().any(|grp| &grp.n == n && &grp.g == g)
}

pub(crate) fn bytes_to_num(b: &[u8]) -> BigUint {
    BigUint::from_bytes_be(b)
}

/// Minimal big-endian encoding; zero encodes as the empty string, matching
/// the premaster a zero shared value produces.
pub(crate) fn num_to_bytes(n: &BigUint) -> Vec<u8> {
    if n.is_zero() {
        Vec::new()
    } else {
        n.to_bytes_be()
    }
}

fn sha1_num(parts: &[&[u8]]) -> BigUint {
    let mut h = Sha1::new();
    for p in parts {
        h.update(p);
    }
    bytes_to_num(&h.finalize())
}

/// x = SHA1(salt || SHA1(identity ":" secret)).
pub(crate) fn make_x(salt: &[u8], username: &[u8], password: &[u8]) -> BigUint {
    let mut inner = Sha1::new();
    inner.update(username);
    inner.update(b":");
    inner.update(password);
    let inner = inner.finalize();
    sha1_num(&[salt, &inner])
}

/// Scrambler u = SHA1(A || B) over the minimal encodings.
pub(crate) fn make_u(a_pub: &BigUint, b_pub: &BigUint) -> BigUint {
    sha1_num(&[&num_to_bytes(a_pub), &num_to_bytes(b_pub)])
}

/// Multiplier k = SHA1(N || g).
pub(crate) fn make_k(group: &SrpGroup) -> BigUint {
    sha1_num(&[&num_to_bytes(&group.n), &num_to_bytes(&group.g)])
}

/// v = g^x mod N, stored server-side keyed by identity.
pub fn make_verifier(username: &[u8], password: &[u8], salt: &[u8], group: &SrpGroup) -> BigUint {
    let x = make_x(salt, username, password);
    group.g.modpow(&x, &group.n)
}

pub(crate) struct ClientEphemeral {
    pub secret: BigUint,
    pub public: BigUint,
}

pub(crate) fn client_ephemeral(group: &SrpGroup, rng: &mut impl CryptoRngCore) -> ClientEphemeral {
    let mut buf = Zeroizing::new([0u8; 32]);
    rng.fill_bytes(&mut buf[..]);
    let a = bytes_to_num(&buf[..]);
    ClientEphemeral {
        public: group.g.modpow(&a, &group.n),
        secret: a,
    }
}

pub(crate) struct ServerEphemeral {
    pub secret: BigUint,
    pub public: BigUint,
}

/// B = (k*v + g^b) mod N, retried until non-zero.
pub(crate) fn server_ephemeral(
    group: &SrpGroup,
    verifier: &BigUint,
    rng: &mut impl CryptoRngCore,
) -> ServerEphemeral {
    let k = make_k(group);
    loop {
        let mut buf = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut buf[..]);
        let b = bytes_to_num(&buf[..]);
        let b_pub = (&k * verifier + group.g.modpow(&b, &group.n)) % &group.n;
        if !b_pub.is_zero() {
            return ServerEphemeral {
                secret: b,
                public: b_pub,
            };
        }
    }
}

/// Client premaster S = (B - k*g^x)^(a + u*x) mod N, or `None` when
/// B mod N == 0 (a suspicious server value).
pub(crate) fn client_premaster(
    group: &SrpGroup,
    b_pub: &BigUint,
    eph: &ClientEphemeral,
    username: &[u8],
    password: &[u8],
    salt: &[u8],
) -> Option<Zeroizing<Vec<u8>>> {
    let b_mod = b_pub % &group.n;
    if b_mod.is_zero() {
        return None;
    }
    let u = make_u(&eph.public, b_pub);
    let x = make_x(salt, username, password);
    let k = make_k(group);
    let kgx = (k * group.g.modpow(&x, &group.n)) % &group.n;
    let base = (b_mod + &group.n - kgx) % &group.n;
    let exp = &eph.secret + u * x;
    let s = base.modpow(&exp, &group.n);
    Some(Zeroizing::new(num_to_bytes(&s)))
}

/// Server premaster S = (A * v^u)^b mod N. A mod N == 0 yields an empty
/// premaster; the caller decides how to reject that (deferred alert).
pub(crate) fn server_premaster(
    group: &SrpGroup,
    verifier: &BigUint,
    a_pub: &BigUint,
    b_secret: &BigUint,
    u: &BigUint,
) -> Zeroizing<Vec<u8>> {
    let a_mod = a_pub % &group.n;
    let s = ((a_mod * verifier.modpow(u, &group.n)) % &group.n).modpow(b_secret, &group.n);
    Zeroizing::new(num_to_bytes(&s))
}
