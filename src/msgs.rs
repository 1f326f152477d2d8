//! Handshake message encoding and decoding.
//!
//! Every message carries a four-byte header (type plus 24-bit length) that
//! is included in the handshake transcript. Decoding of version-dependent
//! bodies (ClientKeyExchange, ServerKeyExchange) takes a [`DecodeContext`]
//! describing what was negotiated so far.

use crate::codec::{DecodeError, Reader, Writer};
use crate::suite::KeyExchange;
use crate::version::Version;

pub(crate) mod content_type {
    pub const CHANGE_CIPHER_SPEC: u8 = 20;
    pub const ALERT: u8 = 21;
    pub const HANDSHAKE: u8 = 22;
    pub const APPLICATION_DATA: u8 = 23;
}

pub(crate) mod handshake_type {
    pub const HELLO_REQUEST: u8 = 0;
    pub const CLIENT_HELLO: u8 = 1;
    pub const SERVER_HELLO: u8 = 2;
    pub const CERTIFICATE: u8 = 11;
    pub const SERVER_KEY_EXCHANGE: u8 = 12;
    pub const CERTIFICATE_REQUEST: u8 = 13;
    pub const SERVER_HELLO_DONE: u8 = 14;
    pub const CERTIFICATE_VERIFY: u8 = 15;
    pub const CLIENT_KEY_EXCHANGE: u8 = 16;
    pub const FINISHED: u8 = 20;
}

const EXT_SRP: u16 = 6;
const EXT_CERT_TYPE: u16 = 7;

const NULL_COMPRESSION: u8 = 0;

/// Negotiation state a decoder needs to interpret a message body.
#[derive(Clone, Copy)]
pub(crate) struct DecodeContext {
    pub version: Version,
    pub key_exchange: Option<KeyExchange>,
}

#[derive(Debug, Clone)]
pub(crate) struct ClientHello {
    pub client_version: Version,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compressions: Vec<u8>,
    /// Raw certificate-type codes from the cert_type extension; `[0]`
    /// (X.509 only) when the extension is absent.
    pub certificate_types: Vec<u8>,
    pub srp_username: Option<Vec<u8>>,
}

impl ClientHello {
    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(self.client_version.major);
        w.u8(self.client_version.minor);
        w.bytes(&self.random);
        w.vec8(&self.session_id);
        let mut suites = Writer::new();
        for s in &self.cipher_suites {
            suites.u16(*s);
        }
        w.vec16(&suites.into_bytes());
        w.vec8(&self.compressions);

        let default_types = self.certificate_types == [0];
        if self.srp_username.is_some() || !default_types {
            let mut exts = Writer::new();
            if let Some(name) = &self.srp_username {
                exts.u16(EXT_SRP);
                let mut data = Writer::new();
                data.vec8(name);
                exts.vec16(&data.into_bytes());
            }
            if !default_types {
                exts.u16(EXT_CERT_TYPE);
                let mut data = Writer::new();
                data.vec8(&self.certificate_types);
                exts.vec16(&data.into_bytes());
            }
            w.vec16(&exts.into_bytes());
        }
        w.into_bytes()
    }

    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let client_version = Version::new(r.u8()?, r.u8()?);
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?.to_vec();
        let suite_bytes = r.vec16()?;
        if suite_bytes.len() % 2 != 0 {
            return Err(DecodeError::BadValue);
        }
        let cipher_suites = suite_bytes
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        let compressions = r.vec8()?.to_vec();

        let mut certificate_types = vec![0u8];
        let mut srp_username = None;
        if r.remaining() > 0 {
            let mut exts = Reader::new(r.vec16()?);
            while exts.remaining() > 0 {
                let ext_type = exts.u16()?;
                let mut data = Reader::new(exts.vec16()?);
                match ext_type {
                    EXT_SRP => {
                        srp_username = Some(data.vec8()?.to_vec());
                        data.finish()?;
                    }
                    EXT_CERT_TYPE => {
                        certificate_types = data.vec8()?.to_vec();
                        data.finish()?;
                    }
                    _ => {}
                }
            }
        }
        r.finish()?;
        Ok(ClientHello {
            client_version,
            random,
            session_id,
            cipher_suites,
            compressions,
            certificate_types,
            srp_username,
        })
    }

    pub fn offers_null_compression(&self) -> bool {
        self.compressions.contains(&NULL_COMPRESSION)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHello {
    pub server_version: Version,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression: u8,
    /// Raw certificate-type code from the cert_type extension; 0 (X.509)
    /// when absent.
    pub certificate_type: u8,
}

impl ServerHello {
    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u8(self.server_version.major);
        w.u8(self.server_version.minor);
        w.bytes(&self.random);
        w.vec8(&self.session_id);
        w.u16(self.cipher_suite);
        w.u8(self.compression);
        if self.certificate_type != 0 {
            let mut exts = Writer::new();
            exts.u16(EXT_CERT_TYPE);
            exts.vec16(&[self.certificate_type]);
            w.vec16(&exts.into_bytes());
        }
        w.into_bytes()
    }

    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let server_version = Version::new(r.u8()?, r.u8()?);
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let session_id = r.vec8()?.to_vec();
        let cipher_suite = r.u16()?;
        let compression = r.u8()?;
        let mut certificate_type = 0u8;
        if r.remaining() > 0 {
            let mut exts = Reader::new(r.vec16()?);
            while exts.remaining() > 0 {
                let ext_type = exts.u16()?;
                let data = exts.vec16()?;
                if ext_type == EXT_CERT_TYPE {
                    if data.len() != 1 {
                        return Err(DecodeError::BadValue);
                    }
                    certificate_type = data[0];
                }
            }
        }
        r.finish()?;
        Ok(ServerHello {
            server_version,
            random,
            session_id,
            cipher_suite,
            compression,
            certificate_type,
        })
    }
}

/// A Certificate message: DER certificates, end-entity first.
#[derive(Debug, Clone, Default)]
pub(crate) struct CertificateChain {
    pub chain: Vec<Vec<u8>>,
}

impl CertificateChain {
    fn encode_body(&self) -> Vec<u8> {
        let mut inner = Writer::new();
        for cert in &self.chain {
            inner.vec24(cert);
        }
        let mut w = Writer::new();
        w.vec24(&inner.into_bytes());
        w.into_bytes()
    }

    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let mut list = Reader::new(r.vec24()?);
        let mut chain = Vec::new();
        while list.remaining() > 0 {
            chain.push(list.vec24()?.to_vec());
        }
        r.finish()?;
        Ok(CertificateChain { chain })
    }
}

/// SRP parameters, optionally signed for the SRP+RSA suites.
#[derive(Debug, Clone)]
pub(crate) struct ServerKeyExchange {
    pub srp_n: Vec<u8>,
    pub srp_g: Vec<u8>,
    pub srp_salt: Vec<u8>,
    pub srp_b: Vec<u8>,
    pub signature: Vec<u8>,
}

impl ServerKeyExchange {
    /// The parameter block that gets signed and hashed.
    pub fn params_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.vec16(&self.srp_n);
        w.vec16(&self.srp_g);
        w.vec8(&self.srp_salt);
        w.vec16(&self.srp_b);
        w.into_bytes()
    }

    /// MD5 || SHA1 over client random, server random, and the parameters;
    /// the 36-byte digest the RSA signature covers.
    pub fn digest(&self, client_random: &[u8; 32], server_random: &[u8; 32]) -> [u8; 36] {
        use digest::Digest;
        let params = self.params_bytes();
        let mut md5 = md5::Md5::new();
        md5.update(client_random);
        md5.update(server_random);
        md5.update(&params);
        let mut sha1 = sha1::Sha1::new();
        sha1.update(client_random);
        sha1.update(server_random);
        sha1.update(&params);
        let mut out = [0u8; 36];
        out[..16].copy_from_slice(&md5.finalize());
        out[16..].copy_from_slice(&sha1.finalize());
        out
    }

    fn encode_body(&self, with_signature: bool) -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(&self.params_bytes());
        if with_signature {
            w.vec16(&self.signature);
        }
        w.into_bytes()
    }

    fn decode(body: &[u8], with_signature: bool) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let srp_n = r.vec16()?.to_vec();
        let srp_g = r.vec16()?.to_vec();
        let srp_salt = r.vec8()?.to_vec();
        let srp_b = r.vec16()?.to_vec();
        let signature = if with_signature {
            r.vec16()?.to_vec()
        } else {
            Vec::new()
        };
        r.finish()?;
        Ok(ServerKeyExchange {
            srp_n,
            srp_g,
            srp_salt,
            srp_b,
            signature,
        })
    }
}

const CLIENT_CERTIFICATE_TYPE_RSA_SIGN: u8 = 1;

/// A CertificateRequest naming RSA signing certificates and no CAs.
#[derive(Debug, Clone)]
pub(crate) struct CertificateRequest {
    pub certificate_types: Vec<u8>,
}

impl CertificateRequest {
    pub fn rsa_sign() -> Self {
        CertificateRequest {
            certificate_types: vec![CLIENT_CERTIFICATE_TYPE_RSA_SIGN],
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.vec8(&self.certificate_types);
        w.u16(0);
        w.into_bytes()
    }

    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let certificate_types = r.vec8()?.to_vec();
        // distinguished names, accepted and ignored
        r.vec16()?;
        r.finish()?;
        Ok(CertificateRequest { certificate_types })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CertificateVerify {
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.vec16(&self.signature);
        w.into_bytes()
    }

    fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let signature = r.vec16()?.to_vec();
        r.finish()?;
        Ok(CertificateVerify { signature })
    }
}

/// The ClientKeyExchange body depends on the key-exchange family, and for
/// RSA also on the version: SSL 3.0 omits the length prefix.
#[derive(Debug, Clone)]
pub(crate) enum ClientKeyExchange {
    Srp { a: Vec<u8> },
    Rsa { encrypted: Vec<u8> },
}

impl ClientKeyExchange {
    fn encode_body(&self, version: Version) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            ClientKeyExchange::Srp { a } => w.vec16(a),
            ClientKeyExchange::Rsa { encrypted } => {
                if version.is_tls() {
                    w.vec16(encrypted);
                } else {
                    w.bytes(encrypted);
                }
            }
        }
        w.into_bytes()
    }

    fn decode(body: &[u8], ctx: &DecodeContext) -> Result<Self, DecodeError> {
        let mut r = Reader::new(body);
        let msg = match ctx.key_exchange {
            Some(KeyExchange::Srp) | Some(KeyExchange::SrpRsa) => ClientKeyExchange::Srp {
                a: r.vec16()?.to_vec(),
            },
            Some(KeyExchange::Rsa) => {
                let encrypted = if ctx.version.is_tls() {
                    r.vec16()?.to_vec()
                } else {
                    r.take(r.remaining())?.to_vec()
                };
                ClientKeyExchange::Rsa { encrypted }
            }
            None => return Err(DecodeError::BadValue),
        };
        r.finish()?;
        Ok(msg)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Finished {
    pub verify_data: Vec<u8>,
}

/// A decoded handshake message.
#[derive(Debug, Clone)]
pub(crate) enum HandshakePayload {
    HelloRequest,
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(CertificateChain),
    ServerKeyExchange(ServerKeyExchange),
    CertificateRequest(CertificateRequest),
    ServerHelloDone,
    CertificateVerify(CertificateVerify),
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl HandshakePayload {
    pub fn typ(&self) -> u8 {
        use handshake_type::*;
        match self {
            HandshakePayload::HelloRequest => HELLO_REQUEST,
            HandshakePayload::ClientHello(_) => CLIENT_HELLO,
            HandshakePayload::ServerHello(_) => SERVER_HELLO,
            HandshakePayload::Certificate(_) => CERTIFICATE,
            HandshakePayload::ServerKeyExchange(_) => SERVER_KEY_EXCHANGE,
            HandshakePayload::CertificateRequest(_) => CERTIFICATE_REQUEST,
            HandshakePayload::ServerHelloDone => SERVER_HELLO_DONE,
            HandshakePayload::CertificateVerify(_) => CERTIFICATE_VERIFY,
            HandshakePayload::ClientKeyExchange(_) => CLIENT_KEY_EXCHANGE,
            HandshakePayload::Finished(_) => FINISHED,
        }
    }

    fn encode_body(&self, ctx: &DecodeContext) -> Vec<u8> {
        match self {
            HandshakePayload::HelloRequest | HandshakePayload::ServerHelloDone => Vec::new(),
            HandshakePayload::ClientHello(m) => m.encode_body(),
            HandshakePayload::ServerHello(m) => m.encode_body(),
            HandshakePayload::Certificate(m) => m.encode_body(),
            HandshakePayload::ServerKeyExchange(m) => {
                m.encode_body(ctx.key_exchange == Some(KeyExchange::SrpRsa))
            }
            HandshakePayload::CertificateRequest(m) => m.encode_body(),
            HandshakePayload::CertificateVerify(m) => m.encode_body(),
            HandshakePayload::ClientKeyExchange(m) => m.encode_body(ctx.version),
            HandshakePayload::Finished(m) => m.verify_data.clone(),
        }
    }

    /// The full message with its four-byte header, as fed to both the
    /// record layer and the transcript.
    pub fn encode(&self, ctx: &DecodeContext) -> Vec<u8> {
        let body = self.encode_body(ctx);
        let mut w = Writer::new();
        w.u8(self.typ());
        w.vec24(&body);
        w.into_bytes()
    }

    pub fn decode(typ: u8, body: &[u8], ctx: &DecodeContext) -> Result<Self, DecodeError> {
        use handshake_type::*;
        Ok(match typ {
            HELLO_REQUEST => {
                if !body.is_empty() {
                    return Err(DecodeError::TrailingBytes);
                }
                HandshakePayload::HelloRequest
            }
            CLIENT_HELLO => HandshakePayload::ClientHello(ClientHello::decode(body)?),
            SERVER_HELLO => HandshakePayload::ServerHello(ServerHello::decode(body)?),
            CERTIFICATE => HandshakePayload::Certificate(CertificateChain::decode(body)?),
            SERVER_KEY_EXCHANGE => HandshakePayload::ServerKeyExchange(ServerKeyExchange::decode(
                body,
                ctx.key_exchange == Some(KeyExchange::SrpRsa),
            )?),
            CERTIFICATE_REQUEST => {
                HandshakePayload::CertificateRequest(CertificateRequest::decode(body)?)
            }
            SERVER_HELLO_DONE => {
                if !body.is_empty() {
                    return Err(DecodeError::TrailingBytes);
                }
                HandshakePayload::ServerHelloDone
            }
            CERTIFICATE_VERIFY => {
                HandshakePayload::CertificateVerify(CertificateVerify::decode(body)?)
            }
            CLIENT_KEY_EXCHANGE => {
                HandshakePayload::ClientKeyExchange(ClientKeyExchange::decode(body, ctx)?)
            }
            FINISHED => HandshakePayload::Finished(Finished {
                verify_data: body.to_vec(),
            }),
            _ => return Err(DecodeError::BadValue),
        })
    }
}
