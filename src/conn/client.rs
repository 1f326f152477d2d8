//! Client-side handshake state machine.
//!
//! Three modes share one machine: SRP (with or without server signatures),
//! certificate-based RSA key exchange, and the shared-key abbreviated
//! flow. Resumption and shared-key handshakes skip straight from
//! ServerHello to the server's ChangeCipherSpec.

use num_bigint::BigUint;
use rand_core::{OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::alert::{AlertDescription, AlertLevel};
use crate::checker::Checker;
use crate::crypto::{self, prf, srp};
use crate::error::{Error, Violation};
use crate::fault::Fault;
use crate::msgs::{
    handshake_type, CertificateChain, CertificateVerify, ClientHello, ClientKeyExchange,
    DecodeContext, Finished, HandshakePayload, ServerHello, ServerKeyExchange,
};
use crate::record::RecvEvent;
use crate::session::Session;
use crate::settings::Settings;
use crate::store::{CertificateParser, PrivateKey, PublicKey};
use crate::suite::{self, KeyExchange};
use crate::transport::Transport;
use crate::version::Version;

use super::{fail, on_failure, Common, HandshakeDone, Status};

enum ClientMode {
    Srp {
        username: Vec<u8>,
        password: Zeroizing<Vec<u8>>,
    },
    Cert {
        chain: Vec<Vec<u8>>,
        key: Option<Box<dyn PrivateKey>>,
    },
    SharedKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Start,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitHelloDone,
    AwaitChangeCipherSpec,
    AwaitFinished,
    Done,
}

pub(super) struct ClientHandshake {
    mode: ClientMode,
    settings: Settings,
    checker: Option<Box<dyn Checker>>,
    cert_parser: Option<Box<dyn CertificateParser>>,
    /// Session offered for resumption, or the constructed shared-key
    /// session.
    offered_session: Option<Session>,
    /// Session identifier as it went out in the hello.
    offered_session_id: Vec<u8>,
    offered_suites: Vec<u16>,
    state: ClientState,
    client_random: [u8; 32],
    server_random: [u8; 32],
    offered_version: Version,
    version: Version,
    cipher_suite: u16,
    session_id: Vec<u8>,
    server_chain: Vec<Vec<u8>>,
    server_key: Option<Box<dyn PublicKey>>,
    srp_params: Option<ServerKeyExchange>,
    cert_requested: bool,
    master: Zeroizing<Vec<u8>>,
    expected_verify: Vec<u8>,
    /// Abbreviated flow: the server sends ChangeCipherSpec right after its
    /// hello.
    abbreviated: bool,
}

impl ClientHandshake {
    fn new(mode: ClientMode, opts: ClientOptsParts) -> Result<Self, Error> {
        let settings = opts.settings.validate()?;
        Ok(ClientHandshake {
            mode,
            settings,
            checker: opts.checker,
            cert_parser: opts.cert_parser,
            offered_session: opts.session,
            offered_session_id: Vec::new(),
            offered_suites: Vec::new(),
            state: ClientState::Start,
            client_random: [0; 32],
            server_random: [0; 32],
            offered_version: Version::TLS10,
            version: Version::TLS10,
            cipher_suite: 0,
            session_id: Vec::new(),
            server_chain: Vec::new(),
            server_key: None,
            srp_params: None,
            cert_requested: false,
            master: Zeroizing::new(Vec::new()),
            expected_verify: Vec::new(),
            abbreviated: false,
        })
    }

    pub fn new_srp(
        username: &[u8],
        password: &[u8],
        opts: super::ClientOpts,
    ) -> Result<Self, Error> {
        if username.is_empty() || username.len() > 255 {
            return Err(Error::Config("SRP username must be 1 to 255 bytes".into()));
        }
        Self::new(
            ClientMode::Srp {
                username: username.to_vec(),
                password: Zeroizing::new(password.to_vec()),
            },
            ClientOptsParts::from(opts),
        )
    }

    pub fn new_cert(
        chain: Vec<Vec<u8>>,
        key: Option<Box<dyn PrivateKey>>,
        opts: super::ClientOpts,
    ) -> Result<Self, Error> {
        if key.is_some() && chain.is_empty() {
            return Err(Error::Config(
                "a client key needs a certificate chain".into(),
            ));
        }
        Self::new(ClientMode::Cert { chain, key }, ClientOptsParts::from(opts))
    }

    pub fn new_shared_key(
        username: &[u8],
        shared_key: &[u8],
        opts: super::ClientOpts,
    ) -> Result<Self, Error> {
        if opts.settings.max_version < Version::TLS10 {
            return Err(Error::Config("shared keys require TLS 1.0".into()));
        }
        let session = Session::for_shared_key(username, shared_key)?;
        let mut parts = ClientOptsParts::from(opts);
        parts.session = Some(session);
        Self::new(ClientMode::SharedKey, parts)
    }

    pub fn advance<T: Transport>(&mut self, c: &mut Common<T>) -> Result<Status, Error> {
        loop {
            if self.state == ClientState::Start {
                if let Err(v) = self.send_hello(c) {
                    return Err(fail(c, v));
                }
            }
            if c.record.wants_write() {
                match c.record.flush() {
                    Ok(true) => {}
                    Ok(false) => return Ok(Status::WantWrite),
                    Err(f) => return Err(on_failure(c, f)),
                }
            }
            if self.state == ClientState::Done {
                return Ok(Status::Complete);
            }
            let event = match c.record.recv_event() {
                Ok(Some(ev)) => ev,
                Ok(None) => return Ok(Status::WantRead),
                Err(f) => return Err(on_failure(c, f)),
            };
            match event {
                RecvEvent::Alert(level, description) => {
                    debug!(%level, %description, "alert during handshake");
                    return Err(Error::RemoteAlert { level, description });
                }
                RecvEvent::ChangeCipherSpec => {
                    if let Err(v) = self.on_ccs(c) {
                        return Err(fail(c, v));
                    }
                }
                RecvEvent::Handshake(typ, message) => {
                    if let Err(v) = self.on_handshake(c, typ, &message) {
                        return Err(fail(c, v));
                    }
                }
                RecvEvent::AppData(_) => {
                    return Err(fail(
                        c,
                        Violation::new(
                            AlertDescription::UnexpectedMessage,
                            "application data during handshake",
                        ),
                    ))
                }
            }
        }
    }

    fn send_hello<T: Transport>(&mut self, c: &mut Common<T>) -> Result<(), Violation> {
        self.offered_version = self.settings.max_version;
        OsRng.fill_bytes(&mut self.client_random);

        let mut srp_username = None;
        let suites = match &self.mode {
            ClientMode::Srp { username, .. } => {
                let mut name = username.clone();
                if c.fault == Some(Fault::BadUsername) {
                    name.push(b'!');
                }
                srp_username = Some(name);
                let mut suites = suite::srp_suites(&self.settings.cipher_names);
                suites.extend(suite::srp_rsa_suites(&self.settings.cipher_names));
                suites
            }
            ClientMode::Cert { .. } | ClientMode::SharedKey => {
                suite::rsa_suites(&self.settings.cipher_names)
            }
        };

        let mut session_id = self
            .offered_session
            .as_ref()
            .filter(|s| s.valid() || matches!(self.mode, ClientMode::SharedKey))
            .map(|s| s.id().to_vec())
            .unwrap_or_default();
        if c.fault == Some(Fault::BadIdentifier) && !session_id.is_empty() {
            session_id[0] = session_id[0].wrapping_add(1);
        }
        self.offered_session_id = session_id.clone();
        self.offered_suites = suites.clone();

        let hello = ClientHello {
            client_version: self.offered_version,
            random: self.client_random,
            session_id,
            cipher_suites: suites,
            compressions: vec![0],
            certificate_types: self
                .settings
                .certificate_types
                .iter()
                .map(|t| t.code())
                .collect(),
            srp_username,
        };
        c.record.version = self.offered_version;
        let ctx = self.ctx();
        c.send_handshake(&HandshakePayload::ClientHello(hello), &ctx);
        self.state = ClientState::AwaitServerHello;
        Ok(())
    }

    fn ctx(&self) -> DecodeContext {
        DecodeContext {
            version: self.version,
            key_exchange: suite::key_exchange(self.cipher_suite),
        }
    }

    fn on_handshake<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        typ: u8,
        message: &[u8],
    ) -> Result<(), Violation> {
        if typ == handshake_type::HELLO_REQUEST {
            return Ok(());
        }
        c.note_received(typ, message);
        let ctx = self.ctx();
        let payload = HandshakePayload::decode(typ, &message[4..], &ctx)
            .map_err(|_| Violation::new(AlertDescription::DecodeError, "malformed handshake message"))?;

        match (self.state, payload) {
            (ClientState::AwaitServerHello, HandshakePayload::ServerHello(sh)) => {
                self.on_server_hello(c, sh)
            }
            (ClientState::AwaitCertificate, HandshakePayload::Certificate(chain)) => {
                self.on_certificate(chain)
            }
            (ClientState::AwaitServerKeyExchange, HandshakePayload::ServerKeyExchange(ske)) => {
                self.on_server_key_exchange(ske)
            }
            (ClientState::AwaitHelloDone, HandshakePayload::CertificateRequest(_)) => {
                self.cert_requested = true;
                Ok(())
            }
            (ClientState::AwaitHelloDone, HandshakePayload::ServerHelloDone) => {
                self.on_hello_done(c)
            }
            (ClientState::AwaitFinished, HandshakePayload::Finished(fin)) => {
                self.on_finished(c, fin)
            }
            _ => Err(Violation::new(
                AlertDescription::UnexpectedMessage,
                "handshake message out of order",
            )),
        }
    }

    fn on_server_hello<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        sh: ServerHello,
    ) -> Result<(), Violation> {
        let v = sh.server_version;
        if !v.is_known() || v < self.settings.min_version || v > self.settings.max_version {
            return Err(Violation::new(
                AlertDescription::ProtocolVersion,
                "server version out of range",
            ));
        }
        if let Some(locked) = c.version_lock {
            if v != locked {
                return Err(Violation::new(
                    AlertDescription::ProtocolVersion,
                    "renegotiation changed the version",
                ));
            }
        }
        self.version = v;
        c.record.version = v;
        if sh.compression != 0 {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "server chose a compression method",
            ));
        }
        if !self.offered_suites.contains(&sh.cipher_suite) {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "server chose a suite that was not offered",
            ));
        }
        if sh.certificate_type != 0 {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "server chose an unsupported certificate type",
            ));
        }
        self.server_random = sh.random;
        self.cipher_suite = sh.cipher_suite;

        if matches!(self.mode, ClientMode::SharedKey) {
            if sh.session_id != self.offered_session_id {
                return Err(Violation::new(
                    AlertDescription::UserCanceled,
                    "server declined the shared-key session",
                ));
            }
            self.abbreviated = true;
        } else if !self.offered_session_id.is_empty() && sh.session_id == self.offered_session_id {
            let session = self
                .offered_session
                .as_ref()
                .ok_or(Violation::internal("no session to resume"))?;
            if sh.cipher_suite != session.cipher_suite() {
                return Err(Violation::new(
                    AlertDescription::IllegalParameter,
                    "server switched the resumed session's cipher suite",
                ));
            }
            self.abbreviated = true;
        }

        if self.abbreviated {
            let session = self
                .offered_session
                .as_ref()
                .ok_or(Violation::internal("no session to resume"))?;
            self.master = session.master_secret.clone();
            c.record
                .calc_pending(
                    self.cipher_suite,
                    &self.master,
                    &self.client_random,
                    &self.server_random,
                    true,
                )?;
            self.state = ClientState::AwaitChangeCipherSpec;
            return Ok(());
        }

        self.session_id = sh.session_id;
        self.state = match suite::key_exchange(self.cipher_suite) {
            Some(KeyExchange::Srp) => ClientState::AwaitServerKeyExchange,
            Some(KeyExchange::SrpRsa) | Some(KeyExchange::Rsa) => ClientState::AwaitCertificate,
            None => {
                return Err(Violation::new(
                    AlertDescription::IllegalParameter,
                    "server chose an unknown suite",
                ))
            }
        };
        Ok(())
    }

    fn on_certificate(&mut self, msg: CertificateChain) -> Result<(), Violation> {
        let parser = self
            .cert_parser
            .as_ref()
            .ok_or(Violation::internal("no certificate parser configured"))?;
        let key = parser.public_key(&msg.chain).ok_or(Violation::new(
            AlertDescription::BadCertificate,
            "unparseable server certificate",
        ))?;
        let bits = key.bit_len();
        if bits < self.settings.min_key_size {
            return Err(Violation::new(
                AlertDescription::HandshakeFailure,
                "server key too small",
            ));
        }
        if bits > self.settings.max_key_size {
            return Err(Violation::new(
                AlertDescription::HandshakeFailure,
                "server key too large",
            ));
        }
        self.server_chain = msg.chain;
        self.server_key = Some(key);
        self.state = match suite::key_exchange(self.cipher_suite) {
            Some(KeyExchange::SrpRsa) => ClientState::AwaitServerKeyExchange,
            _ => ClientState::AwaitHelloDone,
        };
        Ok(())
    }

    fn on_server_key_exchange(&mut self, ske: ServerKeyExchange) -> Result<(), Violation> {
        let n = srp::bytes_to_num(&ske.srp_n);
        let g = srp::bytes_to_num(&ske.srp_g);
        if !srp::known_group(&n, &g) {
            return Err(Violation::new(
                AlertDescription::UntrustedSrpParameters,
                "unrecognized SRP group",
            ));
        }
        let bits = n.bits() as usize;
        if bits < self.settings.min_key_size || bits > self.settings.max_key_size {
            return Err(Violation::new(
                AlertDescription::UntrustedSrpParameters,
                "SRP group size out of bounds",
            ));
        }
        let b = srp::bytes_to_num(&ske.srp_b);
        if (&b % &n) == BigUint::from(0u8) {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "suspicious B value",
            ));
        }
        if suite::key_exchange(self.cipher_suite) == Some(KeyExchange::SrpRsa) {
            if ske.signature.is_empty() {
                return Err(Violation::new(
                    AlertDescription::IllegalParameter,
                    "missing parameter signature",
                ));
            }
            let key = self
                .server_key
                .as_ref()
                .ok_or(Violation::internal("no server key for signature check"))?;
            let digest = ske.digest(&self.client_random, &self.server_random);
            if !key.verify(&ske.signature, &digest) {
                return Err(Violation::new(
                    AlertDescription::DecryptError,
                    "bad parameter signature",
                ));
            }
        }
        self.srp_params = Some(ske);
        self.state = ClientState::AwaitHelloDone;
        Ok(())
    }

    fn on_hello_done<T: Transport>(&mut self, c: &mut Common<T>) -> Result<(), Violation> {
        let ctx = self.ctx();

        if self.cert_requested {
            let chain = match &self.mode {
                ClientMode::Cert { chain, .. } => chain.clone(),
                _ => Vec::new(),
            };
            if chain.is_empty() && self.version == Version::SSL30 {
                // SSL 3.0 declines with a warning alert instead of an
                // empty Certificate
                c.send_alert(AlertLevel::Warning, AlertDescription::NoCertificate);
            } else {
                c.send_handshake(
                    &HandshakePayload::Certificate(CertificateChain { chain }),
                    &ctx,
                );
            }
        }

        let premaster = match suite::key_exchange(self.cipher_suite) {
            Some(KeyExchange::Srp) | Some(KeyExchange::SrpRsa) => self.srp_exchange(c, &ctx)?,
            Some(KeyExchange::Rsa) => self.rsa_exchange(c, &ctx)?,
            None => return Err(Violation::internal("no key exchange selected")),
        };
        self.master = prf::master_secret(
            self.version,
            &premaster,
            &self.client_random,
            &self.server_random,
        );

        if self.cert_requested {
            if let ClientMode::Cert {
                chain,
                key: Some(key),
            } = &self.mode
            {
                if !chain.is_empty() {
                    let digest = if self.version.is_tls() {
                        c.transcript.digest36().to_vec()
                    } else {
                        prf::ssl_handshake_hash(&self.master, &c.transcript, b"")
                    };
                    let mut signature = key.sign(&digest);
                    if c.fault == Some(Fault::BadVerifyMessage) && !signature.is_empty() {
                        signature[0] = signature[0].wrapping_add(1);
                    }
                    c.send_handshake(
                        &HandshakePayload::CertificateVerify(CertificateVerify { signature }),
                        &ctx,
                    );
                }
            }
        }

        c.record.calc_pending(
            self.cipher_suite,
            &self.master,
            &self.client_random,
            &self.server_random,
            true,
        )?;
        c.send_ccs();
        c.record.promote_write()?;
        self.send_finished(c, &ctx);
        self.state = ClientState::AwaitChangeCipherSpec;
        Ok(())
    }

    fn srp_exchange<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        ctx: &DecodeContext,
    ) -> Result<Zeroizing<Vec<u8>>, Violation> {
        let ClientMode::Srp { username, password } = &self.mode else {
            return Err(Violation::internal("SRP suite without SRP credentials"));
        };
        let ske = self
            .srp_params
            .as_ref()
            .ok_or(Violation::internal("missing SRP parameters"))?;
        let group = srp::SrpGroup {
            n: srp::bytes_to_num(&ske.srp_n),
            g: srp::bytes_to_num(&ske.srp_g),
        };

        let (a_wire, premaster) = if c.fault == Some(Fault::BadA) {
            // A = N makes A mod N zero; both sides then derive keys from
            // an empty premaster and the server objects after Finished
            (ske.srp_n.clone(), Zeroizing::new(Vec::new()))
        } else {
            let mut pw = password.clone();
            if c.fault == Some(Fault::BadPassword) {
                if let Some(b) = pw.first_mut() {
                    *b = b.wrapping_add(1);
                }
            }
            let eph = srp::client_ephemeral(&group, &mut OsRng);
            let b_pub = srp::bytes_to_num(&ske.srp_b);
            let premaster =
                srp::client_premaster(&group, &b_pub, &eph, username, &pw, &ske.srp_salt)
                    .ok_or(Violation::new(
                        AlertDescription::IllegalParameter,
                        "suspicious B value",
                    ))?;
            (srp::num_to_bytes(&eph.public), premaster)
        };
        c.send_handshake(
            &HandshakePayload::ClientKeyExchange(ClientKeyExchange::Srp { a: a_wire }),
            ctx,
        );
        Ok(premaster)
    }

    fn rsa_exchange<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        ctx: &DecodeContext,
    ) -> Result<Zeroizing<Vec<u8>>, Violation> {
        let key = self
            .server_key
            .as_ref()
            .ok_or(Violation::internal("no server key for RSA exchange"))?;
        let len = if c.fault == Some(Fault::ShortPremasterSecret) {
            47
        } else {
            48
        };
        let mut premaster = Zeroizing::new(vec![0u8; len]);
        OsRng.fill_bytes(&mut premaster[..]);
        premaster[0] = self.offered_version.major;
        premaster[1] = self.offered_version.minor;
        let mut encrypted = key
            .encrypt(&premaster)
            .ok_or(Violation::internal("RSA encryption failed"))?;
        if c.fault == Some(Fault::BadPremasterPadding) && !encrypted.is_empty() {
            encrypted[0] = encrypted[0].wrapping_add(1);
        }
        c.send_handshake(
            &HandshakePayload::ClientKeyExchange(ClientKeyExchange::Rsa { encrypted }),
            ctx,
        );
        Ok(premaster)
    }

    fn send_finished<T: Transport>(&mut self, c: &mut Common<T>, ctx: &DecodeContext) {
        let mut verify_data =
            prf::finished_verify(self.version, &self.master, &c.transcript, true);
        if c.fault == Some(Fault::BadFinished) {
            verify_data[0] = verify_data[0].wrapping_add(1);
        }
        c.send_handshake(&HandshakePayload::Finished(Finished { verify_data }), ctx);
    }

    fn on_ccs<T: Transport>(&mut self, c: &mut Common<T>) -> Result<(), Violation> {
        if self.state != ClientState::AwaitChangeCipherSpec {
            return Err(Violation::new(
                AlertDescription::UnexpectedMessage,
                "unexpected ChangeCipherSpec",
            ));
        }
        c.record.promote_read()?;
        self.expected_verify =
            prf::finished_verify(self.version, &self.master, &c.transcript, false);
        self.state = ClientState::AwaitFinished;
        Ok(())
    }

    fn on_finished<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        fin: Finished,
    ) -> Result<(), Violation> {
        if !crypto::ct_eq(&self.expected_verify, &fin.verify_data) {
            return Err(Violation::new(
                AlertDescription::DecryptError,
                "bad Finished value",
            ));
        }
        if self.abbreviated {
            let ctx = self.ctx();
            c.send_ccs();
            c.record.promote_write()?;
            self.send_finished(c, &ctx);
        }
        self.state = ClientState::Done;
        Ok(())
    }

    pub fn into_result(self) -> HandshakeDone {
        let resumed = self.abbreviated && !matches!(self.mode, ClientMode::SharedKey);
        let session = if self.abbreviated {
            let mut session = self
                .offered_session
                .unwrap_or_else(|| Session {
                    session_id: Vec::new(),
                    cipher_suite: 0,
                    master_secret: Zeroizing::new(Vec::new()),
                    peer_chain: Vec::new(),
                    srp_username: None,
                    shared_key_username: None,
                    resumable: false,
                });
            if matches!(self.mode, ClientMode::SharedKey) {
                session.cipher_suite = self.cipher_suite;
            }
            session
        } else {
            let srp_username = match &self.mode {
                ClientMode::Srp { username, .. } => Some(username.clone()),
                _ => None,
            };
            Session {
                resumable: !self.session_id.is_empty(),
                session_id: self.session_id,
                cipher_suite: self.cipher_suite,
                master_secret: self.master.clone(),
                peer_chain: self.server_chain,
                srp_username,
                shared_key_username: None,
            }
        };
        HandshakeDone {
            session,
            resumed,
            checker: self.checker,
        }
    }
}

/// The pieces of [`super::ClientOpts`] a handshake keeps.
struct ClientOptsParts {
    session: Option<Session>,
    settings: Settings,
    checker: Option<Box<dyn Checker>>,
    cert_parser: Option<Box<dyn CertificateParser>>,
}

impl From<super::ClientOpts> for ClientOptsParts {
    fn from(opts: super::ClientOpts) -> Self {
        ClientOptsParts {
            session: opts.session,
            settings: opts.settings,
            checker: opts.checker,
            cert_parser: opts.cert_parser,
        }
    }
}
