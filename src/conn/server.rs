//! Server-side handshake state machine.
//!
//! Credential selection happens at the client hello: a shared-key session
//! identifier is tried first, then the session cache, then a full handshake
//! with whichever families the configured credentials support. Several
//! client failures are deliberately deferred until after the client's
//! Finished verifies, so an attacker probing with bad values learns nothing
//! before proving knowledge of the keys.

use num_bigint::BigUint;
use num_traits::Zero;
use rand_core::{OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::alert::{AlertDescription, AlertLevel};
use crate::checker::Checker;
use crate::crypto::{self, prf, srp};
use crate::error::{Error, Violation};
use crate::fault::Fault;
use crate::msgs::{
    CertificateChain, CertificateRequest, CertificateVerify, ClientHello, ClientKeyExchange,
    DecodeContext, Finished, HandshakePayload, ServerHello, ServerKeyExchange,
};
use crate::record::RecvEvent;
use crate::session::Session;
use crate::store::PublicKey;
use crate::suite::{self, KeyExchange};
use crate::transport::Transport;
use crate::version::Version;

use super::{fail, on_failure, Common, HandshakeDone, ServerConfig, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    AwaitClientHello,
    AwaitSecondClientHello,
    AwaitClientCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitChangeCipherSpec,
    AwaitFinished,
    Done,
}

struct SrpState {
    group: srp::SrpGroup,
    verifier: BigUint,
    b_secret: BigUint,
    b_pub: BigUint,
}

pub(super) struct ServerHandshake {
    config: ServerConfig,
    state: ServerState,
    client_random: [u8; 32],
    server_random: [u8; 32],
    client_hello_version: Version,
    version: Version,
    cipher_suite: u16,
    session_id: Vec<u8>,
    client_chain: Vec<Vec<u8>>,
    client_key: Option<Box<dyn PublicKey>>,
    srp: Option<SrpState>,
    srp_salt: Vec<u8>,
    srp_username: Option<Vec<u8>>,
    shared_key_username: Option<Vec<u8>>,
    master: Zeroizing<Vec<u8>>,
    expected_verify: Vec<u8>,
    cert_verify_digest: Option<Vec<u8>>,
    /// Rejection noticed early but only raised once the client's Finished
    /// has verified.
    post_finished_error: Option<Violation>,
    abbreviated: bool,
    resumed_session: Option<Session>,
    result_session: Option<Session>,
    second_hello: bool,
    cert_requested: bool,
    expect_cert_verify: bool,
}

impl ServerHandshake {
    pub fn new(config: ServerConfig) -> Result<Self, Error> {
        config.settings.validate()?;
        let has_cert = !config.chain.is_empty() && config.key.is_some();
        if config.chain.is_empty() != config.key.is_none() {
            return Err(Error::Config(
                "certificate chain and private key must be set together".into(),
            ));
        }
        if !has_cert && config.verifier_store.is_none() && config.shared_key_store.is_none() {
            return Err(Error::Config("no server credentials configured".into()));
        }
        Ok(ServerHandshake {
            config,
            state: ServerState::AwaitClientHello,
            client_random: [0; 32],
            server_random: [0; 32],
            client_hello_version: Version::TLS10,
            version: Version::TLS10,
            cipher_suite: 0,
            session_id: Vec::new(),
            client_chain: Vec::new(),
            client_key: None,
            srp: None,
            srp_salt: Vec::new(),
            srp_username: None,
            shared_key_username: None,
            master: Zeroizing::new(Vec::new()),
            expected_verify: Vec::new(),
            cert_verify_digest: None,
            post_finished_error: None,
            abbreviated: false,
            resumed_session: None,
            result_session: None,
            second_hello: false,
            cert_requested: false,
            expect_cert_verify: false,
        })
    }

    pub fn advance<T: Transport>(&mut self, c: &mut Common<T>) -> Result<Status, Error> {
        loop {
            if c.record.wants_write() {
                match c.record.flush() {
                    Ok(true) => {}
                    Ok(false) => return Ok(Status::WantWrite),
                    Err(f) => return Err(on_failure(c, f)),
                }
            }
            if self.state == ServerState::Done {
                return Ok(Status::Complete);
            }
            let event = match c.record.recv_event() {
                Ok(Some(ev)) => ev,
                Ok(None) => return Ok(Status::WantRead),
                Err(f) => return Err(on_failure(c, f)),
            };
            match event {
                RecvEvent::Alert(AlertLevel::Warning, AlertDescription::NoCertificate)
                    if self.state == ServerState::AwaitClientCertificate
                        && self.version == Version::SSL30 =>
                {
                    // SSL 3.0 clients decline a certificate request this way
                    self.state = ServerState::AwaitClientKeyExchange;
                }
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
        c.note_received(typ, message);
        let ctx = self.ctx();
        let payload = HandshakePayload::decode(typ, &message[4..], &ctx)
            .map_err(|_| Violation::new(AlertDescription::DecodeError, "malformed handshake message"))?;

        match (self.state, payload) {
            (
                ServerState::AwaitClientHello | ServerState::AwaitSecondClientHello,
                HandshakePayload::ClientHello(ch),
            ) => self.on_client_hello(c, ch),
            (ServerState::AwaitClientCertificate, HandshakePayload::Certificate(msg)) => {
                self.on_client_certificate(msg)
            }
            (ServerState::AwaitClientKeyExchange, HandshakePayload::ClientKeyExchange(cke)) => {
                self.on_client_key_exchange(c, cke)
            }
            (ServerState::AwaitCertificateVerify, HandshakePayload::CertificateVerify(cv)) => {
                self.on_certificate_verify(cv)
            }
            (ServerState::AwaitFinished, HandshakePayload::Finished(fin)) => {
                self.on_finished(c, fin)
            }
            _ => Err(Violation::new(
                AlertDescription::UnexpectedMessage,
                "handshake message out of order",
            )),
        }
    }

    fn on_client_hello<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        ch: ClientHello,
    ) -> Result<(), Violation> {
        if ch.client_version < self.config.settings.min_version {
            return Err(Violation::new(
                AlertDescription::ProtocolVersion,
                "client version too old",
            ));
        }
        let version = ch.client_version.min(self.config.settings.max_version);
        if !version.is_known() {
            return Err(Violation::new(
                AlertDescription::ProtocolVersion,
                "no version in common",
            ));
        }
        if let Some(locked) = c.version_lock {
            if version != locked {
                return Err(Violation::new(
                    AlertDescription::ProtocolVersion,
                    "renegotiation changed the version",
                ));
            }
        }
        self.client_hello_version = ch.client_version;
        self.version = version;
        c.record.version = version;

        if !ch.offers_null_compression() {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "null compression not offered",
            ));
        }
        if !ch.certificate_types.contains(&0) {
            return Err(Violation::new(
                AlertDescription::IllegalParameter,
                "no certificate type in common",
            ));
        }
        self.client_random = ch.random;
        OsRng.fill_bytes(&mut self.server_random);

        if let Some(name) = &ch.srp_username {
            c.alleged_srp_username = Some(name.clone());
        }

        // shared-key identifiers are checked before the session cache
        let mut shared_hit = None;
        if let Some(store) = &self.config.shared_key_store {
            if self.version >= Version::TLS10 && ch.session_id.len() == 16 {
                let end = ch
                    .session_id
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |p| p + 1);
                let username = &ch.session_id[..end];
                if let Some(key) = store.lookup(username) {
                    c.alleged_shared_key_username = Some(username.to_vec());
                    let mut session = Session::for_shared_key(username, &key)
                        .map_err(|_| Violation::internal("bad stored shared key"))?;
                    let suite = self
                        .pick_suite(&suite::rsa_suites(&self.config.settings.cipher_names), &ch)?;
                    session.cipher_suite = suite;
                    shared_hit = Some((session, username.to_vec()));
                }
            }
        }
        if let Some((session, username)) = shared_hit {
            self.shared_key_username = Some(username);
            self.resumed_session = Some(session);
            return self.start_abbreviated(c, ch.session_id.clone());
        }

        let mut cached = None;
        if let Some(cache) = &self.config.session_cache {
            if !ch.session_id.is_empty() {
                if let Some(session) = cache.get(&ch.session_id) {
                    if session.valid() {
                        if !ch.cipher_suites.contains(&session.cipher_suite()) {
                            return Err(Violation::new(
                                AlertDescription::HandshakeFailure,
                                "resumed session's cipher suite no longer offered",
                            ));
                        }
                        if let Some(name) = &ch.srp_username {
                            if session.srp_username() != Some(name.as_slice()) {
                                return Err(Violation::new(
                                    AlertDescription::HandshakeFailure,
                                    "resumed session belongs to a different SRP identity",
                                ));
                            }
                        }
                        cached = Some(session);
                    }
                }
            }
        }
        if let Some(session) = cached {
            self.resumed_session = Some(session);
            return self.start_abbreviated(c, ch.session_id.clone());
        }

        self.select_and_begin(c, ch)
    }

    fn pick_suite(&self, privileged: &[u16], ch: &ClientHello) -> Result<u16, Violation> {
        privileged
            .iter()
            .copied()
            .find(|s| ch.cipher_suites.contains(s))
            .ok_or(Violation::new(
                AlertDescription::HandshakeFailure,
                "no cipher suites in common",
            ))
    }

    fn select_and_begin<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        ch: ClientHello,
    ) -> Result<(), Violation> {
        let ciphers = self.config.settings.cipher_names.clone();
        let has_cert = !self.config.chain.is_empty() && self.config.key.is_some();
        let mut privileged = Vec::new();

        match (&ch.srp_username, &self.config.verifier_store) {
            (Some(username), Some(store)) => {
                let entry = store.lookup(username).ok_or(Violation::new(
                    AlertDescription::UnknownSrpUsername,
                    "unknown SRP username",
                ))?;
                self.srp_username = Some(username.clone());
                let eph = srp::server_ephemeral(&entry.group, &entry.verifier, &mut OsRng);
                self.srp = Some(SrpState {
                    group: entry.group.clone(),
                    verifier: entry.verifier,
                    b_secret: eph.secret,
                    b_pub: eph.public,
                });
                self.srp_salt = entry.salt;
                if has_cert {
                    privileged.extend(suite::srp_rsa_suites(&ciphers));
                }
                privileged.extend(suite::srp_suites(&ciphers));
            }
            (None, Some(_)) => {
                let offered_srp = ch.cipher_suites.iter().any(|&s| suite::in_srp_families(s));
                if offered_srp && !self.second_hello {
                    // ask for an identity and restrict the retry to SRP
                    debug!("client offered SRP without an identity, requesting one");
                    c.send_alert(AlertLevel::Warning, AlertDescription::MissingSrpUsername);
                    self.second_hello = true;
                    self.state = ServerState::AwaitSecondClientHello;
                    return Ok(());
                }
                if self.second_hello {
                    return Err(Violation::new(
                        AlertDescription::IllegalParameter,
                        "second hello still lacks an SRP identity",
                    ));
                }
            }
            _ => {
                if self.second_hello {
                    return Err(Violation::new(
                        AlertDescription::IllegalParameter,
                        "second hello still lacks an SRP identity",
                    ));
                }
            }
        }

        if has_cert && !self.second_hello && self.srp.is_none() {
            privileged.extend(suite::rsa_suites(&ciphers));
        }
        if privileged.is_empty() {
            return Err(Violation::new(
                AlertDescription::HandshakeFailure,
                "no usable credentials for the offered suites",
            ));
        }
        self.cipher_suite = self.pick_suite(&privileged, &ch)?;

        if self.config.session_cache.is_some() {
            let mut id = vec![0u8; 32];
            OsRng.fill_bytes(&mut id);
            self.session_id = id;
        }

        let ctx = self.ctx();
        c.send_handshake(
            &HandshakePayload::ServerHello(ServerHello {
                server_version: self.version,
                random: self.server_random,
                session_id: self.session_id.clone(),
                cipher_suite: self.cipher_suite,
                compression: 0,
                certificate_type: 0,
            }),
            &ctx,
        );

        let kx = suite::key_exchange(self.cipher_suite);
        if matches!(kx, Some(KeyExchange::SrpRsa) | Some(KeyExchange::Rsa)) {
            c.send_handshake(
                &HandshakePayload::Certificate(CertificateChain {
                    chain: self.config.chain.clone(),
                }),
                &ctx,
            );
        }
        if matches!(kx, Some(KeyExchange::Srp) | Some(KeyExchange::SrpRsa)) {
            let ske = self.build_server_key_exchange(c, kx == Some(KeyExchange::SrpRsa))?;
            c.send_handshake(&HandshakePayload::ServerKeyExchange(ske), &ctx);
        }
        if kx == Some(KeyExchange::Rsa) && self.config.request_client_cert {
            self.cert_requested = true;
            c.send_handshake(
                &HandshakePayload::CertificateRequest(CertificateRequest::rsa_sign()),
                &ctx,
            );
        }
        c.send_handshake(&HandshakePayload::ServerHelloDone, &ctx);

        self.state = if self.cert_requested {
            ServerState::AwaitClientCertificate
        } else {
            ServerState::AwaitClientKeyExchange
        };
        Ok(())
    }

    fn build_server_key_exchange<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        signed: bool,
    ) -> Result<ServerKeyExchange, Violation> {
        let srp = self
            .srp
            .as_ref()
            .ok_or(Violation::internal("SRP suite without SRP state"))?;
        let mut b_wire = srp::num_to_bytes(&srp.b_pub);
        if c.fault == Some(Fault::BadServerB) {
            b_wire = srp::num_to_bytes(&srp.group.n);
        }
        let mut ske = ServerKeyExchange {
            srp_n: srp::num_to_bytes(&srp.group.n),
            srp_g: srp::num_to_bytes(&srp.group.g),
            srp_salt: self.srp_salt.clone(),
            srp_b: b_wire,
            signature: Vec::new(),
        };
        if signed {
            let key = self
                .config
                .key
                .as_ref()
                .ok_or(Violation::internal("no signing key"))?;
            let digest = ske.digest(&self.client_random, &self.server_random);
            ske.signature = key.sign(&digest);
        }
        Ok(ske)
    }

    fn start_abbreviated<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        echo_id: Vec<u8>,
    ) -> Result<(), Violation> {
        let session = self
            .resumed_session
            .as_ref()
            .ok_or(Violation::internal("no session to resume"))?;
        self.cipher_suite = session.cipher_suite();
        self.master = session.master_secret.clone();
        self.session_id = echo_id;
        self.abbreviated = true;

        let ctx = self.ctx();
        c.send_handshake(
            &HandshakePayload::ServerHello(ServerHello {
                server_version: self.version,
                random: self.server_random,
                session_id: self.session_id.clone(),
                cipher_suite: self.cipher_suite,
                compression: 0,
                certificate_type: 0,
            }),
            &ctx,
        );
        c.record.calc_pending(
            self.cipher_suite,
            &self.master,
            &self.client_random,
            &self.server_random,
            false,
        )?;
        c.send_ccs();
        c.record.promote_write()?;
        self.send_finished(c, &ctx);
        self.state = ServerState::AwaitChangeCipherSpec;
        Ok(())
    }

    fn on_client_certificate(&mut self, msg: CertificateChain) -> Result<(), Violation> {
        if msg.chain.is_empty() {
            self.state = ServerState::AwaitClientKeyExchange;
            return Ok(());
        }
        let parser = self
            .config
            .cert_parser
            .as_ref()
            .ok_or(Violation::internal("no certificate parser configured"))?;
        let key = parser.public_key(&msg.chain).ok_or(Violation::new(
            AlertDescription::BadCertificate,
            "unparseable client certificate",
        ))?;
        let bits = key.bit_len();
        if bits < self.config.settings.min_key_size || bits > self.config.settings.max_key_size {
            self.post_finished_error = Some(Violation::new(
                AlertDescription::HandshakeFailure,
                "client key size out of bounds",
            ));
        }
        self.client_chain = msg.chain;
        self.client_key = Some(key);
        self.expect_cert_verify = true;
        self.state = ServerState::AwaitClientKeyExchange;
        Ok(())
    }

    fn on_client_key_exchange<T: Transport>(
        &mut self,
        c: &mut Common<T>,
        cke: ClientKeyExchange,
    ) -> Result<(), Violation> {
        let premaster = match (suite::key_exchange(self.cipher_suite), cke) {
            (
                Some(KeyExchange::Srp) | Some(KeyExchange::SrpRsa),
                ClientKeyExchange::Srp { a },
            ) => {
                let srp = self
                    .srp
                    .as_ref()
                    .ok_or(Violation::internal("SRP suite without SRP state"))?;
                let a_num = srp::bytes_to_num(&a);
                if (&a_num % &srp.group.n).is_zero() {
                    self.post_finished_error = Some(Violation::new(
                        AlertDescription::IllegalParameter,
                        "suspicious A value",
                    ));
                }
                let u = srp::make_u(&a_num, &srp.b_pub);
                srp::server_premaster(&srp.group, &srp.verifier, &a_num, &srp.b_secret, &u)
            }
            (Some(KeyExchange::Rsa), ClientKeyExchange::Rsa { encrypted }) => {
                let key = self
                    .config
                    .key
                    .as_ref()
                    .ok_or(Violation::internal("no decryption key"))?;
                // any decryption or format failure is masked with a random
                // premaster so padding oracles learn nothing; clients are
                // known to embed either their offered version or the
                // negotiated one
                let mut masked = Zeroizing::new(vec![0u8; 48]);
                OsRng.fill_bytes(&mut masked[..]);
                match key.decrypt(&encrypted) {
                    Some(pm) if pm.len() == 48 => {
                        let v = Version::new(pm[0], pm[1]);
                        if v != self.client_hello_version && v != self.version {
                            masked
                        } else {
                            Zeroizing::new(pm)
                        }
                    }
                    _ => masked,
                }
            }
            _ => {
                return Err(Violation::new(
                    AlertDescription::UnexpectedMessage,
                    "key exchange does not match the suite",
                ))
            }
        };
        self.master = prf::master_secret(
            self.version,
            &premaster,
            &self.client_random,
            &self.server_random,
        );
        c.record.calc_pending(
            self.cipher_suite,
            &self.master,
            &self.client_random,
            &self.server_random,
            false,
        )?;

        if self.expect_cert_verify {
            let digest = if self.version.is_tls() {
                c.transcript.digest36().to_vec()
            } else {
                prf::ssl_handshake_hash(&self.master, &c.transcript, b"")
            };
            self.cert_verify_digest = Some(digest);
            self.state = ServerState::AwaitCertificateVerify;
        } else {
            self.state = ServerState::AwaitChangeCipherSpec;
        }
        Ok(())
    }

    fn on_certificate_verify(&mut self, cv: CertificateVerify) -> Result<(), Violation> {
        let key = self
            .client_key
            .as_ref()
            .ok_or(Violation::internal("CertificateVerify without a client key"))?;
        let digest = self
            .cert_verify_digest
            .take()
            .ok_or(Violation::internal("no CertificateVerify digest"))?;
        if !key.verify(&cv.signature, &digest) {
            self.post_finished_error = Some(Violation::new(
                AlertDescription::DecryptError,
                "bad CertificateVerify signature",
            ));
        }
        self.state = ServerState::AwaitChangeCipherSpec;
        Ok(())
    }

    fn send_finished<T: Transport>(&mut self, c: &mut Common<T>, ctx: &DecodeContext) {
        let mut verify_data =
            prf::finished_verify(self.version, &self.master, &c.transcript, false);
        if c.fault == Some(Fault::BadFinished) {
            verify_data[0] = verify_data[0].wrapping_add(1);
        }
        c.send_handshake(&HandshakePayload::Finished(Finished { verify_data }), ctx);
    }

    fn on_ccs<T: Transport>(&mut self, c: &mut Common<T>) -> Result<(), Violation> {
        if self.state != ServerState::AwaitChangeCipherSpec {
            return Err(Violation::new(
                AlertDescription::UnexpectedMessage,
                "unexpected ChangeCipherSpec",
            ));
        }
        c.record.promote_read()?;
        self.expected_verify =
            prf::finished_verify(self.version, &self.master, &c.transcript, true);
        self.state = ServerState::AwaitFinished;
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
        if let Some(v) = self.post_finished_error.take() {
            return Err(v);
        }
        if !self.abbreviated {
            let ctx = self.ctx();
            c.send_ccs();
            c.record.promote_write()?;
            self.send_finished(c, &ctx);

            let session = Session {
                resumable: self.config.session_cache.is_some() && !self.session_id.is_empty(),
                session_id: self.session_id.clone(),
                cipher_suite: self.cipher_suite,
                master_secret: self.master.clone(),
                peer_chain: self.client_chain.clone(),
                srp_username: self.srp_username.clone(),
                shared_key_username: None,
            };
            if let Some(cache) = &self.config.session_cache {
                if session.resumable {
                    cache.put(&self.session_id, &session);
                }
            }
            self.result_session = Some(session);
        }
        self.state = ServerState::Done;
        Ok(())
    }

    pub fn into_result(self) -> HandshakeDone {
        let resumed = self.abbreviated && self.shared_key_username.is_none();
        let fallback = Session {
            session_id: Vec::new(),
            cipher_suite: 0,
            master_secret: Zeroizing::new(Vec::new()),
            peer_chain: Vec::new(),
            srp_username: None,
            shared_key_username: None,
            resumable: false,
        };
        let session = if self.abbreviated {
            self.resumed_session
        } else {
            self.result_session
        }
        .unwrap_or(fallback);
        HandshakeDone {
            session,
            resumed,
            checker: self.config.checker,
        }
    }
}
