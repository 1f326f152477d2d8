//! Connection state machine and the shared handshake machinery.
//!
//! A [`Connection`] wraps a transport and moves through idle, handshaking,
//! open, and closed states. Handshakes are driven one suspension point at a
//! time through [`Connection::handshake_step`]; blocking callers use the
//! [`Connection::handshake`] loop instead.

mod client;
mod server;

use std::mem;
use std::sync::Arc;

use tracing::debug;
use zeroize::Zeroizing;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::checker::Checker;
use crate::crypto::TranscriptHash;
use crate::error::{Error, Violation};
use crate::fault::{self, Fault, FaultError};
use crate::msgs::{content_type, handshake_type, DecodeContext, HandshakePayload};
use crate::record::{RecordFailure, RecordLayer, RecvEvent};
use crate::session::{Session, SessionCache};
use crate::settings::Settings;
use crate::store::{CertificateParser, PrivateKey, SharedKeyStore, VerifierStore};
use crate::suite;
use crate::transport::Transport;
use crate::version::Version;

use self::client::ClientHandshake;
use self::server::ServerHandshake;

/// Where a non-blocking handshake or close is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// More peer data is needed; call again once the transport is readable.
    WantRead,
    /// Outgoing bytes are queued; call again once the transport is writable.
    WantWrite,
    /// The operation finished.
    Complete,
}

/// Client-side handshake options.
#[derive(Default)]
pub struct ClientOpts {
    /// A previous session to offer for resumption.
    pub session: Option<Session>,
    pub settings: Settings,
    /// Post-handshake credential check; skipped on resumption.
    pub checker: Option<Box<dyn Checker>>,
    /// Required to verify server certificates and SRP+RSA signatures.
    pub cert_parser: Option<Box<dyn CertificateParser>>,
}

/// Server-side credentials and policy. At least one credential source
/// (certificate and key, SRP verifier store, or shared-key store) must be
/// present.
#[derive(Default)]
pub struct ServerConfig {
    pub chain: Vec<Vec<u8>>,
    pub key: Option<Box<dyn PrivateKey>>,
    pub verifier_store: Option<Box<dyn VerifierStore>>,
    pub shared_key_store: Option<Box<dyn SharedKeyStore>>,
    /// Enables resumable sessions.
    pub session_cache: Option<Arc<dyn SessionCache>>,
    pub settings: Settings,
    pub checker: Option<Box<dyn Checker>>,
    pub cert_parser: Option<Box<dyn CertificateParser>>,
    /// Ask connecting clients for a certificate.
    pub request_client_cert: bool,
}

/// State shared between the connection and whichever handshake is running.
pub(crate) struct Common<T> {
    pub record: RecordLayer<T>,
    pub transcript: TranscriptHash,
    pub fault: Option<Fault>,
    pub version_lock: Option<Version>,
    /// SRP identity the peer claimed, kept even when the handshake fails.
    pub alleged_srp_username: Option<Vec<u8>>,
    /// Shared-key identity the peer claimed.
    pub alleged_shared_key_username: Option<Vec<u8>>,
}

impl<T: Transport> Common<T> {
    fn new(transport: T) -> Self {
        Common {
            record: RecordLayer::new(transport),
            transcript: TranscriptHash::new(),
            fault: None,
            version_lock: None,
            alleged_srp_username: None,
            alleged_shared_key_username: None,
        }
    }

    /// Encode, record in the transcript, and queue one handshake message.
    /// HelloRequest is excluded from the transcript.
    pub fn send_handshake(&mut self, payload: &HandshakePayload, ctx: &DecodeContext) {
        let bytes = payload.encode(ctx);
        if !matches!(payload, HandshakePayload::HelloRequest) {
            self.transcript.update(&bytes);
        }
        self.record.queue(content_type::HANDSHAKE, &bytes);
    }

    /// Record a received handshake message in the transcript.
    pub fn note_received(&mut self, typ: u8, message: &[u8]) {
        if typ != handshake_type::HELLO_REQUEST {
            self.transcript.update(message);
        }
    }

    pub fn send_ccs(&mut self) {
        self.record.queue(content_type::CHANGE_CIPHER_SPEC, &[1]);
    }

    pub fn send_alert(&mut self, level: AlertLevel, description: AlertDescription) {
        self.record.queue_alert(Alert { level, description });
    }
}

/// Abort on a local violation: queue the fatal alert, push it best-effort,
/// and surface the reason.
pub(crate) fn fail<T: Transport>(c: &mut Common<T>, v: Violation) -> Error {
    debug!(alert = %v.alert, reason = v.reason, "aborting handshake");
    c.send_alert(AlertLevel::Fatal, v.alert);
    let _ = c.record.flush();
    Error::LocalAlert {
        description: v.alert,
        reason: v.reason,
    }
}

pub(crate) fn on_failure<T: Transport>(c: &mut Common<T>, f: RecordFailure) -> Error {
    match f {
        RecordFailure::Violation(v) => fail(c, v),
        RecordFailure::Io(e) => Error::Transport(e),
        RecordFailure::AbruptClose => Error::AbruptClose,
    }
}

/// Outcome handed back by a finished handshake machine.
pub(crate) struct HandshakeDone {
    pub session: Session,
    pub resumed: bool,
    pub checker: Option<Box<dyn Checker>>,
}

enum Role {
    Idle,
    Client(Box<ClientHandshake>),
    Server(Box<ServerHandshake>),
}

/// An SSL/TLS endpoint over an arbitrary transport.
pub struct Connection<T> {
    common: Common<T>,
    role: Role,
    session: Option<Session>,
    app_in: Vec<u8>,
    is_client: bool,
    open: bool,
    closed: bool,
    close_sent: bool,
    close_received: bool,
    resumed: bool,
    /// Treat a transport close without close_notify as a normal close
    /// instead of a truncation error.
    pub ignore_abrupt_close: bool,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Self {
        Connection {
            common: Common::new(transport),
            role: Role::Idle,
            session: None,
            app_in: Vec::new(),
            is_client: false,
            open: false,
            closed: false,
            close_sent: false,
            close_received: false,
            resumed: false,
            ignore_abrupt_close: false,
        }
    }

    /// Arm a fault for the next handshake. Must be called before the
    /// `start_*` method.
    pub fn set_fault(&mut self, fault: Fault) {
        self.common.fault = Some(fault);
        self.common.record.set_fault_flags(
            fault == Fault::BadMac,
            fault == Fault::BadPadding,
        );
    }

    fn begin(&mut self, role: Role, is_client: bool) -> Result<(), Error> {
        if self.closed {
            return Err(Error::WrongState);
        }
        if !matches!(self.role, Role::Idle) {
            return Err(Error::WrongState);
        }
        self.common.transcript = TranscriptHash::new();
        self.role = role;
        self.is_client = is_client;
        Ok(())
    }

    /// Begin an SRP client handshake.
    pub fn start_client_srp(
        &mut self,
        username: &[u8],
        password: &[u8],
        opts: ClientOpts,
    ) -> Result<(), Error> {
        let hs = ClientHandshake::new_srp(username, password, opts)?;
        self.begin(Role::Client(Box::new(hs)), true)
    }

    /// Begin a certificate-based client handshake. `chain` and `key`
    /// supply a client certificate if the server requests one.
    pub fn start_client_cert(
        &mut self,
        chain: Vec<Vec<u8>>,
        key: Option<Box<dyn PrivateKey>>,
        opts: ClientOpts,
    ) -> Result<(), Error> {
        let hs = ClientHandshake::new_cert(chain, key, opts)?;
        self.begin(Role::Client(Box::new(hs)), true)
    }

    /// Begin a shared-key client handshake.
    pub fn start_client_shared_key(
        &mut self,
        username: &[u8],
        shared_key: &[u8],
        opts: ClientOpts,
    ) -> Result<(), Error> {
        let mut key = Zeroizing::new(shared_key.to_vec());
        if self.common.fault == Some(Fault::BadSharedKey) {
            if let Some(b) = key.first_mut() {
                *b = b.wrapping_add(1);
            }
        }
        let hs = ClientHandshake::new_shared_key(username, &key, opts)?;
        self.begin(Role::Client(Box::new(hs)), true)
    }

    /// Begin a server handshake.
    pub fn start_server(&mut self, config: ServerConfig) -> Result<(), Error> {
        let hs = ServerHandshake::new(config)?;
        self.begin(Role::Server(Box::new(hs)), false)
    }

    /// Advance the running handshake to its next suspension point.
    ///
    /// With a fault armed this never yields `Complete`: the outcome is
    /// always an [`Error::Fault`] verdict.
    pub fn handshake_step(&mut self) -> Result<Status, Error> {
        let armed = self.common.fault;
        match self.step_inner() {
            Ok(Status::Complete) => match armed {
                Some(_) => {
                    self.closed = true;
                    Err(Error::Fault(FaultError::NoFailure))
                }
                None => Ok(Status::Complete),
            },
            Ok(status) => Ok(status),
            Err(Error::Fault(e)) => Err(Error::Fault(e)),
            Err(e) => match armed {
                Some(f) => Err(Error::Fault(fault::classify(f, e))),
                None => Err(e),
            },
        }
    }

    fn step_inner(&mut self) -> Result<Status, Error> {
        if self.closed {
            return Err(Error::WrongState);
        }
        let status = match &mut self.role {
            Role::Idle => return Err(Error::WrongState),
            Role::Client(hs) => hs.advance(&mut self.common),
            Role::Server(hs) => hs.advance(&mut self.common),
        };
        match status {
            Ok(Status::Complete) => self.finish(),
            Ok(status) => Ok(status),
            Err(e) => {
                self.closed = true;
                if let Some(s) = &mut self.session {
                    s.invalidate();
                }
                Err(e)
            }
        }
    }

    fn finish(&mut self) -> Result<Status, Error> {
        let role = mem::replace(&mut self.role, Role::Idle);
        let done = match role {
            Role::Client(hs) => hs.into_result(),
            Role::Server(hs) => hs.into_result(),
            Role::Idle => return Err(Error::WrongState),
        };
        if !done.resumed {
            if let Some(checker) = &done.checker {
                if let Err(e) = checker.check(&done.session) {
                    self.common
                        .send_alert(AlertLevel::Fatal, AlertDescription::CloseNotify);
                    let _ = self.common.record.flush();
                    self.closed = true;
                    return Err(Error::Authentication(e));
                }
            }
        }
        self.common.version_lock = Some(self.common.record.version);
        self.session = Some(done.session);
        self.resumed = done.resumed;
        self.open = true;
        self.close_sent = false;
        self.close_received = false;
        Ok(Status::Complete)
    }

    /// Run the handshake to completion over a blocking transport.
    pub fn handshake(&mut self) -> Result<(), Error> {
        loop {
            if self.handshake_step()? == Status::Complete {
                return Ok(());
            }
        }
    }

    /// Read up to `max` bytes of application data.
    ///
    /// `Ok(None)` means the transport would block; `Ok(Some(empty))` means
    /// the peer closed cleanly with close_notify.
    pub fn read(&mut self, max: usize) -> Result<Option<Vec<u8>>, Error> {
        if !self.open {
            return Err(Error::WrongState);
        }
        loop {
            if !self.app_in.is_empty() {
                let take = self.app_in.len().min(max);
                return Ok(Some(self.app_in.drain(..take).collect()));
            }
            if self.close_received {
                return Ok(Some(Vec::new()));
            }
            let event = match self.common.record.recv_event() {
                Ok(None) => return Ok(None),
                Ok(Some(ev)) => ev,
                Err(RecordFailure::AbruptClose) if self.ignore_abrupt_close => {
                    self.close_received = true;
                    self.open = false;
                    return Ok(Some(Vec::new()));
                }
                Err(f) => {
                    self.closed = true;
                    if let Some(s) = &mut self.session {
                        s.invalidate();
                    }
                    return Err(on_failure(&mut self.common, f));
                }
            };
            match event {
                RecvEvent::AppData(data) => self.app_in.extend_from_slice(&data),
                RecvEvent::Alert(level, description) => {
                    if description == AlertDescription::CloseNotify {
                        self.close_received = true;
                        if !self.close_sent {
                            self.common
                                .send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
                            let _ = self.common.record.flush();
                            self.close_sent = true;
                        }
                        self.open = false;
                        return Ok(Some(Vec::new()));
                    }
                    if level == AlertLevel::Fatal {
                        self.closed = true;
                        if let Some(s) = &mut self.session {
                            s.invalidate();
                        }
                        return Err(Error::RemoteAlert { level, description });
                    }
                }
                RecvEvent::Handshake(typ, _) => {
                    let renegotiation = (self.is_client
                        && typ == handshake_type::HELLO_REQUEST)
                        || (!self.is_client && typ == handshake_type::CLIENT_HELLO);
                    if renegotiation {
                        debug!("declining renegotiation request");
                        self.common
                            .send_alert(AlertLevel::Warning, AlertDescription::NoRenegotiation);
                        let _ = self.common.record.flush();
                    } else {
                        self.closed = true;
                        return Err(fail(
                            &mut self.common,
                            Violation::new(
                                AlertDescription::UnexpectedMessage,
                                "handshake message outside a handshake",
                            ),
                        ));
                    }
                }
                RecvEvent::ChangeCipherSpec => {
                    self.closed = true;
                    return Err(fail(
                        &mut self.common,
                        Violation::new(
                            AlertDescription::UnexpectedMessage,
                            "ChangeCipherSpec outside a handshake",
                        ),
                    ));
                }
            }
        }
    }

    /// Queue `data` as application records and push what the transport
    /// will take.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.open || self.close_sent {
            return Err(Error::WrongState);
        }
        if self.common.record.needs_empty_fragment() {
            // breaks the chained-IV chosen-plaintext attack on TLS 1.0
            self.common.record.queue(content_type::APPLICATION_DATA, &[]);
        }
        self.common.record.queue(content_type::APPLICATION_DATA, data);
        self.flush()?;
        Ok(())
    }

    /// Push buffered records. `Ok(false)` means the transport would block
    /// with bytes still queued.
    pub fn flush(&mut self) -> Result<bool, Error> {
        self.common
            .record
            .flush()
            .map_err(|f| on_failure(&mut self.common, f))
    }

    /// Advance a graceful shutdown: send close_notify, then wait for the
    /// peer's.
    pub fn close_step(&mut self) -> Result<Status, Error> {
        if self.closed {
            return Err(Error::WrongState);
        }
        if !self.close_sent {
            self.common
                .send_alert(AlertLevel::Warning, AlertDescription::CloseNotify);
            self.close_sent = true;
        }
        if !self.flush()? {
            return Ok(Status::WantWrite);
        }
        if self.close_received {
            self.open = false;
            self.closed = true;
            return Ok(Status::Complete);
        }
        loop {
            let event = match self.common.record.recv_event() {
                Ok(None) => return Ok(Status::WantRead),
                Ok(Some(ev)) => ev,
                Err(RecordFailure::AbruptClose) if self.ignore_abrupt_close => {
                    self.close_received = true;
                    self.open = false;
                    self.closed = true;
                    return Ok(Status::Complete);
                }
                Err(f) => {
                    self.closed = true;
                    if let Some(s) = &mut self.session {
                        s.invalidate();
                    }
                    return Err(on_failure(&mut self.common, f));
                }
            };
            match event {
                RecvEvent::Alert(_, AlertDescription::CloseNotify) => {
                    self.close_received = true;
                    self.open = false;
                    self.closed = true;
                    return Ok(Status::Complete);
                }
                RecvEvent::Alert(AlertLevel::Fatal, description) => {
                    self.closed = true;
                    if let Some(s) = &mut self.session {
                        s.invalidate();
                    }
                    return Err(Error::RemoteAlert {
                        level: AlertLevel::Fatal,
                        description,
                    });
                }
                // data racing our close_notify stays readable
                RecvEvent::AppData(data) => self.app_in.extend_from_slice(&data),
                _ => {}
            }
        }
    }

    /// Gracefully shut down over a blocking transport.
    pub fn close(&mut self) -> Result<(), Error> {
        loop {
            if self.close_step()? == Status::Complete {
                return Ok(());
            }
        }
    }

    /// The established session, once a handshake has completed.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Whether the last handshake resumed a previous session.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// The negotiated protocol version.
    pub fn version(&self) -> Option<Version> {
        self.common.version_lock
    }

    pub fn cipher_name(&self) -> Option<&'static str> {
        self.session
            .as_ref()
            .and_then(|s| suite::bulk_cipher(s.cipher_suite()))
            .map(|c| c.name())
    }

    /// The SRP identity the peer claimed, available even when the
    /// handshake later failed.
    pub fn alleged_srp_username(&self) -> Option<&[u8]> {
        self.common.alleged_srp_username.as_deref()
    }

    /// The shared-key identity the peer claimed.
    pub fn alleged_shared_key_username(&self) -> Option<&[u8]> {
        self.common.alleged_shared_key_username.as_deref()
    }
}
