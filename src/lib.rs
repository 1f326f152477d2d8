//! An SSL 3.0 through TLS 1.1 handshake engine and record layer over
//! caller-supplied transports.
//!
//! Three authentication families are supported: SRP, RSA certificates
//! (including SRP with RSA-signed parameters), and pre-shared keys carried
//! in the session identifier. Handshakes run either to completion over a
//! blocking transport ([`Connection::handshake`]) or one suspension point
//! at a time ([`Connection::handshake_step`]) for non-blocking callers.
//!
//! Certificate parsing and RSA math live behind the capability traits in
//! [`store`]; the engine itself never touches ASN.1.
//!
//! A deliberate-corruption harness ([`Fault`]) drives one handshake with a
//! chosen value broken and reports whether the peer rejected it with the
//! right alert.

#![deny(unsafe_code)]

pub mod alert;
pub mod checker;
mod codec;
mod conn;
pub mod crypto;
pub mod error;
pub mod fault;
mod msgs;
mod record;
pub mod session;
pub mod settings;
pub mod store;
pub mod suite;
pub mod transport;
pub mod version;

pub use alert::{AlertDescription, AlertLevel};
pub use checker::{Checker, FingerprintChecker};
pub use conn::{ClientOpts, Connection, ServerConfig, Status};
pub use error::{AuthError, Error};
pub use fault::{Fault, FaultError};
pub use session::{InMemorySessionCache, Session, SessionCache};
pub use settings::{CertificateType, Settings};
pub use store::{
    CertificateParser, InMemorySharedKeyStore, InMemoryVerifierStore, PrivateKey, PublicKey,
    SharedKeyStore, SrpEntry, VerifierStore,
};
pub use suite::BulkCipher;
pub use transport::Transport;
pub use version::Version;
