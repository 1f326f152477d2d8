mod common;

use std::sync::Arc;

use common::{drive, pipe_pair, test_cert, test_cert_fingerprint, test_key, Pipe, TestCertParser};
use morel::{
    AlertDescription, BulkCipher, ClientOpts, Connection, Error, Fault, FaultError,
    FingerprintChecker, InMemorySessionCache, InMemorySharedKeyStore, InMemoryVerifierStore,
    ServerConfig, SessionCache, Settings, SrpEntry, Status, VerifierStore, Version,
};

fn verifier_store() -> InMemoryVerifierStore {
    let mut store = InMemoryVerifierStore::new();
    assert!(store.insert_password(b"alice", b"password123", b"s4lt", 1024));
    store
}

fn srp_server() -> ServerConfig {
    ServerConfig {
        verifier_store: Some(Box::new(verifier_store())),
        ..ServerConfig::default()
    }
}

fn cert_server() -> ServerConfig {
    ServerConfig {
        chain: vec![test_cert()],
        key: Some(Box::new(test_key())),
        cert_parser: Some(Box::new(TestCertParser)),
        ..ServerConfig::default()
    }
}

fn cert_client_opts() -> ClientOpts {
    ClientOpts {
        cert_parser: Some(Box::new(TestCertParser)),
        ..ClientOpts::default()
    }
}

fn new_pair() -> (Connection<Pipe>, Connection<Pipe>) {
    let (cp, sp) = pipe_pair();
    (Connection::new(cp), Connection::new(sp))
}

fn read_some(conn: &mut Connection<Pipe>) -> Vec<u8> {
    conn.read(4096).unwrap().expect("peer data expected")
}

#[track_caller]
fn assert_rejected(result: Result<(), Error>, fault: Fault) {
    match result {
        Err(Error::Fault(FaultError::Rejected { alert })) => assert!(
            fault.expected_alerts().contains(&alert),
            "alert {alert} not expected for {fault:?}"
        ),
        other => panic!("expected a rejection for {fault:?}, got {other:?}"),
    }
}

#[test]
fn server_waits_for_the_first_hello() {
    let (_, mut server) = new_pair();
    server.start_server(srp_server()).unwrap();
    assert_eq!(server.handshake_step().unwrap(), Status::WantRead);
}

#[test]
fn srp_handshake_exchanges_data_and_closes() {
    let (mut client, mut server) = new_pair();
    client
        .start_client_srp(b"alice", b"password123", ClientOpts::default())
        .unwrap();
    server.start_server(srp_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();

    assert_eq!(
        server.alleged_srp_username(),
        Some(b"alice".as_slice())
    );
    assert_eq!(
        server.session().unwrap().srp_username(),
        Some(b"alice".as_slice())
    );
    assert_eq!(client.version(), Some(Version::TLS11));
    assert_eq!(client.cipher_name(), Some("aes256"));

    client.write(b"hello over srp").unwrap();
    assert_eq!(read_some(&mut server), b"hello over srp");
    server.write(b"and back").unwrap();
    assert_eq!(read_some(&mut client), b"and back");

    // graceful shutdown: the server's read answers the close_notify
    assert_eq!(client.close_step().unwrap(), Status::WantRead);
    assert_eq!(server.read(4096).unwrap(), Some(Vec::new()));
    assert_eq!(client.close_step().unwrap(), Status::Complete);
}

#[test]
fn srp_rsa_prefers_signed_parameters() {
    let mut config = cert_server();
    config.verifier_store = Some(Box::new(verifier_store()));
    let (mut client, mut server) = new_pair();
    client
        .start_client_srp(b"alice", b"password123", cert_client_opts())
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(morel::suite::is_srp_rsa(
        client.session().unwrap().cipher_suite()
    ));
}

#[test]
fn rsa_handshake_with_fingerprint_checker() {
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        checker: Some(Box::new(FingerprintChecker::new(&test_cert_fingerprint()))),
        ..cert_client_opts()
    };
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(!client.session().unwrap().peer_chain().is_empty());
}

#[test]
fn fingerprint_mismatch_fails_authentication() {
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        checker: Some(Box::new(FingerprintChecker::new(&"0".repeat(40)))),
        ..cert_client_opts()
    };
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    assert!(matches!(ra, Err(Error::Authentication(_))));
    rb.unwrap();
}

#[test]
fn client_certificate_is_requested_and_verified() {
    let mut config = cert_server();
    config.request_client_cert = true;
    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(
            vec![test_cert()],
            Some(Box::new(test_key())),
            cert_client_opts(),
        )
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(!server.session().unwrap().peer_chain().is_empty());
}

#[test]
fn session_resumption_skips_the_key_exchange() {
    let cache = InMemorySessionCache::new();
    let make_config = || ServerConfig {
        session_cache: Some(cache.clone() as Arc<dyn SessionCache>),
        ..cert_server()
    };

    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server.start_server(make_config()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(!client.resumed());
    let session = client.session().unwrap().clone();
    assert!(!session.id().is_empty());

    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        session: Some(session.clone()),
        ..cert_client_opts()
    };
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(make_config()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(client.resumed());
    assert!(server.resumed());
    assert_eq!(client.session().unwrap().id(), session.id());

    client.write(b"resumed traffic").unwrap();
    assert_eq!(read_some(&mut server), b"resumed traffic");
}

#[test]
fn resumption_rejects_a_switched_cipher_suite() {
    let cache = InMemorySessionCache::new();
    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server
        .start_server(ServerConfig {
            session_cache: Some(cache.clone() as Arc<dyn SessionCache>),
            ..cert_server()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    let session = client.session().unwrap().clone();
    assert_eq!(session.cipher_name(), Some("aes256"));

    // a second session negotiated under rc4, then registered in the first
    // cache under the first session's identifier
    let rc4_only = Settings {
        cipher_names: vec![BulkCipher::Rc4],
        ..Settings::default()
    };
    let cache2 = InMemorySessionCache::new();
    let (mut client2, mut server2) = new_pair();
    client2
        .start_client_cert(
            Vec::new(),
            None,
            ClientOpts {
                settings: rc4_only.clone(),
                ..cert_client_opts()
            },
        )
        .unwrap();
    server2
        .start_server(ServerConfig {
            session_cache: Some(cache2 as Arc<dyn SessionCache>),
            settings: rc4_only,
            ..cert_server()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client2, &mut server2);
    ra.unwrap();
    rb.unwrap();
    let rc4_session = client2.session().unwrap().clone();
    assert_eq!(rc4_session.cipher_name(), Some("rc4"));
    cache.put(session.id(), &rc4_session);

    // the resumed ServerHello now names rc4; the client negotiated aes256
    // under this session and must refuse the switch
    let (mut client3, mut server3) = new_pair();
    client3
        .start_client_cert(
            Vec::new(),
            None,
            ClientOpts {
                session: Some(session),
                ..cert_client_opts()
            },
        )
        .unwrap();
    server3
        .start_server(ServerConfig {
            session_cache: Some(cache as Arc<dyn SessionCache>),
            ..cert_server()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client3, &mut server3);
    assert!(matches!(
        ra,
        Err(Error::LocalAlert {
            description: AlertDescription::IllegalParameter,
            ..
        })
    ));
    assert!(matches!(
        rb,
        Err(Error::RemoteAlert {
            description: AlertDescription::IllegalParameter,
            ..
        })
    ));
}

#[test]
fn resumption_with_a_dropped_suite_is_refused() {
    let cache = InMemorySessionCache::new();
    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server
        .start_server(ServerConfig {
            session_cache: Some(cache.clone() as Arc<dyn SessionCache>),
            ..cert_server()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    let session = client.session().unwrap().clone();

    // the client no longer offers the suite its cached session negotiated
    let rc4_only = Settings {
        cipher_names: vec![BulkCipher::Rc4],
        ..Settings::default()
    };
    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(
            Vec::new(),
            None,
            ClientOpts {
                session: Some(session),
                settings: rc4_only,
                ..cert_client_opts()
            },
        )
        .unwrap();
    server
        .start_server(ServerConfig {
            session_cache: Some(cache as Arc<dyn SessionCache>),
            ..cert_server()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    assert!(matches!(
        rb,
        Err(Error::LocalAlert {
            description: AlertDescription::HandshakeFailure,
            ..
        })
    ));
    assert!(matches!(
        ra,
        Err(Error::RemoteAlert {
            description: AlertDescription::HandshakeFailure,
            ..
        })
    ));
}

#[test]
fn shared_key_handshake() {
    let mut store = InMemorySharedKeyStore::new();
    store.insert(b"user", b"0123456789abcdef");
    let config = ServerConfig {
        shared_key_store: Some(Box::new(store)),
        ..ServerConfig::default()
    };
    let (mut client, mut server) = new_pair();
    client
        .start_client_shared_key(b"user", b"0123456789abcdef", ClientOpts::default())
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(!client.resumed());
    assert_eq!(
        server.alleged_shared_key_username(),
        Some(b"user".as_slice())
    );

    client.write(b"shared secret traffic").unwrap();
    assert_eq!(read_some(&mut server), b"shared secret traffic");
}

#[test]
fn version_negotiation_meets_in_the_middle() {
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        settings: Settings {
            max_version: Version::TLS10,
            ..Settings::default()
        },
        ..ClientOpts::default()
    };
    client
        .start_client_srp(b"alice", b"password123", opts)
        .unwrap();
    server.start_server(srp_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert_eq!(client.version(), Some(Version::TLS10));
    assert_eq!(server.version(), Some(Version::TLS10));
}

#[test]
fn disjoint_version_ranges_are_rejected() {
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        settings: Settings {
            max_version: Version::TLS10,
            ..Settings::default()
        },
        ..ClientOpts::default()
    };
    let mut config = srp_server();
    config.settings.min_version = Version::TLS11;
    config.settings.max_version = Version::TLS11;
    client
        .start_client_srp(b"alice", b"password123", opts)
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    assert!(matches!(
        ra,
        Err(Error::RemoteAlert {
            description: AlertDescription::ProtocolVersion,
            ..
        })
    ));
    assert!(matches!(
        rb,
        Err(Error::LocalAlert {
            description: AlertDescription::ProtocolVersion,
            ..
        })
    ));
}

#[test]
fn unoffered_suite_choice_is_rejected() {
    let (cp, sp) = pipe_pair();
    let tap = sp.clone();
    let mut client = Connection::new(cp);
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    assert_eq!(client.handshake_step().unwrap(), Status::WantRead);
    tap.incoming.borrow_mut().clear();

    // a hand-built ServerHello naming an SRP suite the client never offered
    let mut record = vec![22, 3, 2, 0, 42, 2, 0, 0, 38, 3, 2];
    record.extend([0u8; 32]);
    record.push(0);
    record.extend([0x00, 0x53]);
    record.push(0);
    tap.outgoing.borrow_mut().extend(record);

    assert!(matches!(
        client.handshake_step(),
        Err(Error::LocalAlert {
            description: AlertDescription::IllegalParameter,
            ..
        })
    ));
}

/// A store serving the listed 1024-bit modulus with generator 5, which no
/// client allow-lists.
struct UnlistedGroupStore;

impl VerifierStore for UnlistedGroupStore {
    fn lookup(&self, _username: &[u8]) -> Option<SrpEntry> {
        let mut group = morel::crypto::srp::group_for_bits(1024)?.clone();
        group.g = 5u8.into();
        let verifier =
            morel::crypto::srp::make_verifier(b"alice", b"password123", b"s4lt", &group);
        Some(SrpEntry {
            group,
            salt: b"s4lt".to_vec(),
            verifier,
        })
    }
}

#[test]
fn unlisted_srp_group_is_rejected() {
    let (mut client, mut server) = new_pair();
    client
        .start_client_srp(b"alice", b"password123", ClientOpts::default())
        .unwrap();
    server
        .start_server(ServerConfig {
            verifier_store: Some(Box::new(UnlistedGroupStore)),
            ..ServerConfig::default()
        })
        .unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    assert!(matches!(
        ra,
        Err(Error::LocalAlert {
            description: AlertDescription::UntrustedSrpParameters,
            ..
        })
    ));
    assert!(matches!(
        rb,
        Err(Error::RemoteAlert {
            description: AlertDescription::UntrustedSrpParameters,
            ..
        })
    ));
}

/// A ClientHello offering one SRP suite with no SRP identity extension.
fn srp_hello_without_identity() -> Vec<u8> {
    let mut record = vec![22, 3, 2, 0, 45, 1, 0, 0, 41, 3, 2];
    record.extend([0u8; 32]);
    record.push(0);
    record.extend([0, 2, 0x00, 0x50]);
    record.extend([1, 0]);
    record
}

#[test]
fn missing_srp_username_requests_a_second_hello() {
    let (cp, sp) = pipe_pair();
    let tap = cp.clone();
    let mut server = Connection::new(sp);
    server.start_server(srp_server()).unwrap();

    let hello = srp_hello_without_identity();
    tap.outgoing.borrow_mut().extend(hello.clone());
    assert_eq!(server.handshake_step().unwrap(), Status::WantRead);
    // the server asks for an identity with a warning alert and waits
    let answer: Vec<u8> = tap.incoming.borrow_mut().drain(..).collect();
    assert_eq!(answer, [21, 3, 2, 0, 2, 1, 121]);

    // a second hello still without an identity is fatal
    tap.outgoing.borrow_mut().extend(hello);
    assert!(matches!(
        server.handshake_step(),
        Err(Error::LocalAlert {
            description: AlertDescription::IllegalParameter,
            ..
        })
    ));
}

#[test]
fn ssl3_srp_handshake() {
    let ssl3 = Settings {
        min_version: Version::SSL30,
        max_version: Version::SSL30,
        ..Settings::default()
    };
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        settings: ssl3.clone(),
        ..ClientOpts::default()
    };
    let mut config = srp_server();
    config.settings = ssl3;
    client
        .start_client_srp(b"alice", b"password123", opts)
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert_eq!(client.version(), Some(Version::SSL30));

    client.write(b"ssl3 data").unwrap();
    assert_eq!(read_some(&mut server), b"ssl3 data");
}

#[test]
fn ssl3_client_declines_a_certificate_request() {
    let ssl3 = Settings {
        min_version: Version::SSL30,
        max_version: Version::SSL30,
        ..Settings::default()
    };
    let mut config = cert_server();
    config.request_client_cert = true;
    config.settings = ssl3.clone();
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        settings: ssl3,
        ..cert_client_opts()
    };
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert!(server.session().unwrap().peer_chain().is_empty());
}

#[test]
fn rc4_stream_cipher_round_trip() {
    let rc4_only = Settings {
        cipher_names: vec![BulkCipher::Rc4],
        ..Settings::default()
    };
    let (mut client, mut server) = new_pair();
    let opts = ClientOpts {
        settings: rc4_only.clone(),
        ..cert_client_opts()
    };
    let mut config = cert_server();
    config.settings = rc4_only;
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(config).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();
    assert_eq!(client.cipher_name(), Some("rc4"));

    client.write(b"stream ciphered").unwrap();
    assert_eq!(read_some(&mut server), b"stream ciphered");
}

fn run_client_fault_srp(fault: Fault) -> Result<(), Error> {
    let (mut client, mut server) = new_pair();
    client.set_fault(fault);
    client
        .start_client_srp(b"alice", b"password123", ClientOpts::default())
        .unwrap();
    server.start_server(srp_server()).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    ra
}

fn run_client_fault_rsa(fault: Fault) -> Result<(), Error> {
    let (mut client, mut server) = new_pair();
    client.set_fault(fault);
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    ra
}

#[test]
fn fault_bad_username() {
    assert_rejected(run_client_fault_srp(Fault::BadUsername), Fault::BadUsername);
}

#[test]
fn fault_bad_password() {
    assert_rejected(run_client_fault_srp(Fault::BadPassword), Fault::BadPassword);
}

#[test]
fn fault_bad_a_value() {
    assert_rejected(run_client_fault_srp(Fault::BadA), Fault::BadA);
}

#[test]
fn fault_bad_server_b_value() {
    let (mut client, mut server) = new_pair();
    server.set_fault(Fault::BadServerB);
    client
        .start_client_srp(b"alice", b"password123", ClientOpts::default())
        .unwrap();
    server.start_server(srp_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    assert_rejected(rb, Fault::BadServerB);
    assert!(matches!(
        ra,
        Err(Error::LocalAlert {
            description: AlertDescription::IllegalParameter,
            ..
        })
    ));
}

#[test]
fn fault_bad_shared_key_identifier() {
    let mut store = InMemorySharedKeyStore::new();
    store.insert(b"user", b"0123456789abcdef");
    let config = ServerConfig {
        shared_key_store: Some(Box::new(store)),
        ..ServerConfig::default()
    };
    let (mut client, mut server) = new_pair();
    client.set_fault(Fault::BadIdentifier);
    client
        .start_client_shared_key(b"user", b"0123456789abcdef", ClientOpts::default())
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    assert_rejected(ra, Fault::BadIdentifier);
}

#[test]
fn fault_bad_shared_key() {
    let mut store = InMemorySharedKeyStore::new();
    store.insert(b"user", b"0123456789abcdef");
    let config = ServerConfig {
        shared_key_store: Some(Box::new(store)),
        ..ServerConfig::default()
    };
    let (mut client, mut server) = new_pair();
    client.set_fault(Fault::BadSharedKey);
    client
        .start_client_shared_key(b"user", b"0123456789abcdef", ClientOpts::default())
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    assert_rejected(ra, Fault::BadSharedKey);
}

#[test]
fn fault_bad_premaster_padding() {
    assert_rejected(
        run_client_fault_rsa(Fault::BadPremasterPadding),
        Fault::BadPremasterPadding,
    );
}

#[test]
fn fault_short_premaster_secret() {
    assert_rejected(
        run_client_fault_rsa(Fault::ShortPremasterSecret),
        Fault::ShortPremasterSecret,
    );
}

#[test]
fn fault_bad_certificate_verify() {
    let mut config = cert_server();
    config.request_client_cert = true;
    let (mut client, mut server) = new_pair();
    client.set_fault(Fault::BadVerifyMessage);
    client
        .start_client_cert(
            vec![test_cert()],
            Some(Box::new(test_key())),
            cert_client_opts(),
        )
        .unwrap();
    server.start_server(config).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    assert_rejected(ra, Fault::BadVerifyMessage);
}

#[test]
fn fault_bad_finished() {
    assert_rejected(run_client_fault_rsa(Fault::BadFinished), Fault::BadFinished);
}

#[test]
fn fault_bad_record_mac() {
    assert_rejected(run_client_fault_rsa(Fault::BadMac), Fault::BadMac);
}

#[test]
fn fault_bad_record_padding() {
    assert_rejected(run_client_fault_rsa(Fault::BadPadding), Fault::BadPadding);
}

#[test]
fn fault_corruption_tolerates_empty_credentials() {
    // an empty password leaves the corruption a no-op; the wrong secret
    // still fails at the record MAC
    let (mut client, mut server) = new_pair();
    client.set_fault(Fault::BadPassword);
    client
        .start_client_srp(b"alice", b"", ClientOpts::default())
        .unwrap();
    server.start_server(srp_server()).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    assert_rejected(ra, Fault::BadPassword);

    // an empty shared key is refused by configuration, not a panic
    let (mut client, _server) = new_pair();
    client.set_fault(Fault::BadSharedKey);
    assert!(matches!(
        client.start_client_shared_key(b"user", b"", ClientOpts::default()),
        Err(Error::Config(_))
    ));
}

#[test]
fn clean_handshake_with_a_fault_armed_reports_no_failure() {
    // BadPadding against an RC4 suite corrupts nothing
    let rc4_only = Settings {
        cipher_names: vec![BulkCipher::Rc4],
        ..Settings::default()
    };
    let (mut client, mut server) = new_pair();
    client.set_fault(Fault::BadPadding);
    let opts = ClientOpts {
        settings: rc4_only.clone(),
        ..cert_client_opts()
    };
    let mut config = cert_server();
    config.settings = rc4_only;
    client.start_client_cert(Vec::new(), None, opts).unwrap();
    server.start_server(config).unwrap();
    let (ra, _) = drive(&mut client, &mut server);
    assert!(matches!(ra, Err(Error::Fault(FaultError::NoFailure))));
}

#[test]
fn tampered_application_record_fails_the_mac() {
    let (cp, sp) = pipe_pair();
    let tap = sp.clone();
    let mut client = Connection::new(cp);
    let mut server = Connection::new(sp);
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();

    client.write(b"integrity protected").unwrap();
    {
        let mut bytes = tap.incoming.borrow_mut();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
    }
    assert!(matches!(
        server.read(4096),
        Err(Error::LocalAlert {
            description: AlertDescription::BadRecordMac,
            ..
        })
    ));
}

#[test]
fn oversized_record_is_an_overflow() {
    let (cp, sp) = pipe_pair();
    let tap = sp.clone();
    let mut client = Connection::new(cp);
    let mut server = Connection::new(sp);
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();

    tap.incoming
        .borrow_mut()
        .extend([23u8, 3, 2, 0x48, 0x01]);
    assert!(matches!(
        server.read(4096),
        Err(Error::LocalAlert {
            description: AlertDescription::RecordOverflow,
            ..
        })
    ));
}

#[test]
fn renegotiation_is_declined() {
    let (mut client, mut server) = new_pair();
    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    server.start_server(cert_server()).unwrap();
    let (ra, rb) = drive(&mut client, &mut server);
    ra.unwrap();
    rb.unwrap();

    client
        .start_client_cert(Vec::new(), None, cert_client_opts())
        .unwrap();
    let _ = client.handshake_step();
    // the server answers the new hello with a warning and carries on
    assert_eq!(server.read(4096).unwrap(), None);
    assert!(matches!(
        client.handshake_step(),
        Err(Error::RemoteAlert {
            description: AlertDescription::NoRenegotiation,
            ..
        })
    ));
}

#[test]
fn blocking_tcp_round_trip() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server_thread = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut conn = Connection::new(stream);
        let mut store = InMemoryVerifierStore::new();
        assert!(store.insert_password(b"alice", b"password123", b"s4lt", 1024));
        conn.start_server(ServerConfig {
            verifier_store: Some(Box::new(store)),
            ..ServerConfig::default()
        })
        .unwrap();
        conn.handshake().unwrap();
        let data = conn.read(4096).unwrap().expect("client data expected");
        conn.write(&data).unwrap();
        // the client's close_notify is answered inside read
        assert_eq!(conn.read(4096).unwrap(), Some(Vec::new()));
    });

    let stream = std::net::TcpStream::connect(addr).unwrap();
    let mut conn = Connection::new(stream);
    conn.start_client_srp(b"alice", b"password123", ClientOpts::default())
        .unwrap();
    conn.handshake().unwrap();
    conn.write(b"echo me").unwrap();
    assert_eq!(conn.read(4096).unwrap().expect("echo expected"), b"echo me");
    conn.close().unwrap();
    server_thread.join().unwrap();
}
