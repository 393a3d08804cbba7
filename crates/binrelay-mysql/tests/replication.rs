//! Integration tests driving the session through a scripted transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use binrelay_core::Error;
use binrelay_core::error::{ConnectionError, ConnectionErrorKind};
use binrelay_mysql::protocol::capabilities::*;
use binrelay_mysql::session::build_register_slave_command;
use binrelay_mysql::{PacketTransport, ReplicaConfig, ReplicationBootstrap, Reply, Session, SessionState};

/// Everything the session wrote, with the sequence number each payload
/// was stamped with.
#[derive(Debug, Default)]
struct WireLog {
    writes: Vec<(u8, Vec<u8>)>,
    resets: usize,
}

/// A transport that replays canned reply packets and records writes.
#[derive(Debug)]
struct ScriptedTransport {
    replies: VecDeque<Vec<u8>>,
    log: Arc<Mutex<WireLog>>,
    sequence: u8,
}

impl ScriptedTransport {
    fn new(replies: Vec<Vec<u8>>) -> (Self, Arc<Mutex<WireLog>>) {
        let log = Arc::new(Mutex::new(WireLog::default()));
        (
            Self {
                replies: replies.into(),
                log: Arc::clone(&log),
                sequence: 0,
            },
            log,
        )
    }
}

impl PacketTransport for ScriptedTransport {
    fn read_packet(&mut self) -> binrelay_core::Result<Vec<u8>> {
        self.sequence = self.sequence.wrapping_add(1);
        self.replies.pop_front().ok_or_else(|| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "scripted transport exhausted".to_string(),
                source: None,
            })
        })
    }

    fn write_packet(&mut self, payload: &[u8]) -> binrelay_core::Result<()> {
        self.log
            .lock()
            .unwrap()
            .writes
            .push((self.sequence, payload.to_vec()));
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn reset_sequence(&mut self) {
        self.sequence = 0;
        self.log.lock().unwrap().resets += 1;
    }
}

const SERVER_CAPS: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS;

fn greeting() -> Vec<u8> {
    let mut payload = vec![10];
    payload.extend_from_slice(b"10.0.18-MariaDB-log\0");
    payload.extend_from_slice(&99u32.to_le_bytes());
    payload.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    payload.push(0);
    payload.extend_from_slice(&((SERVER_CAPS & 0xFFFF) as u16).to_le_bytes());
    payload.push(33);
    payload.extend_from_slice(&0u16.to_le_bytes()); // status: autocommit off
    payload.extend_from_slice(&((SERVER_CAPS >> 16) as u16).to_le_bytes());
    payload.extend_from_slice(&[0u8; 11]);
    payload.extend_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20]);
    payload
}

fn ack(status: u16) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x00];
    payload.extend_from_slice(&status.to_le_bytes());
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload
}

fn server_error() -> Vec<u8> {
    let mut payload = vec![0xFF, 0x15, 0x04, b'#'];
    payload.extend_from_slice(b"28000");
    payload.extend_from_slice(b"Access denied");
    payload
}

fn eof(status: u16) -> Vec<u8> {
    let mut payload = vec![0xFE, 0x00, 0x00];
    payload.extend_from_slice(&status.to_le_bytes());
    payload
}

fn lenenc(data: &[u8]) -> Vec<u8> {
    let mut out = vec![u8::try_from(data.len()).unwrap()];
    out.extend_from_slice(data);
    out
}

fn column_packet(name: &str) -> Vec<u8> {
    let mut payload = Vec::new();
    for part in ["def", "", "", "", name, name] {
        payload.extend_from_slice(&lenenc(part.as_bytes()));
    }
    payload.push(0x0C);
    payload.extend_from_slice(&33u16.to_le_bytes());
    payload.extend_from_slice(&64u32.to_le_bytes());
    payload.push(0xFD); // VAR_STRING
    payload.extend_from_slice(&0u16.to_le_bytes());
    payload.push(0);
    payload
}

fn config() -> ReplicaConfig {
    ReplicaConfig::new()
        .master_addr("10.88.147.1:6012")
        .user("repl")
        .password("repl")
        .report_host("10.88.104.18")
        .report_port(6012)
        .server_id(14_716_013)
        .master_id(14_716_012)
        .gtid_slave_pos("0-14716012-2170")
}

/// The autocommit flag in the status field.
const AUTOCOMMIT: u16 = 0x0002;

fn ready_session(
    extra_replies: Vec<Vec<u8>>,
) -> (Session<ScriptedTransport>, Arc<Mutex<WireLog>>) {
    // Auth ack already reports autocommit, so connect issues no extra
    // command.
    let mut replies = vec![greeting(), ack(AUTOCOMMIT)];
    replies.extend(extra_replies);
    let (transport, log) = ScriptedTransport::new(replies);
    let session = Session::with_transport(transport, config()).expect("connect should succeed");
    (session, log)
}

#[test]
fn connect_negotiates_a_server_capability_subset() {
    let (session, log) = ready_session(vec![]);

    assert!(session.is_ready());
    assert_eq!(session.capability() & !SERVER_CAPS, 0);
    // No database configured: connect-with-db must not be requested.
    assert_eq!(session.capability() & CLIENT_CONNECT_WITH_DB, 0);
    // Flags outside the replica set are not picked up either.
    assert_eq!(session.capability() & CLIENT_MULTI_STATEMENTS, 0);
    assert_eq!(session.server_version(), "10.0.18-MariaDB-log");
    assert_eq!(session.connection_id(), 99);

    // The auth response is the first write and carries the negotiated
    // capability in its first four bytes.
    let log = log.lock().unwrap();
    let (sequence, auth) = &log.writes[0];
    assert_eq!(*sequence, 1, "auth continues the greeting's epoch");
    assert_eq!(&auth[0..4], &session.capability().to_le_bytes());
}

#[test]
fn connect_with_database_requests_connect_with_db() {
    let (transport, log) = ScriptedTransport::new(vec![greeting(), ack(AUTOCOMMIT)]);
    let session = Session::with_transport(transport, config().database("ledger"))
        .expect("connect should succeed");

    assert_ne!(session.capability() & CLIENT_CONNECT_WITH_DB, 0);

    // The auth payload ends with the NUL-terminated database name.
    let log = log.lock().unwrap();
    let auth = &log.writes[0].1;
    assert!(auth.ends_with(b"ledger\0"));
}

#[test]
fn connect_forces_autocommit_when_server_reports_it_off() {
    let replies = vec![greeting(), ack(0), ack(AUTOCOMMIT)];
    let (transport, log) = ScriptedTransport::new(replies);
    let session = Session::with_transport(transport, config()).expect("connect should succeed");

    assert!(session.is_ready());
    assert!(session.is_autocommit());

    let log = log.lock().unwrap();
    assert_eq!(log.writes.len(), 2);
    let (sequence, command) = &log.writes[1];
    assert_eq!(*sequence, 0, "commands start a fresh sequence epoch");
    assert_eq!(command[0], 0x03); // COM_QUERY
    assert_eq!(&command[1..], b"SET autocommit = 1");
}

#[test]
fn connect_fails_with_structured_error_on_refusal() {
    let (transport, _log) = ScriptedTransport::new(vec![server_error()]);
    let mut session = Session::disconnected(config());

    let err = session
        .attach_transport(transport)
        .expect_err("connect should fail");
    match err {
        Error::Server(e) => {
            assert_eq!(e.code, 1045);
            assert_eq!(e.state, "28000");
            assert_eq!(e.message, "Access denied");
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(!session.is_ready());
    assert_eq!(session.state(), SessionState::Error);
}

#[test]
fn connect_fails_when_auth_is_rejected() {
    let (transport, _log) = ScriptedTransport::new(vec![greeting(), server_error()]);
    let mut session = Session::disconnected(config());

    let err = session
        .attach_transport(transport)
        .expect_err("auth should fail");
    assert_eq!(err.server_code(), Some(1045));
    assert_eq!(session.state(), SessionState::Error);
}

#[test]
fn execute_resets_the_sequence_before_each_command() {
    let (mut session, log) = ready_session(vec![ack(AUTOCOMMIT), ack(AUTOCOMMIT)]);

    session.execute("SET @a = 1").expect("first command");
    session.execute("SET @a = 2").expect("second command");

    let log = log.lock().unwrap();
    // Auth write, then the two commands.
    assert_eq!(log.writes.len(), 3);
    assert_eq!(log.resets, 2);
    for (sequence, command) in &log.writes[1..] {
        assert_eq!(*sequence, 0, "sequence numbers must not leak across commands");
        assert_eq!(command[0], 0x03);
    }
}

#[test]
fn server_error_reply_leaves_session_ready() {
    let (mut session, _log) = ready_session(vec![server_error(), ack(AUTOCOMMIT)]);

    let err = session.execute("SET @bad = 1").expect_err("server rejects");
    match &err {
        Error::Server(e) => {
            assert_eq!(e.code, 1045);
            assert_eq!(e.state, "28000");
        }
        other => panic!("expected server error, got {other:?}"),
    }

    // The transport is healthy: the next command still works.
    assert!(session.is_ready());
    session.execute("SET @ok = 1").expect("session still usable");
}

#[test]
fn local_infile_reply_is_always_malformed() {
    let (mut session, _log) =
        ready_session(vec![vec![0xFB, b'/', b'e', b't', b'c', b'/', b'x']]);

    let err = session.execute("LOAD DATA").expect_err("must be rejected");
    assert!(matches!(err, Error::Protocol(_)));
    // Protocol errors are fatal to the session.
    assert_eq!(session.state(), SessionState::Error);
}

#[test]
fn result_set_with_wrong_column_count_is_malformed() {
    // Header declares two columns but only one arrives before EOF.
    let replies = vec![
        vec![0x02],
        column_packet("a"),
        eof(AUTOCOMMIT),
    ];
    let (mut session, _log) = ready_session(replies);

    let err = session.execute("SELECT 1").expect_err("must be malformed");
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(session.state(), SessionState::Error);
}

#[test]
fn result_set_header_with_trailing_bytes_is_malformed() {
    let (mut session, _log) = ready_session(vec![vec![0x01, 0x00]]);
    let err = session.execute("SELECT 1").expect_err("must be malformed");
    assert!(matches!(err, Error::Protocol(_)));
}

#[test]
fn result_set_decodes_columns_and_rows() {
    let replies = vec![
        vec![0x01],
        column_packet("gtid_pos"),
        eof(AUTOCOMMIT),
        lenenc(b"0-14716012-2170"),
        lenenc(b"0-14716012-2171"),
        eof(AUTOCOMMIT),
    ];
    let (mut session, _log) = ready_session(replies);

    let reply = session.execute("SELECT @@gtid_slave_pos").expect("query");
    let Reply::ResultSet(rs) = reply else {
        panic!("expected a result set");
    };

    assert_eq!(rs.column_count(), 1);
    assert_eq!(rs.row_count(), 2);
    assert_eq!(rs.column_index("gtid_pos"), Some(0));
    assert_eq!(
        rs.rows()[0].get_by_name("gtid_pos").unwrap().as_str(),
        Some("0-14716012-2170")
    );
    assert_eq!(
        rs.rows()[1].get(0).unwrap().as_str(),
        Some("0-14716012-2171")
    );
    assert!(session.is_ready());
}

#[test]
fn register_slave_command_round_trips() {
    let (mut session, log) = ready_session(vec![ack(AUTOCOMMIT)]);

    session.register_slave().expect("registration");

    let log = log.lock().unwrap();
    let (sequence, payload) = &log.writes[1];
    assert_eq!(*sequence, 0);

    // Decode the fixed layout back out of the written bytes.
    assert_eq!(payload[0], 0x15); // COM_REGISTER_SLAVE
    assert_eq!(
        u32::from_le_bytes(payload[1..5].try_into().unwrap()),
        14_716_013
    );
    let host_len = payload[5] as usize;
    let host = &payload[6..6 + host_len];
    assert_eq!(host, b"10.88.104.18");
    let mut pos = 6 + host_len;
    let user_len = payload[pos] as usize;
    assert_eq!(&payload[pos + 1..pos + 1 + user_len], b"repl");
    pos += 1 + user_len;
    let password_len = payload[pos] as usize;
    assert_eq!(&payload[pos + 1..pos + 1 + password_len], b"repl");
    pos += 1 + password_len;
    assert_eq!(
        u16::from_le_bytes(payload[pos..pos + 2].try_into().unwrap()),
        6012
    );
    pos += 2;
    assert_eq!(&payload[pos..pos + 4], &[0, 0, 0, 0]);
    pos += 4;
    assert_eq!(
        u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()),
        14_716_012
    );
    assert_eq!(payload.len(), pos + 4);

    // The builder produces the identical payload.
    assert_eq!(payload, &build_register_slave_command(session.config()));
}

#[test]
fn bootstrap_prime_runs_the_full_script() {
    let replies = vec![
        ack(AUTOCOMMIT), // registration
        ack(AUTOCOMMIT), // capability
        ack(AUTOCOMMIT), // connect state
        ack(AUTOCOMMIT), // strict mode
    ];
    let (mut session, log) = ready_session(replies);

    ReplicationBootstrap::new(config())
        .with_span(tracing::debug_span!("bootstrap-test"))
        .prime(&mut session)
        .expect("bootstrap");

    let log = log.lock().unwrap();
    let commands: Vec<&[u8]> = log.writes[1..].iter().map(|(_, p)| p.as_slice()).collect();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[0][0], 0x15);
    assert_eq!(&commands[1][1..], b"SET @mariadb_slave_capability = 4");
    assert_eq!(
        &commands[2][1..],
        b"SET @slave_connect_state='0-14716012-2170'"
    );
    assert_eq!(&commands[3][1..], b"SET @slave_gtid_strict_mode = 1");
}

#[test]
fn bootstrap_prime_aborts_on_first_failure() {
    let replies = vec![
        ack(AUTOCOMMIT), // registration succeeds
        server_error(),  // first SET rejected
    ];
    let (mut session, log) = ready_session(replies);

    let err = ReplicationBootstrap::new(config())
        .prime(&mut session)
        .expect_err("bootstrap must abort");
    assert_eq!(err.server_code(), Some(1045));

    // Registration plus one command went out; the later steps did not.
    let log = log.lock().unwrap();
    assert_eq!(log.writes.len(), 3);
}
