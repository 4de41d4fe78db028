mod support;

use std::time::Duration;

use xb_client::{ClientConfig, ClientError, ConnState, Session};

use support::spawn_fake_broker_dropping_after_connect;

fn config_for(addr: std::net::SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.hostname = addr.ip().to_string();
    config.port = addr.port();
    config.queue_db_name = std::env::temp_dir().join(format!("xb-client-test-{}.sqlite3", addr.port()));
    config.response_timeout_ms = 500;
    config
}

/// §8 scenario 5: connection lost, failsafe disabled (`delay_ms == 0`) —
/// the Controller gives up and transitions straight to DEAD.
#[test]
fn connection_lost_without_failsafe_goes_dead() {
    let broker = spawn_fake_broker_dropping_after_connect();
    let mut config = config_for(broker.addr);
    config.delay_ms = 0;
    let session = Session::new(config).expect("session");

    session.connect("fritz", "").expect("connect");

    // The broker has already closed its end; give the reader thread a
    // moment to observe EOF and drive the DEAD transition.
    std::thread::sleep(Duration::from_millis(200));

    let err = session
        .publish("<key oid='HelloWorld'/>", b"payload".to_vec(), "<qos/>")
        .expect_err("publish after the link died without failsafe must fail");
    assert!(matches!(err, ClientError::NoConnectionDead));
    assert_eq!(session.state(), ConnState::Dead);
}

/// §8 scenario 4: connection lost, failsafe enabled (`delay_ms > 0`) — a
/// queueable publish is accepted into the persistent queue instead of
/// failing outright, and the Controller moves to POLLING.
#[test]
fn connection_lost_with_failsafe_enqueues_publish() {
    let broker = spawn_fake_broker_dropping_after_connect();
    let mut config = config_for(broker.addr);
    config.delay_ms = 60_000; // long enough that the reconnect timer doesn't fire mid-test
    config.retries = 5;
    let session = Session::new(config).expect("session");

    session.connect("fritz", "").expect("connect");
    std::thread::sleep(Duration::from_millis(200));

    let ack = session
        .publish("<key oid='HelloWorld'/>", b"queued payload".to_vec(), "<qos/>")
        .expect("publish must be accepted into the queue, not fail");
    assert!(ack.qos.contains("QUEUED"));
    assert_eq!(session.state(), ConnState::Polling);
}
