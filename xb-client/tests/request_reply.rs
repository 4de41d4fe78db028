mod support;

use std::time::Duration;

use xb_client::{ClientConfig, Session};

use support::{spawn_fake_broker, spawn_fake_broker_never_updates};

fn config_for(addr: std::net::SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.hostname = addr.ip().to_string();
    config.port = addr.port();
    config.queue_db_name = std::env::temp_dir().join(format!("xb-client-test-{}.sqlite3", addr.port()));
    config.response_timeout_ms = 2_000;
    config
}

/// §8 scenario 6: temporary-topic request/reply — `Session::request` must
/// return the reply and always clean up its temporary subscription/topic.
#[test]
fn request_returns_single_reply_and_erases_temp_topic() {
    let broker = spawn_fake_broker();
    let config = config_for(broker.addr);
    let session = Session::new(config).expect("session");

    session.connect("fritz", "").expect("connect");

    let replies = session
        .request("<key oid='Echo'/>", b"ping".to_vec(), Duration::from_secs(2), 10)
        .expect("request/reply round trip");

    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].content, b"ping");

    assert!(session.disconnect().expect("disconnect"));
}

/// A request against a broker that never answers must time out rather than
/// hang forever, and must still leave the session usable afterward.
#[test]
fn request_times_out_when_nobody_replies() {
    // This broker acks the publish itself but never pushes an `update` back,
    // so the subscribe handler inside `request` never fires and the call
    // must time out rather than hang or spuriously succeed.
    let broker = spawn_fake_broker_never_updates();
    let config = config_for(broker.addr);
    let session = Session::new(config).expect("session");

    session.connect("fritz", "").expect("connect");

    let err = session.request("<key oid='Nobody'/>", Vec::new(), Duration::from_millis(200), 10);
    assert!(err.is_err());
}
