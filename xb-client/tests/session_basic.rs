mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use xb_client::{ClientConfig, MessageUnit, Session, UpdateHandler};

use support::spawn_fake_broker;

fn config_for(addr: std::net::SocketAddr) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.hostname = addr.ip().to_string();
    config.port = addr.port();
    config.queue_db_name = std::env::temp_dir().join(format!("xb-client-test-{}.sqlite3", addr.port()));
    config.response_timeout_ms = 2_000;
    config
}

struct CountingHandler {
    received: Arc<Mutex<Vec<MessageUnit>>>,
}

impl UpdateHandler for CountingHandler {
    fn on_update(&self, unit: &MessageUnit) -> Result<(), xb_client::ClientError> {
        self.received.lock().unwrap().push(unit.clone());
        Ok(())
    }
}

#[test]
fn basic_publish_subscribe_round_trip() {
    let broker = spawn_fake_broker();
    let config = config_for(broker.addr);
    let session = Session::new(config).expect("session");

    session.connect("fritz", "").expect("connect");

    let received = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(CountingHandler { received: received.clone() });
    session
        .subscribe("<key oid='HelloWorld'/>", "<qos/>", handler)
        .expect("subscribe");

    session
        .publish("<key oid='HelloWorld'/>", b"Some message payload".to_vec(), "<qos><persistent/></qos>")
        .expect("publish");

    std::thread::sleep(Duration::from_millis(200));

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content, b"Some message payload");

    session.erase("<key oid='HelloWorld'/>", "<qos/>").expect("erase");
    assert!(session.disconnect().expect("disconnect"));
    assert!(!session.disconnect().expect("double disconnect is a no-op"));
}
