use std::net::{TcpListener, TcpStream};
use std::thread;

use xb_wire::{Frame, FrameBody, FrameType, Method, MessageUnit, RequestId, RequestIdGenerator};

/// A minimal fake broker speaking the wire protocol directly, standing in
/// for a real xmlBlaster-style server in integration tests — the
/// loopback-TCP equivalent of the mock transport described for this
/// crate's test tooling, since [`xb_client`]'s `Transport` is written
/// directly against `std::net` rather than an injectable I/O trait.
pub struct FakeBroker {
    pub addr: std::net::SocketAddr,
}

pub fn spawn_fake_broker() -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local_addr");

    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            broker_loop(stream, true);
        }
    });

    FakeBroker { addr }
}

/// Like [`spawn_fake_broker`], but never pushes an `update` frame for a
/// publish even when a subscription is active — acks the publish itself and
/// stops there. Stands in for a broker that accepted the message but whose
/// subscriber-side delivery never shows up.
pub fn spawn_fake_broker_never_updates() -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local_addr");

    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            broker_loop(stream, false);
        }
    });

    FakeBroker { addr }
}

/// A broker that replies to exactly one `connect` and then drops the
/// connection without sending anything else — stands in for a severed
/// network link so tests can exercise `on_comm_failure` without relying on
/// a real outage.
pub fn spawn_fake_broker_dropping_after_connect() -> FakeBroker {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local_addr");

    thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            let mut stream = stream;
            if let Ok(frame) = Frame::decode(&mut stream) {
                let reply = Frame::new(
                    FrameType::Response,
                    frame.request_id,
                    "connect",
                    "sess-1",
                    FrameBody::Units(vec![MessageUnit::new("client/fritz/session/1", Vec::new(), "<qos/>")]),
                );
                write_frame(&mut stream, &reply);
            }
            // Dropping `stream` here closes the socket, which the client
            // observes as EOF on its next read.
        }
    });

    FakeBroker { addr }
}

fn broker_loop(mut stream: TcpStream, echo_updates: bool) {
    let ids = RequestIdGenerator::new();
    let mut subscription_id: Option<String> = None;

    loop {
        let frame = match Frame::decode(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };

        if frame.frame_type.is_reply() {
            // An ack for one of our own update pushes; nothing to do.
            continue;
        }

        let method: Method = match frame.method.parse() {
            Ok(m) => m,
            Err(_) => continue,
        };

        match method {
            Method::Connect => {
                let reply = Frame::new(
                    FrameType::Response,
                    frame.request_id,
                    "connect",
                    "sess-1",
                    FrameBody::Units(vec![MessageUnit::new(
                        "client/fritz/session/1",
                        Vec::new(),
                        "<qos/>",
                    )]),
                );
                write_frame(&mut stream, &reply);
            }
            Method::Subscribe => {
                subscription_id = Some("sub1".to_owned());
                let reply = Frame::new(
                    FrameType::Response,
                    frame.request_id,
                    "subscribe",
                    "sess-1",
                    FrameBody::Units(vec![MessageUnit::new("", Vec::new(), "<qos><subscribe id='sub1'/></qos>")]),
                );
                write_frame(&mut stream, &reply);
            }
            Method::Publish => {
                if echo_updates {
                if let FrameBody::Units(units) = &frame.body {
                    for unit in units {
                        if let Some(sub_id) = &subscription_id {
                            let update = Frame::new(
                                FrameType::Invoke,
                                ids.next(),
                                "update",
                                "sess-1",
                                FrameBody::Units(vec![MessageUnit::new(
                                    unit.key.clone(),
                                    unit.content.clone(),
                                    format!("<qos><clientProperty name='subscriptionId'>{}</clientProperty></qos>", sub_id),
                                )]),
                            );
                            write_frame(&mut stream, &update);
                            // consume the client's response/ack for our push
                            let _ = Frame::decode(&mut stream);
                        }
                    }
                }
                }
                let reply = Frame::new(
                    FrameType::Response,
                    frame.request_id,
                    "publish",
                    "sess-1",
                    FrameBody::Units(vec![MessageUnit::new("", Vec::new(), "<qos><state id='OK'/></qos>")]),
                );
                write_frame(&mut stream, &reply);
            }
            Method::Erase => {
                let reply = Frame::new(FrameType::Response, frame.request_id, "erase", "sess-1", FrameBody::Units(vec![]));
                write_frame(&mut stream, &reply);
            }
            Method::Ping => {
                let reply = Frame::new(FrameType::Response, frame.request_id, "ping", "sess-1", FrameBody::Units(vec![]));
                write_frame(&mut stream, &reply);
            }
            Method::Disconnect => return,
            _ => {
                let _ = RequestId::new(0);
            }
        }
    }
}

fn write_frame(stream: &mut TcpStream, frame: &Frame) {
    use std::io::Write;
    let _ = stream.write_all(&frame.encode());
    let _ = stream.flush();
}
