use std::io::Cursor;

use xb_wire::{Frame, FrameBody, FrameType, MessageUnit, RequestId};

#[test]
fn invoke_with_multiple_units_round_trips() {
    let units = vec![
        MessageUnit::new("<key oid='HelloWorld'/>", b"first payload".to_vec(), "<qos/>"),
        MessageUnit::new(
            "<key oid='Other'/>",
            b"second\0payload\0with\0nuls".to_vec(),
            "<qos><clientProperty name='subscriptionId'>sub-1</clientProperty></qos>",
        ),
    ];
    let frame = Frame::new(FrameType::Invoke, RequestId::new(42), "publish", "sess-abc", FrameBody::Units(units.clone()));

    let encoded = frame.encode();
    let mut cursor = Cursor::new(encoded);
    let decoded = Frame::decode(&mut cursor).expect("decode");

    assert_eq!(decoded.frame_type, FrameType::Invoke);
    assert_eq!(decoded.request_id, RequestId::new(42));
    assert_eq!(decoded.method, "publish");
    assert_eq!(decoded.secret_session_id, "sess-abc");
    match decoded.body {
        FrameBody::Units(decoded_units) => assert_eq!(decoded_units, units),
        FrameBody::Exception { .. } => panic!("expected Units body"),
    }
}

#[test]
fn exception_frame_round_trips() {
    let frame = Frame::new(
        FrameType::Exception,
        RequestId::new(7),
        "connect",
        "",
        FrameBody::Exception {
            error_code: "user.notConnected".to_owned(),
            message: "no active session".to_owned(),
        },
    );

    let encoded = frame.encode();
    let mut cursor = Cursor::new(encoded);
    let decoded = Frame::decode(&mut cursor).expect("decode");

    assert!(decoded.frame_type.is_reply());
    match decoded.body {
        FrameBody::Exception { error_code, message } => {
            assert_eq!(error_code, "user.notConnected");
            assert_eq!(message, "no active session");
        }
        FrameBody::Units(_) => panic!("expected Exception body"),
    }
}

#[test]
fn decode_stops_cleanly_on_truncated_input() {
    let frame = Frame::new(
        FrameType::Response,
        RequestId::new(1),
        "get",
        "sess-1",
        FrameBody::Units(vec![MessageUnit::new("<key/>", vec![1, 2, 3], "<qos/>")]),
    );
    let mut encoded = frame.encode();
    encoded.truncate(encoded.len() - 5);

    let mut cursor = Cursor::new(encoded);
    assert!(Frame::decode(&mut cursor).is_err());
}

#[test]
fn two_frames_back_to_back_decode_independently() {
    let first = Frame::new(FrameType::Invoke, RequestId::new(1), "ping", "sess-1", FrameBody::Units(vec![]));
    let second = Frame::new(
        FrameType::Response,
        RequestId::new(1),
        "ping",
        "sess-1",
        FrameBody::Units(vec![MessageUnit::new("", vec![], "<qos><state id='OK'/></qos>")]),
    );

    let mut combined = first.encode();
    combined.extend(second.encode());
    let mut cursor = Cursor::new(combined);

    let decoded_first = Frame::decode(&mut cursor).expect("first frame");
    let decoded_second = Frame::decode(&mut cursor).expect("second frame");

    assert_eq!(decoded_first.frame_type, FrameType::Invoke);
    assert_eq!(decoded_second.frame_type, FrameType::Response);
}
