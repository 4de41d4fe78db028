use std::io::Cursor;
use std::net::UdpSocket;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use xb_wire::{Frame, FrameBody, FrameType, Method, RequestId};

use crate::controller::ControllerHandle;
use crate::correlator::Correlator;
use crate::router::Router;
use crate::transport::{RecvOutcome, TransportReader, TransportWriter};

/// Oneway traffic only ever carries small `updateOneway`/`publishOneway`
/// bodies; one UDP datagram per frame, so this just needs to comfortably
/// exceed any realistic message-unit size.
const UDP_DATAGRAM_BUF: usize = 65_536;

/// Background reader thread(s) that own the inbound side of the Transport
/// and demultiplex frames (C4, §4.4).
///
/// One reader thread owns the TCP socket; a second, optional thread runs
/// the same loop against the UDP socket when oneway traffic uses it. Both
/// serialize handler invocation through `handler_lock` (§5 "Receiver
/// mutex") so application code never sees concurrent callback delivery.
pub struct Receiver {
    handle: Option<JoinHandle<()>>,
}

impl Receiver {
    /// Spawn the TCP reader loop. `reader` and `writer` come from the same
    /// `transport::connect` call.
    pub fn spawn_tcp(
        mut reader: TransportReader,
        writer: TransportWriter,
        correlator: Correlator,
        router: Router,
        controller: ControllerHandle,
        handler_lock: Arc<Mutex<()>>,
    ) -> Self {
        let handle = thread::Builder::new()
            .name("xb-client-reader".into())
            .spawn(move || {
                run_loop(&mut reader, &writer, &correlator, &router, &controller, &handler_lock);
            })
            .expect("spawn reader thread");

        Receiver { handle: Some(handle) }
    }

    /// Spawn the UDP reader loop, if the transport opened a socket for
    /// oneway traffic (§4.2, §4.4). Shares `handler_lock` with the TCP
    /// receiver so the two never run a handler concurrently (§5 "Receiver
    /// mutex").
    pub fn spawn_udp(socket: UdpSocket, writer: TransportWriter, correlator: Correlator, router: Router, handler_lock: Arc<Mutex<()>>) -> Self {
        let handle = thread::Builder::new()
            .name("xb-client-udp-reader".into())
            .spawn(move || {
                run_udp_loop(&socket, &writer, &correlator, &router, &handler_lock);
            })
            .expect("spawn udp reader thread");

        Receiver { handle: Some(handle) }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// UDP carries oneway traffic only, so unlike the TCP loop there is no EOF
/// to observe and no connection-lost transition to drive from here — a
/// read error just means one datagram was lost, not that the link is down.
/// A datagram lost around a POLLING transition is not resynchronized;
/// oneway delivery over UDP was always best-effort.
fn run_udp_loop(socket: &UdpSocket, writer: &TransportWriter, correlator: &Correlator, router: &Router, handler_lock: &Arc<Mutex<()>>) {
    let mut buf = vec![0u8; UDP_DATAGRAM_BUF];
    loop {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(err) => {
                warn!("udp reader thread error: {}", err);
                return;
            }
        };
        let mut cursor = Cursor::new(&buf[..n]);
        match Frame::decode(&mut cursor) {
            Ok(frame) => {
                if let Err(err) = dispatch(writer, frame, correlator, router, handler_lock) {
                    warn!("error while dispatching inbound udp frame: {}", err);
                }
            }
            Err(err) => warn!("failed to decode udp datagram: {}", err),
        }
    }
}

fn run_loop(
    reader: &mut TransportReader,
    writer: &TransportWriter,
    correlator: &Correlator,
    router: &Router,
    controller: &ControllerHandle,
    handler_lock: &Arc<Mutex<()>>,
) {
    loop {
        match reader.recv_frame() {
            Ok(RecvOutcome::Eof) => {
                debug!("reader saw EOF, failing every outstanding request");
                writer.mark_eof();
                correlator.fail_all();
                controller.notify_connection_lost();
                return;
            }
            Ok(RecvOutcome::Frame(frame)) => {
                if let Err(err) = dispatch(writer, frame, correlator, router, handler_lock) {
                    warn!("error while dispatching inbound frame: {}", err);
                }
            }
            Err(err) => {
                warn!("reader thread I/O error: {}", err);
                writer.mark_eof();
                correlator.fail_all();
                controller.notify_connection_lost();
                return;
            }
        }
    }
}

fn dispatch(
    writer: &TransportWriter,
    frame: Frame,
    correlator: &Correlator,
    router: &Router,
    handler_lock: &Arc<Mutex<()>>,
) -> Result<(), crate::error::ClientError> {
    if frame.frame_type.is_reply() {
        correlator.complete(frame.request_id, frame);
        return Ok(());
    }

    // INVOKE: a callback from the broker.
    let method: Method = match frame.method.parse() {
        Ok(method) => method,
        Err(_) => {
            send_exception(
                writer,
                frame.request_id,
                &frame.secret_session_id,
                "user.update.error",
                &format!("unknown inbound method '{}'", frame.method),
            );
            return Ok(());
        }
    };

    match method {
        Method::Ping => {
            let reply = ping_response(&frame);
            let _ = writer.send_frame(&reply);
        }
        Method::Update | Method::UpdateOneway => {
            let oneway = method.is_inherently_oneway();
            let units = match frame.body {
                FrameBody::Units(units) => units,
                FrameBody::Exception { .. } => Vec::new(),
            };

            let _guard = handler_lock.lock().unwrap();
            let mut failure: Option<String> = None;
            for unit in &units {
                let subscription_id = unit.qos_property("subscriptionId").unwrap_or("").to_owned();
                let handler = router.lookup(&subscription_id);
                match handler {
                    Some(handler) => {
                        if let Err(err) = handler.on_update(unit) {
                            if oneway {
                                warn!("oneway update handler failed: {}", err);
                            } else {
                                failure = Some(err.to_string());
                            }
                        }
                    }
                    None => {
                        // §4.4: "if no handler is registered... respond with a
                        // synthetic OK rather than failing."
                    }
                }
            }
            drop(_guard);

            if !oneway {
                match failure {
                    Some(message) => send_exception(
                        writer,
                        frame.request_id,
                        &frame.secret_session_id,
                        "user.update.error",
                        &message,
                    ),
                    None => {
                        let reply = ok_response(&frame, units.len());
                        let _ = writer.send_frame(&reply);
                    }
                }
            }
        }
        other => {
            send_exception(
                writer,
                frame.request_id,
                &frame.secret_session_id,
                "user.update.error",
                &format!("client does not accept inbound method '{}'", other),
            );
        }
    }

    Ok(())
}

fn ping_response(frame: &Frame) -> Frame {
    let units = match &frame.body {
        FrameBody::Units(units) => units
            .iter()
            .map(|u| xb_wire::MessageUnit::new(u.key.clone(), Vec::new(), "<qos><state id='OK'/></qos>"))
            .collect(),
        FrameBody::Exception { .. } => Vec::new(),
    };
    Frame::new(
        FrameType::Response,
        frame.request_id,
        frame.method.clone(),
        frame.secret_session_id.clone(),
        FrameBody::Units(units),
    )
}

fn ok_response(frame: &Frame, unit_count: usize) -> Frame {
    let units = (0..unit_count)
        .map(|_| xb_wire::MessageUnit::new("", Vec::new(), "<qos><state id='OK'/></qos>"))
        .collect();
    Frame::new(
        FrameType::Response,
        frame.request_id,
        frame.method.clone(),
        frame.secret_session_id.clone(),
        FrameBody::Units(units),
    )
}

fn send_exception(writer: &TransportWriter, request_id: RequestId, secret_session_id: &str, error_code: &str, message: &str) {
    let frame = Frame::new(
        FrameType::Exception,
        request_id,
        "update",
        secret_session_id,
        FrameBody::Exception {
            error_code: error_code.to_owned(),
            message: message.to_owned(),
        },
    );
    let _ = writer.send_frame(&frame);
}
