use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use hexplay::HexViewBuilder;
use xb_wire::Frame;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Outcome of one `recv_frame` call (§4.2: "On EOF, `recvFrame` returns a
/// distinguished end marker").
pub enum RecvOutcome {
    Frame(Frame),
    Eof,
}

struct WriterState {
    write_half: Box<dyn Write + Send>,
    udp: Option<UdpSocket>,
    eof: bool,
}

/// The writable half of a connection, cheaply cloneable so both the
/// invocation path (C7, under the invocation mutex) and the reader thread
/// (C4, replying to inbound pings/updates) can send frames without racing
/// on the underlying socket (§4.2: "at most one writer thread... without
/// external locking; the core uses the Correlator to serialize writers").
///
/// Built around a `TryClone`-style split between read and write halves of
/// one `TcpStream`, with an internal mutex added since here two independent
/// call sites legitimately need to write.
#[derive(Clone)]
pub struct TransportWriter {
    inner: Arc<Mutex<WriterState>>,
    raw: TcpStream,
}

impl TransportWriter {
    /// Write one frame to the TCP socket (§4.2).
    pub fn send_frame(&self, frame: &Frame) -> Result<(), ClientError> {
        let mut state = self.inner.lock().unwrap();
        if state.eof {
            return Err(ClientError::NoConnection);
        }
        let bytes = frame.encode();
        trace!("send {} bytes:\n{}", bytes.len(), HexViewBuilder::new(&bytes).finish());
        if let Err(e) = state.write_half.write_all(&bytes).and_then(|_| state.write_half.flush()) {
            state.eof = true;
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Write one frame to the UDP socket for oneway traffic, falling back
    /// to TCP if no UDP socket was opened.
    pub fn send_frame_udp(&self, frame: &Frame) -> Result<(), ClientError> {
        let state = self.inner.lock().unwrap();
        match &state.udp {
            Some(socket) => {
                socket.send(&frame.encode())?;
                Ok(())
            }
            None => {
                drop(state);
                self.send_frame(frame)
            }
        }
    }

    pub fn mark_eof(&self) {
        self.inner.lock().unwrap().eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.inner.lock().unwrap().eof
    }

    pub fn shutdown(&self) {
        self.mark_eof();
        let _ = self.raw.shutdown(std::net::Shutdown::Both);
    }
}

/// The readable half of a connection; owned exclusively by the Callback
/// Receiver thread (C4) after `Transport::connect` splits the pair.
pub struct TransportReader {
    read_half: Box<dyn Read + Send>,
    udp: Option<UdpSocket>,
    peer_addr: SocketAddr,
}

impl TransportReader {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Read one frame from the TCP stream, bounded by the codec's own
    /// framing. `Ok(Eof)` on a clean connection close (§4.2).
    pub fn recv_frame(&mut self) -> Result<RecvOutcome, ClientError> {
        match Frame::decode(&mut self.read_half) {
            Ok(frame) => Ok(RecvOutcome::Frame(frame)),
            Err(xb_wire::FrameError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(RecvOutcome::Eof),
            Err(e) => Err(ClientError::Frame(e)),
        }
    }

    /// Takes ownership of the UDP socket, if one was opened, so the
    /// Receiver can spin up a second reader loop over it (§4.4: "If the
    /// UDP socket is active, a second receiver runs the same loop on
    /// UDP"). Leaves `None` behind so a second call is a no-op.
    pub fn take_udp(&mut self) -> Option<UdpSocket> {
        self.udp.take()
    }
}

/// Establish the TCP connection (resolving `hostname:port` the normal way
/// — `ToSocketAddrs` already falls back to a literal IPv4/IPv6 parse
/// before DNS) and an optional UDP socket, returning the write/read halves
/// split for independent ownership.
///
/// `local_hostname`/`local_port` (§6.4) are accepted on [`ClientConfig`]
/// but not wired to a pre-bind socket here: binding the outgoing socket to
/// a specific local address/port would need a lower-level socket builder
/// than a literal `std::net::TcpStream::connect` call, so these two fields
/// are accepted and stored but not yet acted on, same as the `tablePrefix`
/// precedent in `config.rs`.
pub fn connect(config: &ClientConfig) -> Result<(TransportWriter, TransportReader), ClientError> {
    let addr = (config.hostname.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| ClientError::Connect(format!("failed to resolve {}:{}: {}", config.hostname, config.port, e)))?
        .next()
        .ok_or_else(|| ClientError::Connect(format!("no address for {}:{}", config.hostname, config.port)))?;

    let stream = TcpStream::connect(addr).map_err(|e| ClientError::Connect(format!("connect to {} failed: {}", addr, e)))?;
    stream.set_nodelay(true).ok();

    let udp = if config.use_udp_for_oneway {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(addr)?;
        Some(socket)
    } else {
        None
    };

    let compressed = config.compress_type.as_deref() == Some("zlib:stream");

    let read_clone = stream.try_clone()?;
    let write_clone = stream.try_clone()?;
    let udp_for_reader = udp.as_ref().map(|s| s.try_clone()).transpose()?;

    let (read_half, write_half): (Box<dyn Read + Send>, Box<dyn Write + Send>) = if compressed {
        (Box::new(ZlibDecoder::new(read_clone)), Box::new(ZlibEncoder::new(write_clone, Compression::default())))
    } else {
        (Box::new(read_clone), Box::new(write_clone))
    };

    info!("connected to {} (udp={}, compressed={})", addr, udp.is_some(), compressed);

    let writer = TransportWriter {
        inner: Arc::new(Mutex::new(WriterState { write_half, udp, eof: false })),
        raw: stream,
    };
    let reader = TransportReader { read_half, udp: udp_for_reader, peer_addr: addr };

    Ok((writer, reader))
}
