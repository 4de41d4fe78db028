use std::io::Read;
use std::str;

use bytes::{BufMut, BytesMut};
use nom::{
    bytes::complete::{tag, take, take_till},
    combinator::all_consuming,
    multi::many0,
    IResult,
};

use crate::error::FrameError;
use crate::message::MessageUnit;
use crate::request_id::RequestId;

/// Protocol version marker written into byte 13 of every frame (§6.1).
pub const PROTOCOL_VERSION: u8 = b'1';

const LENGTH_FIELD_WIDTH: usize = 10;
/// checksum flag + compression flag + type byte + version byte.
const FIXED_FLAGS_WIDTH: usize = 4;

/// One self-delimited wire unit: `INVOKE`, `RESPONSE`, or `EXCEPTION` (§3, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Invoke,
    Response,
    Exception,
}

impl FrameType {
    fn to_byte(self) -> u8 {
        match self {
            FrameType::Invoke => b'I',
            FrameType::Response => b'R',
            FrameType::Exception => b'E',
        }
    }

    fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            b'I' => Ok(FrameType::Invoke),
            b'R' => Ok(FrameType::Response),
            b'E' => Ok(FrameType::Exception),
            other => Err(FrameError::UnknownType(other)),
        }
    }

    /// A RESPONSE or EXCEPTION frame never itself provokes a reply — the
    /// frame-type half of the oneway rule in §3 ("oneway... for the
    /// response/exception frame types themselves").
    pub fn is_reply(self) -> bool {
        matches!(self, FrameType::Response | FrameType::Exception)
    }
}

/// Frame body, variant on `frame_type` (§3, §6.1/§6.2).
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// Concatenation of message units; carried by INVOKE and RESPONSE frames.
    Units(Vec<MessageUnit>),
    /// Carried by EXCEPTION frames only.
    Exception { error_code: String, message: String },
}

/// One wire-level frame: header + body (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub request_id: RequestId,
    /// Kept as the raw method string at this layer — an inbound callback
    /// method the client doesn't recognize is still a well-formed frame;
    /// rejecting unknown methods is `xb-client`'s job, not the codec's.
    pub method: String,
    pub secret_session_id: String,
    pub body: FrameBody,
}

impl Frame {
    pub fn new(
        frame_type: FrameType,
        request_id: RequestId,
        method: impl Into<String>,
        secret_session_id: impl Into<String>,
        body: FrameBody,
    ) -> Self {
        Frame {
            frame_type,
            request_id,
            method: method.into(),
            secret_session_id: secret_session_id.into(),
            body,
        }
    }

    /// Encode this frame to bytes. The `totalLen` prefix is computed from
    /// the fully constructed body, per §4.1 ("encoder must be called with
    /// the exact length of body precomputed" — here we build the body
    /// first and derive the length from it, so the caller never has to).
    pub fn encode(&self) -> Vec<u8> {
        let body_bytes = match &self.body {
            FrameBody::Units(units) => encode_units(units),
            FrameBody::Exception { error_code, message } => encode_exception(error_code, message),
        };

        let mut tail = BytesMut::with_capacity(body_bytes.len() + 64);
        put_nul_str(&mut tail, &self.request_id.to_string());
        put_nul_str(&mut tail, &self.method);
        put_nul_str(&mut tail, &self.secret_session_id);
        tail.put_slice(&body_bytes);
        tail.put_u8(0); // reserved checksum byte

        let total_len = LENGTH_FIELD_WIDTH + FIXED_FLAGS_WIDTH + tail.len();

        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(format!("{:0width$}", total_len, width = LENGTH_FIELD_WIDTH).as_bytes());
        out.push(0); // checksum flag, reserved
        out.push(0); // compression flag, reserved
        out.push(self.frame_type.to_byte());
        out.push(PROTOCOL_VERSION);
        out.extend_from_slice(&tail);

        debug_assert_eq!(out.len(), total_len, "totalLen must equal actual bytes written");
        out
    }

    /// Decode one frame from `reader`, reading exactly as many bytes as
    /// the length prefix declares (§4.1).
    pub fn decode(reader: &mut impl Read) -> Result<Self, FrameError> {
        let mut len_buf = [0u8; LENGTH_FIELD_WIDTH];
        reader.read_exact(&mut len_buf)?;

        let total_len = parse_total_len(&len_buf)?;
        if total_len < (LENGTH_FIELD_WIDTH + FIXED_FLAGS_WIDTH) as u64 {
            return Err(FrameError::LengthMismatch {
                declared: total_len,
                actual: LENGTH_FIELD_WIDTH as u64,
            });
        }

        let remaining = (total_len as usize) - LENGTH_FIELD_WIDTH;
        let mut buf = vec![0u8; remaining];
        reader.read_exact(&mut buf)?;

        trace!("read frame: totalLen={} remaining={}", total_len, remaining);

        Self::parse(&buf)
    }

    fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FIXED_FLAGS_WIDTH {
            return Err(FrameError::Truncated {
                need: FIXED_FLAGS_WIDTH,
                got: buf.len(),
            });
        }

        let (flags, rest) = buf.split_at(FIXED_FLAGS_WIDTH);
        let _checksum_flag = flags[0];
        let _compression_flag = flags[1];
        let frame_type = FrameType::from_byte(flags[2])?;
        let _version = flags[3];

        let (rest, request_id_str) = nul_str("requestId")(rest)?;
        let (rest, method) = nul_str("method")(rest)?;
        let (rest, secret_session_id) = nul_str("secretSessionId")(rest)?;

        if rest.is_empty() {
            return Err(FrameError::Truncated { need: 1, got: 0 });
        }
        // Last byte is the reserved trailing checksum byte; everything
        // before it is the body.
        let body_bytes = &rest[..rest.len() - 1];

        let request_id: RequestId = request_id_str.parse()?;

        let body = match frame_type {
            FrameType::Exception => decode_exception(body_bytes)?,
            FrameType::Invoke | FrameType::Response => decode_units(body_bytes)?,
        };

        Ok(Frame {
            frame_type,
            request_id,
            method: method.to_owned(),
            secret_session_id: secret_session_id.to_owned(),
            body,
        })
    }
}

fn parse_total_len(digits: &[u8]) -> Result<u64, FrameError> {
    let s = str::from_utf8(digits).map_err(|_| FrameError::InvalidLength(digits.to_vec()))?;
    s.trim()
        .parse::<u64>()
        .map_err(|_| FrameError::InvalidLength(digits.to_vec()))
}

fn put_nul_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn nul_str<'a>(field: &'static str) -> impl Fn(&'a [u8]) -> Result<(&'a [u8], &'a str), FrameError> {
    move |input: &'a [u8]| -> Result<(&'a [u8], &'a str), FrameError> {
        let parsed: IResult<&[u8], &[u8]> = take_till(|b| b == 0u8)(input);
        let (rest, bytes) = parsed.map_err(|_| FrameError::UnterminatedField { field })?;
        let parsed: IResult<&[u8], &[u8]> = tag(&[0u8][..])(rest);
        let (rest, _) = parsed.map_err(|_| FrameError::UnterminatedField { field })?;
        let s = str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8 { field })?;
        Ok((rest, s))
    }
}

fn parse_unit(input: &[u8]) -> IResult<&[u8], MessageUnit> {
    let (input, qos) = take_till(|b| b == 0u8)(input)?;
    let (input, _) = tag(&[0u8][..])(input)?;
    let (input, key) = take_till(|b| b == 0u8)(input)?;
    let (input, _) = tag(&[0u8][..])(input)?;
    let (input, len_bytes) = take_till(|b| b == 0u8)(input)?;
    let (input, _) = tag(&[0u8][..])(input)?;

    let len_str = str::from_utf8(len_bytes).unwrap_or("");
    let content_len: usize = len_str.parse().unwrap_or(0);
    let (input, content) = take(content_len)(input)?;

    Ok((
        input,
        MessageUnit {
            key: String::from_utf8_lossy(key).into_owned(),
            qos: String::from_utf8_lossy(qos).into_owned(),
            content: content.to_vec(),
        },
    ))
}

fn decode_units(input: &[u8]) -> Result<FrameBody, FrameError> {
    let parsed: IResult<&[u8], Vec<MessageUnit>> = all_consuming(many0(parse_unit))(input);
    match parsed {
        Ok((_, units)) => Ok(FrameBody::Units(units)),
        Err(_) => Err(FrameError::ContentLengthOverflow {
            declared: 0,
            available: input.len(),
        }),
    }
}

fn decode_exception(input: &[u8]) -> Result<FrameBody, FrameError> {
    let (rest, error_code) = nul_str("errorCode")(input)?;
    if rest.len() < 4 {
        return Err(FrameError::Truncated {
            need: 4,
            got: rest.len(),
        });
    }
    let message_bytes = &rest[4..];
    let message = String::from_utf8_lossy(message_bytes).into_owned();
    Ok(FrameBody::Exception {
        error_code: error_code.to_owned(),
        message,
    })
}

fn encode_units(units: &[MessageUnit]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for unit in units {
        put_nul_str(&mut buf, &unit.qos);
        put_nul_str(&mut buf, &unit.key);
        put_nul_str(&mut buf, &unit.content.len().to_string());
        buf.put_slice(&unit.content);
    }
    buf.to_vec()
}

fn encode_exception(error_code: &str, message: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    put_nul_str(&mut buf, error_code);
    buf.put_slice(&[0u8; 4]);
    buf.put_slice(message.as_bytes());
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_units_frame() -> Frame {
        Frame::new(
            FrameType::Invoke,
            RequestId::new(7),
            "publish",
            "sess-1",
            FrameBody::Units(vec![MessageUnit::new(
                "<key oid='HelloWorld'/>",
                b"Some message payload".to_vec(),
                "<qos/>",
            )]),
        )
    }

    #[test]
    fn total_len_equals_actual_bytes() {
        let bytes = sample_units_frame().encode();
        let declared: u64 = str::from_utf8(&bytes[..10]).unwrap().parse().unwrap();
        assert_eq!(declared, bytes.len() as u64);
    }

    #[test]
    fn round_trips_through_decode() {
        let frame = sample_units_frame();
        let bytes = frame.encode();
        let mut cursor = Cursor::new(bytes);
        let decoded = Frame::decode(&mut cursor).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn zero_length_content_round_trips() {
        let frame = Frame::new(
            FrameType::Invoke,
            RequestId::new(1),
            "erase",
            "sess-1",
            FrameBody::Units(vec![MessageUnit::new("<key oid='X'/>", Vec::new(), "<qos/>")]),
        );
        let mut cursor = Cursor::new(frame.encode());
        let decoded = Frame::decode(&mut cursor).unwrap();
        assert_eq!(decoded.body, frame.body);
    }

    #[test]
    fn content_with_embedded_nul_is_preserved() {
        let content = vec![1u8, 0u8, 2u8, 0u8, 3u8];
        let frame = Frame::new(
            FrameType::Invoke,
            RequestId::new(2),
            "publish",
            "sess-1",
            FrameBody::Units(vec![MessageUnit::new("<key oid='X'/>", content.clone(), "<qos/>")]),
        );
        let mut cursor = Cursor::new(frame.encode());
        let decoded = Frame::decode(&mut cursor).unwrap();
        match decoded.body {
            FrameBody::Units(units) => assert_eq!(units[0].content, content),
            _ => panic!("expected Units body"),
        }
    }

    #[test]
    fn exception_frame_round_trips() {
        let frame = Frame::new(
            FrameType::Exception,
            RequestId::new(3),
            "publish",
            "sess-1",
            FrameBody::Exception {
                error_code: "user.update.error".to_owned(),
                message: "handler failed".to_owned(),
            },
        );
        let mut cursor = Cursor::new(frame.encode());
        let decoded = Frame::decode(&mut cursor).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let mut bytes = sample_units_frame().encode();
        bytes[12] = b'X';
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            Frame::decode(&mut cursor),
            Err(FrameError::UnknownType(b'X'))
        ));
    }

    #[test]
    fn large_length_is_accepted() {
        // Accept lengths that would overflow a 32-bit field — up to 2^62 per §4.1.
        let huge = 4_000_000_000_000u64;
        let formatted = format!("{:010}", huge);
        assert_eq!(formatted.len(), 13); // wider than 10 digits, still parseable
        assert_eq!(parse_total_len(formatted.as_bytes()).unwrap(), huge);
    }
}
