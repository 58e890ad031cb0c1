//! Length-prefixed framing shared by the backend and the viewer.
//!
//! Layout of one frame:
//! - len: u32, little-endian
//! - payload: `len` bytes of UTF-8 JSON (`{"schema": ..., "data": ...}`)
//!
//! Readers never consume bytes past the announced length; whatever follows stays
//! buffered for the next frame.

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::schema::Message;

pub const LEN_PREFIX_BYTES: usize = 4;

/// Upper bound for a single payload unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("payload is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown schema `{0}`")]
    UnknownSchema(String),
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
    #[error("payload of {0} bytes does not fit a u32 length prefix")]
    PayloadTooLarge(usize),
}

impl WireError {
    /// Protocol errors drop one message; everything else ends the connection.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            WireError::Utf8(_) | WireError::Json(_) | WireError::UnknownSchema(_)
        )
    }
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_u32_le<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; LEN_PREFIX_BYTES];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
    let mut out = Vec::with_capacity(LEN_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn write_frame<W: Write>(w: &mut W, payload: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
    write_u32_le(w, len)?;
    w.write_all(payload)?;
    Ok(())
}

/// Blocking read of exactly one frame.
pub fn read_frame<R: Read>(r: &mut R, max_frame: usize) -> Result<Vec<u8>, WireError> {
    let len = read_u32_le(r)? as usize;
    if len > max_frame {
        return Err(WireError::FrameTooLarge {
            len,
            max: max_frame,
        });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize and frame a message in one go.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, WireError> {
    encode_frame(&msg.to_payload()?)
}

pub fn write_message<W: Write>(w: &mut W, msg: &Message) -> Result<(), WireError> {
    w.write_all(&encode_message(msg)?)?;
    w.flush()?;
    Ok(())
}

/// Accumulates bytes from successive `recv` calls and yields complete frames.
///
/// A frame split across reads stays buffered until its last byte arrives.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame: usize,
    accept_unframed_first: bool,
    frames_seen: u64,
}

impl FrameBuffer {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
            accept_unframed_first: false,
            frames_seen: 0,
        }
    }

    /// Accept one bare JSON object (no length prefix) as the very first frame.
    ///
    /// Older viewers sent their handshake request this way.
    pub fn with_unframed_handshake(mut self, accept: bool) -> Self {
        self.accept_unframed_first = accept;
        self
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pop the next complete payload, if one is fully buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        if self.accept_unframed_first && self.frames_seen == 0 && self.buf.first() == Some(&b'{') {
            return self.next_unframed();
        }

        if self.buf.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }
        let mut prefix = [0u8; LEN_PREFIX_BYTES];
        prefix.copy_from_slice(&self.buf[..LEN_PREFIX_BYTES]);
        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.max_frame {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame,
            });
        }
        let end = LEN_PREFIX_BYTES + len;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[LEN_PREFIX_BYTES..end].to_vec();
        self.buf.drain(..end);
        self.frames_seen += 1;
        Ok(Some(payload))
    }

    fn next_unframed(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let mut stream =
            serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(_)) => {
                let end = stream.byte_offset();
                let payload = self.buf[..end].to_vec();
                self.buf.drain(..end);
                self.frames_seen += 1;
                Ok(Some(payload))
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buf.len() > self.max_frame {
                    return Err(WireError::FrameTooLarge {
                        len: self.buf.len(),
                        max: self.max_frame,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => {
                self.buf.clear();
                Err(WireError::Json(e))
            }
            None => Ok(None),
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Message, Observe};

    #[test]
    fn frame_roundtrip_over_arbitrary_utf8() {
        for payload in ["", "a", "{\"schema\":\"x\"}", "ünïcødé ✓ 🧠"] {
            let framed = encode_frame(payload.as_bytes()).unwrap();
            assert_eq!(framed.len(), LEN_PREFIX_BYTES + payload.len());
            let back = read_frame(&mut framed.as_slice(), DEFAULT_MAX_FRAME_BYTES).unwrap();
            assert_eq!(String::from_utf8(back).unwrap(), payload);
        }
    }

    #[test]
    fn prefix_is_little_endian() {
        let framed = encode_frame(&[7u8; 258]).unwrap();
        assert_eq!(&framed[..4], &[2, 1, 0, 0]);
    }

    #[test]
    fn partial_frames_are_carried_across_reads() {
        let msg = Message::Observe(Observe {
            source: "b".to_string(),
            access_path: "probeable.decoded_output".to_string(),
            sample_every: 1,
            dt: 0.001,
        });
        let mut bytes = encode_message(&msg).unwrap();
        bytes.extend(encode_message(&Message::NetworkSchema(None)).unwrap());

        let mut fb = FrameBuffer::default();
        let mut frames = Vec::new();
        for chunk in bytes.chunks(3) {
            fb.extend(chunk);
            while let Some(frame) = fb.next_frame().unwrap() {
                frames.push(Message::from_payload(&frame).unwrap());
            }
        }
        assert_eq!(frames, vec![msg, Message::NetworkSchema(None)]);
        assert_eq!(fb.buffered(), 0);
    }

    #[test]
    fn reader_stops_at_announced_length() {
        let mut bytes = encode_frame(b"abc").unwrap();
        bytes.extend_from_slice(b"trailing");
        let mut fb = FrameBuffer::default();
        fb.extend(&bytes);
        assert_eq!(fb.next_frame().unwrap().unwrap(), b"abc");
        assert_eq!(fb.buffered(), "trailing".len());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut fb = FrameBuffer::new(8);
        fb.extend(&encode_frame(&[0u8; 9]).unwrap());
        assert!(matches!(
            fb.next_frame(),
            Err(WireError::FrameTooLarge { len: 9, max: 8 })
        ));
    }

    #[test]
    fn unframed_handshake_only_when_enabled() {
        let raw = br#"{"schema":"NetworkSchema","data":null}"#;

        let mut fb = FrameBuffer::default().with_unframed_handshake(true);
        fb.extend(&raw[..10]);
        assert!(fb.next_frame().unwrap().is_none());
        fb.extend(&raw[10..]);
        fb.extend(&encode_frame(b"{}").unwrap());
        assert_eq!(fb.next_frame().unwrap().unwrap(), raw.to_vec());
        // Later frames must be prefixed.
        assert_eq!(fb.next_frame().unwrap().unwrap(), b"{}");

        let mut strict = FrameBuffer::default();
        strict.extend(raw);
        // `{"sc` read as a length prefix is far beyond the default limit.
        assert!(strict.next_frame().is_err());
    }
}
