//! Frame codec for the link wire protocol.
//!
//! One frame per logical message, all integers big-endian:
//!
//! ```text
//! [u16: name len][UTF-8 method name]   empty name => response frame
//! [i32: call id]                       response: negative => exception
//! [u16: arg count]
//! repeated arg count times:
//!   [i32: payload len][payload bytes]
//! ```
//!
//! Reading goes through [`FrameReader`], which buffers channel-in and only
//! consumes bytes once a whole frame is present. Its only await point is a
//! `read_buf`, so dropping a pending `next_frame` never tears a frame.

use crate::config::WireConfig;
use crate::{LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Boxed channel-in half.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed channel-out half.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Identifier correlating a request with its response.
pub type CallId = i32;

/// One wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub method: String,
    pub call_id: CallId,
    pub args: Vec<Bytes>,
}

impl Frame {
    /// A request for `method` on the peer.
    pub fn request(method: impl Into<String>, call_id: CallId, args: Vec<Bytes>) -> Self {
        Self {
            method: method.into(),
            call_id,
            args,
        }
    }

    /// A successful response carrying `payload`.
    pub fn response(call_id: CallId, payload: Bytes) -> Self {
        Self {
            method: String::new(),
            call_id,
            args: vec![payload],
        }
    }

    /// An exception response; the id is negated on the wire.
    pub fn exception(call_id: CallId, description: Bytes) -> Self {
        Self {
            method: String::new(),
            call_id: -call_id,
            args: vec![description],
        }
    }

    pub fn is_response(&self) -> bool {
        self.method.is_empty()
    }

    /// Serialize the whole frame into one contiguous buffer.
    pub fn encode(&self) -> Result<Bytes> {
        let name = self.method.as_bytes();
        if name.len() > WireConfig::MAX_METHOD_NAME_LEN {
            return Err(LinkError::InvalidMethodName {
                message: format!(
                    "method name is {} bytes, maximum is {}",
                    name.len(),
                    WireConfig::MAX_METHOD_NAME_LEN
                ),
            });
        }
        if self.args.len() > WireConfig::MAX_ARG_COUNT {
            return Err(LinkError::MalformedFrame {
                message: format!("{} arguments exceed the wire limit", self.args.len()),
            });
        }

        let body: usize = self.args.iter().map(|a| 4 + a.len()).sum();
        let mut buf = BytesMut::with_capacity(2 + name.len() + 4 + 2 + body);
        buf.put_u16(name.len() as u16);
        buf.put_slice(name);
        buf.put_i32(self.call_id);
        buf.put_u16(self.args.len() as u16);
        for arg in &self.args {
            let len = i32::try_from(arg.len()).map_err(|_| LinkError::FrameTooLarge {
                len: arg.len(),
                max: i32::MAX as usize,
            })?;
            buf.put_i32(len);
            buf.put_slice(arg);
        }
        Ok(buf.freeze())
    }
}

/// Write one frame to channel-out and flush it.
///
/// The frame is encoded up front and written with a single `write_all`, so a
/// caller holding the writer lock emits it contiguously.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    trace!("tx {:?} id={} args={}", frame.method, frame.call_id, frame.args.len());
    Ok(())
}

/// What the next read from channel-in produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Frame(Frame),
    /// A complete frame was consumed but could not be interpreted.
    Skipped { reason: String },
    /// Clean end of stream on a frame boundary.
    Eof,
}

/// Buffered frame reader over channel-in.
pub struct FrameReader {
    reader: BoxReader,
    buf: BytesMut,
    max_payload_len: usize,
    max_frame_len: usize,
}

impl FrameReader {
    pub fn new(reader: BoxReader, max_payload_len: usize) -> Self {
        Self::with_buffered(reader, BytesMut::new(), max_payload_len)
    }

    /// Resume reading with bytes a previous owner already pulled off the channel.
    pub fn with_buffered(reader: BoxReader, buf: BytesMut, max_payload_len: usize) -> Self {
        Self {
            reader,
            buf,
            max_payload_len,
            max_frame_len: WireConfig::MAX_FRAME_LEN,
        }
    }

    /// Cap the encoded size of a whole frame, header and every payload included.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Read the next frame.
    ///
    /// Errors are fatal for the channel: I/O failures, a stream that ends in the
    /// middle of a frame, or lengths that make resynchronization impossible.
    pub async fn next_frame(&mut self) -> Result<ReadOutcome> {
        loop {
            if let Some(total) = frame_len(&self.buf, self.max_payload_len, self.max_frame_len)? {
                let raw = self.buf.split_to(total).freeze();
                return Ok(parse_frame(raw));
            }

            if self.buf.capacity() - self.buf.len() < WireConfig::READ_CHUNK_SIZE {
                self.buf.reserve(WireConfig::READ_CHUNK_SIZE);
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(ReadOutcome::Eof);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} bytes of a partial frame", self.buf.len()),
                )
                .into());
            }
        }
    }

    /// Give back the underlying reader together with any unconsumed bytes.
    pub fn into_parts(self) -> (BoxReader, BytesMut) {
        (self.reader, self.buf)
    }
}

/// Total byte length of the first frame in `buf`, if it is complete.
fn frame_len(buf: &[u8], max_payload_len: usize, max_frame_len: usize) -> Result<Option<usize>> {
    let mut pos = 0usize;

    let Some(name_len) = peek_u16(buf, pos) else {
        return Ok(None);
    };
    pos += 2 + name_len as usize;

    // call id
    pos += 4;
    let Some(count) = peek_u16(buf, pos) else {
        return Ok(None);
    };
    pos += 2;

    for index in 0..count {
        let Some(len) = peek_i32(buf, pos) else {
            return Ok(None);
        };
        if len < 0 {
            return Err(LinkError::MalformedFrame {
                message: format!("argument {} has negative length {}", index, len),
            });
        }
        let len = len as usize;
        if len > max_payload_len {
            return Err(LinkError::FrameTooLarge {
                len,
                max: max_payload_len,
            });
        }
        pos += 4 + len;
        if pos > max_frame_len {
            return Err(LinkError::FrameTooLarge {
                len: pos,
                max: max_frame_len,
            });
        }
    }

    if buf.len() < pos {
        return Ok(None);
    }
    Ok(Some(pos))
}

fn peek_u16(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn peek_i32(buf: &[u8], pos: usize) -> Option<i32> {
    let bytes = buf.get(pos..pos + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse a frame whose full length was already validated by `frame_len`.
fn parse_frame(mut raw: Bytes) -> ReadOutcome {
    let name_len = raw.get_u16() as usize;
    let name = raw.split_to(name_len);
    let call_id = raw.get_i32();
    let count = raw.get_u16() as usize;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = raw.get_i32() as usize;
        args.push(raw.split_to(len));
    }

    match String::from_utf8(name.to_vec()) {
        Ok(method) => {
            trace!("rx {:?} id={} args={}", method, call_id, args.len());
            ReadOutcome::Frame(Frame {
                method,
                call_id,
                args,
            })
        }
        Err(e) => ReadOutcome::Skipped {
            reason: format!("method name of call {} is not UTF-8: {}", call_id, e),
        },
    }
}
