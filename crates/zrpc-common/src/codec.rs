//! Framed record codec.
//!
//! Every record on a connection is two length-prefixed frames, header
//! then body:
//!
//! ```text
//! [4-byte length, big-endian] [header bytes] [4-byte length] [body bytes]
//! ```
//!
//! The serialisation of both frames is selected by the [`CodecKind`]
//! negotiated in the handshake. Reads always consume exactly the
//! prefixed length; a frame can also be drained without decoding, which
//! is how a receiver discards the body of a response nobody is waiting
//! for anymore.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{Result, RpcError};
use crate::protocol::Header;

/// Maximum frame size (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Body serialisation backend.
///
/// The handshake carries the codec by name; unknown names reject the
/// connection. The name is opaque to the framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// JSON codec (the default)
    Json,
    /// Compact binary codec via postcard
    Postcard,
}

impl CodecKind {
    /// Resolves a codec from its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "application/json" => Some(CodecKind::Json),
            "application/postcard" => Some(CodecKind::Postcard),
            _ => None,
        }
    }

    /// The wire name carried in the handshake.
    pub fn name(&self) -> &'static str {
        match self {
            CodecKind::Json => "application/json",
            CodecKind::Postcard => "application/postcard",
        }
    }

    /// Encodes a value into a frame payload.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecKind::Json => Ok(serde_json::to_vec(value)?),
            CodecKind::Postcard => Ok(postcard::to_allocvec(value)?),
        }
    }

    /// Decodes a frame payload into a value.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecKind::Json => Ok(serde_json::from_slice(bytes)?),
            CodecKind::Postcard => Ok(postcard::from_bytes(bytes)?),
        }
    }
}

/// Reading half of a connection's record stream.
pub struct RecordReader<R> {
    inner: R,
    kind: CodecKind,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(inner: R, kind: CodecKind) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Reads and decodes a header frame.
    ///
    /// EOF here is the normal end of a connection and surfaces as an
    /// `UnexpectedEof` io error.
    pub async fn read_header(&mut self) -> Result<Header> {
        let frame = self.read_frame().await?;
        self.kind.decode(&frame)
    }

    /// Reads and decodes the body frame following a header.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let frame = self.read_frame().await?;
        self.kind.decode(&frame)
    }

    /// Reads a body frame without decoding it.
    pub async fn read_body_raw(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }

    /// Drains a body frame whose content nobody wants.
    pub async fn skip_body(&mut self) -> Result<()> {
        self.read_frame().await.map(drop)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Writing half of a connection's record stream.
///
/// Callers serialise on a single send lock in the owning layer, so one
/// `write` emits its header and body frames without interleaving.
pub struct RecordWriter<W> {
    inner: W,
    kind: CodecKind,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn new(inner: W, kind: CodecKind) -> Self {
        Self { inner, kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Writes one record: a header frame followed by a body frame.
    ///
    /// The length prefixes are computed by encoding into buffers first.
    pub async fn write<T: Serialize + ?Sized>(&mut self, header: &Header, body: &T) -> Result<()> {
        let body = self.kind.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Writes one record with an already-encoded body.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.kind.encode(header)?;
        self.write_frame(&header).await?;
        self.write_frame(body).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shuts the stream down, signalling the peer that no further
    /// records follow.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(bytes.len(), MAX_FRAME_SIZE));
        }
        self.inner.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
        self.inner.write_all(bytes).await?;
        Ok(())
    }
}

/// Reads a single `\n`-terminated line one byte at a time, so nothing
/// past the newline is consumed from the stream.
///
/// Used for the handshake and the CONNECT preamble, where framed bytes
/// follow immediately after the line. A trailing `\r` is stripped.
pub async fn read_line<R: AsyncRead + Unpin>(reader: &mut R, max: usize) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if line.len() >= max {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", max),
            )));
        }
        line.push(byte[0]);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|e| {
        RpcError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}
