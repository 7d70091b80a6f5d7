//! Binary wire framing (C5): length-prefixed scalars, strings and blobs
//! over a connected byte stream, fixed little-endian, 64-bit lengths.
//!
//! Every socket in this crate is a tokio [`AsyncRead`]/[`AsyncWrite`];
//! `.await` on a partial read or write is tokio's answer to the reference
//! implementation's manual pause/resume-across-readiness-events design, so
//! `ReadBuffer`/`WriteBuffer` here are thin typed helpers over
//! `AsyncReadExt`/`AsyncWriteExt` rather than a raw-socket state machine.

use crate::error::{NetworkError, Result};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one self-describing message's worth of fields from a stream.
pub struct ReadBuffer<'a, R> {
    stream: &'a mut R,
}

impl<'a, R: AsyncRead + Unpin> ReadBuffer<'a, R> {
    pub fn new(stream: &'a mut R) -> Self {
        Self { stream }
    }

    pub async fn read_u8(&mut self) -> Result<u8> {
        self.stream.read_u8().await.map_err(|e| NetworkError::Io(e).into())
    }

    pub async fn read_u16(&mut self) -> Result<u16> {
        self.stream
            .read_u16_le()
            .await
            .map_err(|e| NetworkError::Io(e).into())
    }

    pub async fn read_u32(&mut self) -> Result<u32> {
        self.stream
            .read_u32_le()
            .await
            .map_err(|e| NetworkError::Io(e).into())
    }

    pub async fn read_u64(&mut self) -> Result<u64> {
        self.stream
            .read_u64_le()
            .await
            .map_err(|e| NetworkError::Io(e).into())
    }

    pub async fn read_f64(&mut self) -> Result<f64> {
        self.stream
            .read_f64_le()
            .await
            .map_err(|e| NetworkError::Io(e).into())
    }

    /// 64-bit length prefix followed by UTF-8 bytes.
    pub async fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_blob().await?;
        String::from_utf8(bytes)
            .map_err(|e| NetworkError::Framing(format!("invalid utf-8 string: {e}")).into())
    }

    /// 64-bit length prefix followed by raw bytes.
    pub async fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u64().await? as usize;
        let mut buf = vec![0u8; len];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| NetworkError::Io(e))?;
        Ok(buf)
    }

    /// 64-bit element-count prefix. Callers loop calling their own
    /// per-element decoder this many times; a generic callback-based
    /// `read_vec` does not pair well with `async fn` borrows of `self`.
    pub async fn read_count(&mut self) -> Result<usize> {
        Ok(self.read_u64().await? as usize)
    }
}

/// A field queued for a single flushed write: either an owned scalar blob
/// built in memory, or an externally-owned buffer linked in without a copy.
enum Field {
    Owned(Vec<u8>),
    Linked(Arc<Vec<u8>>),
}

/// Assembles one message's fields in memory, then flushes them to the
/// stream in a single sequence of writes.
#[derive(Default)]
pub struct WriteBuffer {
    fields: Vec<Field>,
    pending: Vec<u8>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.pending.push(v);
        self
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.pending.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.pending.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.pending.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, v: f64) -> &mut Self {
        self.pending.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.write_blob(s.as_bytes())
    }

    pub fn write_blob(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_u64(bytes.len() as u64);
        self.pending.extend_from_slice(bytes);
        self
    }

    /// Link an externally-owned payload: its length prefix is written now,
    /// but the bytes themselves are written directly from `blob` at flush
    /// time, with no intermediate copy into `pending`.
    pub fn link_blob(&mut self, blob: Arc<Vec<u8>>) -> &mut Self {
        self.write_u64(blob.len() as u64);
        self.flush_pending_to_field();
        self.fields.push(Field::Linked(blob));
        self
    }

    fn flush_pending_to_field(&mut self) {
        if !self.pending.is_empty() {
            self.fields.push(Field::Owned(std::mem::take(&mut self.pending)));
        }
    }

    /// Write every field to `stream` in order, issuing one `write_all` per
    /// owned run of bytes and one more per linked blob.
    pub async fn flush<W: AsyncWrite + Unpin>(mut self, stream: &mut W) -> Result<()> {
        self.flush_pending_to_field();
        for field in self.fields {
            match field {
                Field::Owned(bytes) => stream
                    .write_all(&bytes)
                    .await
                    .map_err(NetworkError::Io)?,
                Field::Linked(blob) => stream
                    .write_all(&blob)
                    .await
                    .map_err(NetworkError::Io)?,
            }
        }
        stream.flush().await.map_err(NetworkError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_scalars_strings_and_blobs() {
        let mut wire = Vec::new();
        let mut wb = WriteBuffer::new();
        wb.write_u32(42).write_string("hello").write_blob(&[1, 2, 3]);
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        assert_eq!(rb.read_u32().await.unwrap(), 42);
        assert_eq!(rb.read_string().await.unwrap(), "hello");
        assert_eq!(rb.read_blob().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn linked_blob_round_trips_without_duplicating_in_pending() {
        let payload = Arc::new(vec![9u8; 64]);
        let mut wire = Vec::new();
        let mut wb = WriteBuffer::new();
        wb.write_string("before").link_blob(payload.clone()).write_u8(1);
        wb.flush(&mut wire).await.unwrap();

        let mut cursor = std::io::Cursor::new(wire);
        let mut rb = ReadBuffer::new(&mut cursor);
        assert_eq!(rb.read_string().await.unwrap(), "before");
        assert_eq!(rb.read_blob().await.unwrap(), vec![9u8; 64]);
        assert_eq!(rb.read_u8().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn short_stream_surfaces_as_network_error() {
        let mut cursor = std::io::Cursor::new(vec![1, 2]);
        let mut rb = ReadBuffer::new(&mut cursor);
        assert!(rb.read_u64().await.is_err());
    }
}
