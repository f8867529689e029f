//! Streaming response capture.

use super::pipe::{Chunk, PipeWriter};
use super::wire::{StreamingPrelude, PRELUDE_DELIMITER};
use crate::fault::ErrorEnvelope;
use crate::http::{Flush, Headers, ResponseWriter, StatusCode};
use crate::sniff::{self, LAMBDA_CONTENT_ENCODING, SNIFF_LEN};
use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use tracing::warn;

/// Bytes accumulated before they are pushed down the pipe.
const WRITE_BUFFER_SIZE: usize = 4096;

/// Response writer that forwards output to the control plane as it is
/// produced.
///
/// The header block goes out on an explicit `write_header`, on the first
/// write once a `Content-Type` is set, or once 512 bytes have been written
/// without one (the content type is then sniffed from those bytes). After
/// that, headers are frozen and writes pass through a small buffer.
pub struct StreamingResponse {
    headers: Headers,
    status: Option<StatusCode>,
    prelude: BytesMut,
    buf: BytesMut,
    pipe: PipeWriter,
    broken: Option<io::ErrorKind>,
}

impl StreamingResponse {
    pub(crate) fn new(pipe: PipeWriter) -> Self {
        Self {
            headers: Headers::new(),
            status: None,
            prelude: BytesMut::with_capacity(SNIFF_LEN),
            buf: BytesMut::with_capacity(WRITE_BUFFER_SIZE),
            pipe,
            broken: None,
        }
    }

    /// Whether the header block has been written.
    pub fn header_sent(&self) -> bool {
        self.status.is_some()
    }

    /// Finish a successful response.
    pub(crate) async fn close(mut self) -> io::Result<()> {
        if !self.header_sent() {
            self.write_header(StatusCode::OK).await;
        }
        self.check()?;
        self.send_buffered().await
    }

    /// Finish with a failure.
    ///
    /// Before the header block is out the envelope replaces the response
    /// entirely; afterwards it follows whatever was already written.
    pub(crate) async fn close_with_error(mut self, envelope: ErrorEnvelope) {
        if self.header_sent() {
            let _ = self.send_buffered().await;
        }
        let _ = self.pipe.send(Chunk::Fault(envelope)).await;
    }

    async fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.pipe.send(Chunk::Data(chunk)).await.inspect_err(|e| {
            self.broken = Some(e.kind());
        })
    }

    fn check(&self) -> io::Result<()> {
        match self.broken {
            Some(kind) => Err(io::Error::new(kind, "response stream is broken")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResponseWriter for StreamingResponse {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    async fn write_header(&mut self, status: StatusCode) {
        if let Some(current) = self.status {
            warn!(current = %current, ignored = %status, "superfluous write_header call");
            return;
        }
        if self.broken.is_some() {
            return;
        }
        if !self.headers.contains("Content-Type") {
            self.headers
                .set("Content-Type", sniff::detect_content_type(&self.prelude));
        }
        self.headers.remove(LAMBDA_CONTENT_ENCODING);
        self.status = Some(status);

        let prelude = StreamingPrelude::new(status, &self.headers);
        match serde_json::to_vec(&prelude) {
            Ok(block) => self.buf.extend_from_slice(&block),
            Err(err) => {
                warn!(error = %err, "failed to encode response header block");
                self.broken = Some(io::ErrorKind::InvalidData);
                return;
            }
        }
        self.buf.extend_from_slice(&PRELUDE_DELIMITER);
        self.buf.extend_from_slice(&self.prelude);
        self.prelude.clear();
        let _ = self.send_buffered().await;
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut data = data;
        let mut held = 0;
        if !self.header_sent() {
            if self.headers.contains("Content-Type") {
                self.write_header(StatusCode::OK).await;
            } else {
                held = data.len().min(SNIFF_LEN - self.prelude.len());
                self.prelude.extend_from_slice(&data[..held]);
                data = &data[held..];
                if self.prelude.len() == SNIFF_LEN {
                    self.write_header(StatusCode::OK).await;
                }
                if data.is_empty() {
                    self.check()?;
                    return Ok(held);
                }
            }
        }
        self.check()?;
        self.buf.extend_from_slice(data);
        if self.buf.len() >= WRITE_BUFFER_SIZE {
            self.send_buffered().await?;
        }
        Ok(held + data.len())
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }
}

#[async_trait]
impl Flush for StreamingResponse {
    async fn flush(&mut self) -> io::Result<()> {
        if !self.header_sent() {
            self.write_header(StatusCode::OK).await;
        }
        self.check()?;
        self.send_buffered().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseWriterExt;
    use crate::response::pipe::{pipe, PipeReader};
    use bytes::Bytes;

    /// Drain the reader until the writer side is gone.
    async fn drain(mut reader: PipeReader) -> (Vec<Bytes>, Option<ErrorEnvelope>) {
        let mut chunks = Vec::new();
        let mut fault = None;
        while let Some(chunk) = reader.recv().await {
            match chunk {
                Chunk::Data(b) => chunks.push(b),
                Chunk::Fault(e) => fault = Some(e),
            }
        }
        (chunks, fault)
    }

    fn concat(chunks: &[Bytes]) -> Vec<u8> {
        chunks.iter().flat_map(|c| c.iter().copied()).collect()
    }

    #[tokio::test]
    async fn test_json_framing() {
        let (writer, reader) = pipe();
        let drained = tokio::spawn(drain(reader));

        let mut rw = StreamingResponse::new(writer);
        rw.headers_mut().set("Content-Type", "application/json");
        rw.write_str(r#"{"hello":"world"}"#).await.unwrap();
        rw.close().await.unwrap();

        let (chunks, fault) = drained.await.unwrap();
        assert!(fault.is_none());
        assert_eq!(
            concat(&chunks),
            b"{\"statusCode\":200,\"headers\":{\"Content-Type\":\"application/json\"}}\x00\x00\x00\x00\x00\x00\x00\x00{\"hello\":\"world\"}"
        );
    }

    #[tokio::test]
    async fn test_sniffs_prelude_on_close() {
        let (writer, reader) = pipe();
        let drained = tokio::spawn(drain(reader));

        let mut rw = StreamingResponse::new(writer);
        rw.write_str("<html></html>").await.unwrap();
        assert!(!rw.header_sent());
        rw.close().await.unwrap();

        let (chunks, _) = drained.await.unwrap();
        assert_eq!(
            concat(&chunks),
            b"{\"statusCode\":200,\"headers\":{\"Content-Type\":\"text/html; charset=utf-8\"}}\x00\x00\x00\x00\x00\x00\x00\x00<html></html>"
        );
    }

    #[tokio::test]
    async fn test_full_prelude_sends_header() {
        let (writer, reader) = pipe();
        let drained = tokio::spawn(drain(reader));

        let mut rw = StreamingResponse::new(writer);
        let body = vec![b'a'; SNIFF_LEN + 10];
        assert_eq!(rw.write(&body).await.unwrap(), SNIFF_LEN + 10);
        assert!(rw.header_sent());
        rw.close().await.unwrap();

        let (chunks, _) = drained.await.unwrap();
        let all = concat(&chunks);
        let header = b"{\"statusCode\":200,\"headers\":{\"Content-Type\":\"text/plain; charset=utf-8\"}}";
        assert!(all.starts_with(header));
        assert_eq!(&all[header.len()..header.len() + 8], &PRELUDE_DELIMITER);
        assert_eq!(&all[header.len() + 8..], &body[..]);
    }

    #[tokio::test]
    async fn test_flush_pushes_pending_bytes() {
        let (writer, mut reader) = pipe();
        let mut rw = StreamingResponse::new(writer);
        rw.headers_mut().set("Content-Type", "text/event-stream");

        let producer = tokio::spawn(async move {
            rw.write_header(StatusCode::OK).await;
            rw.write_str("data: 1\n\n").await.unwrap();
            rw.flusher().unwrap().flush().await.unwrap();
            rw.write_str("data: 2\n\n").await.unwrap();
            rw.flusher().unwrap().flush().await.unwrap();
            rw.close().await.unwrap();
        });

        let mut seen = Vec::new();
        while let Some(chunk) = reader.recv().await {
            if let Chunk::Data(b) = chunk {
                seen.push(b);
            }
        }
        producer.await.unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(&seen[1][..], b"data: 1\n\n");
        assert_eq!(&seen[2][..], b"data: 2\n\n");
    }

    #[tokio::test]
    async fn test_error_before_header_replaces_response() {
        let (writer, reader) = pipe();
        let drained = tokio::spawn(drain(reader));

        let mut rw = StreamingResponse::new(writer);
        rw.write_str("partial").await.unwrap();
        rw.close_with_error(ErrorEnvelope::new("failed", "MyError")).await;

        let (chunks, fault) = drained.await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(fault.unwrap().error_type, "MyError");
    }

    #[tokio::test]
    async fn test_error_after_header_follows_body() {
        let (writer, reader) = pipe();
        let drained = tokio::spawn(drain(reader));

        let mut rw = StreamingResponse::new(writer);
        rw.headers_mut().set("Content-Type", "text/plain");
        rw.write_str("partial").await.unwrap();
        rw.close_with_error(ErrorEnvelope::new("failed", "MyError")).await;

        let (chunks, fault) = drained.await.unwrap();
        assert!(concat(&chunks).ends_with(b"partial"));
        assert_eq!(fault.unwrap().message, "failed");
    }

    #[tokio::test]
    async fn test_write_fails_once_reader_is_gone() {
        let (writer, reader) = pipe();
        drop(reader);
        let mut rw = StreamingResponse::new(writer);
        rw.headers_mut().set("Content-Type", "text/plain");
        let err = rw.write_str("hello").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
