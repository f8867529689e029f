//! Response sink handed to Fezz handlers.

use crate::http::Headers;
use async_trait::async_trait;
use hyper::StatusCode;
use std::io;

/// Write side of an HTTP response.
///
/// Mirrors the usual "set headers, write status, stream body" contract: header
/// mutations after the status line is committed have no effect, and the first
/// `write` commits a `200 OK` if no status was set.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Response headers.
    fn headers(&self) -> &Headers;

    /// Mutable response headers.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Commit the status code. Later calls are ignored.
    async fn write_header(&mut self, status: StatusCode);

    /// Append body bytes. Returns the number of bytes accepted.
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Flush capability, if the sink supports it.
    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        None
    }
}

/// Sinks that can push pending bytes out without waiting for more data.
#[async_trait]
pub trait Flush: Send {
    async fn flush(&mut self) -> io::Result<()>;
}

/// Values that know the media type they should be posted with.
pub trait ContentTyped {
    fn content_type(&self) -> &str;
}

/// Convenience helpers for any [`ResponseWriter`].
#[async_trait]
pub trait ResponseWriterExt: ResponseWriter {
    /// Write a UTF-8 string.
    async fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.write(s.as_bytes()).await
    }

    /// Serialize `value` as JSON, setting `Content-Type` if unset.
    async fn write_json<T: serde::Serialize + Sync + ?Sized>(&mut self, value: &T) -> io::Result<usize> {
        let body = serde_json::to_vec(value)?;
        if !self.headers().contains("Content-Type") {
            self.headers_mut().set("Content-Type", "application/json");
        }
        self.write(&body).await
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriterExt for W {}
