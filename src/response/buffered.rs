//! Buffered response capture.

use super::wire::WireResponse;
use crate::event::EventVersion;
use crate::http::{CookieFold, Headers, ResponseWriter, StatusCode, SET_COOKIE};
use crate::sniff::{self, LAMBDA_CONTENT_ENCODING, SNIFF_LEN};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::BytesMut;
use std::io;
use tracing::warn;

/// Collects the whole response in memory, rendered once the handler returns.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    headers: Headers,
    status: Option<StatusCode>,
    body: BytesMut,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed status, `200 OK` if none was written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Render into the shape expected by the event's caller.
    pub fn render(self, version: EventVersion) -> WireResponse {
        match version {
            EventVersion::V1 => self.into_v1(),
            EventVersion::V2 => self.into_v2(),
        }
    }

    /// ALB / REST API shape: folded and multi-value headers side by side.
    pub fn into_v1(mut self) -> WireResponse {
        let (status, body, is_base64_encoded) = self.finish();
        WireResponse {
            status_code: status.as_u16(),
            headers: self.headers.fold(CookieFold::FirstValue),
            multi_value_headers: self.headers,
            body,
            is_base64_encoded,
            cookies: Vec::new(),
        }
    }

    /// HTTP API / Function URL shape: cookies moved out of the headers.
    pub fn into_v2(mut self) -> WireResponse {
        let (status, body, is_base64_encoded) = self.finish();
        WireResponse {
            status_code: status.as_u16(),
            headers: self.headers.fold(CookieFold::Omit),
            multi_value_headers: Headers::new(),
            body,
            is_base64_encoded,
            cookies: self.headers.remove(SET_COOKIE).unwrap_or_default(),
        }
    }

    fn finish(&mut self) -> (StatusCode, String, bool) {
        let status = self.status();
        self.sniff_content_type();
        let binary = sniff::is_binary(&self.headers);
        self.headers.remove(LAMBDA_CONTENT_ENCODING);
        let body = if binary {
            STANDARD.encode(&self.body)
        } else {
            String::from_utf8_lossy(&self.body).into_owned()
        };
        (status, body, binary)
    }

    fn sniff_content_type(&mut self) {
        if self.headers.contains("Content-Type") {
            return;
        }
        let prefix = &self.body[..self.body.len().min(SNIFF_LEN)];
        self.headers
            .set("Content-Type", sniff::detect_content_type(prefix));
    }
}

#[async_trait]
impl ResponseWriter for BufferedResponse {
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
        self.status = Some(status);
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        let before = self.body.len();
        self.body.extend_from_slice(data);
        if before < SNIFF_LEN && self.body.len() >= SNIFF_LEN {
            self.sniff_content_type();
        }
        Ok(data.len())
    }
}
