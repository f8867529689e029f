//! Canonical HTTP request handed to Fezz handlers.

use crate::handler::InvocationContext;
use crate::http::Headers;
use bytes::Bytes;
use hyper::body::{Frame, SizeHint};
use hyper::Method;
use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Request body.
///
/// `Empty` means the event carried no body at all, as opposed to a body that
/// decoded to zero bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Full(Bytes),
}

impl Body {
    /// Borrow the body bytes; empty for [`Body::Empty`].
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Full(bytes) => bytes,
        }
    }

    /// Whether the request carried no body.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl hyper::body::Body for Body {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match std::mem::take(&mut *self) {
            Body::Empty => Poll::Ready(None),
            Body::Full(bytes) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.is_empty()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.as_bytes().len() as u64)
    }
}

/// REST-API extras carried by V1 events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyContext {
    pub resource: Option<String>,
    pub path_parameters: HashMap<String, String>,
    pub stage_variables: HashMap<String, String>,
    pub stage: Option<String>,
    pub request_id: Option<String>,
    pub api_id: Option<String>,
}

/// HTTP request reconstructed from an invocation event.
#[derive(Debug, Clone)]
pub struct FezzRequest {
    pub(crate) method: Method,
    pub(crate) request_uri: String,
    pub(crate) path: String,
    pub(crate) raw_query: String,
    pub(crate) headers: Headers,
    pub(crate) remote_addr: String,
    pub(crate) content_length: u64,
    pub(crate) body: Body,
    pub(crate) context: InvocationContext,
    pub(crate) proxy: ProxyContext,
}

impl FezzRequest {
    /// Create a request by hand, mostly useful in tests.
    pub fn new(method: Method, request_uri: impl Into<String>) -> Self {
        let request_uri = request_uri.into();
        let (path, raw_query) = match request_uri.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (request_uri.clone(), String::new()),
        };
        Self {
            method,
            request_uri,
            path,
            raw_query,
            headers: Headers::new(),
            remote_addr: String::new(),
            content_length: 0,
            body: Body::Empty,
            context: InvocationContext::default(),
            proxy: ProxyContext::default(),
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.add(key, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let bytes = body.into();
        self.content_length = bytes.len() as u64;
        self.body = Body::Full(bytes);
        self
    }

    /// Attach an invocation context.
    pub fn with_context(mut self, context: InvocationContext) -> Self {
        self.context = context;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request-target as the client sent it (path plus raw query).
    pub fn request_uri(&self) -> &str {
        &self.request_uri
    }

    /// Decoded request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Encoded query string without the leading `?`.
    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    /// Decoded query pairs in order of appearance.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(self.raw_query.as_bytes())
            .into_owned()
            .collect()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the first value of a header.
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Host taken from the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.headers.get("Host")
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Take the body out of the request.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Get the body as text if present.
    pub fn text(&self) -> Option<String> {
        match &self.body {
            Body::Empty => None,
            Body::Full(b) => Some(String::from_utf8_lossy(b).to_string()),
        }
    }

    /// Parse the body as JSON if present.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        match &self.body {
            Body::Empty => None,
            Body::Full(b) => Some(serde_json::from_slice(b)),
        }
    }

    /// Invocation scope this request runs in.
    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub fn proxy(&self) -> &ProxyContext {
        &self.proxy
    }
}

impl Default for FezzRequest {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_new_splits_query() {
        let req = FezzRequest::new(Method::GET, "/foo?a=1&b=two%20words");
        assert_eq!(req.path(), "/foo");
        assert_eq!(req.raw_query(), "a=1&b=two%20words");
        assert_eq!(
            req.query_pairs(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string())
            ]
        );
    }

    #[test]
    fn test_body_helpers() {
        let req = FezzRequest::default().body(r#"{"hello":"world"}"#);
        assert_eq!(req.content_length(), 17);
        assert_eq!(req.text().as_deref(), Some(r#"{"hello":"world"}"#));
        let value: serde_json::Value = req.json().unwrap().unwrap();
        assert_eq!(value["hello"], "world");
        assert!(FezzRequest::default().text().is_none());
    }

    #[tokio::test]
    async fn test_body_collects() {
        let body = Body::Full(Bytes::from_static(b"payload"));
        assert_eq!(hyper::body::Body::size_hint(&body).exact(), Some(7));
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"payload");

        let empty = Body::Empty;
        assert!(hyper::body::Body::is_end_stream(&empty));
        assert!(empty.collect().await.unwrap().to_bytes().is_empty());
    }
}
