//! Invocation event decoding.
//!
//! Lambda delivers HTTP traffic as JSON documents in two families:
//!
//! * V1: Application Load Balancer and API Gateway REST API proxy events,
//!   with optional multi-value header and query maps.
//! * V2: API Gateway HTTP API and Function URL events, with raw path and
//!   query strings and a separate cookie list.
//!
//! [`ProxyEvent::from_slice`] resolves the family once; each variant converts
//! itself into a [`FezzRequest`] independently.

use crate::error::EventError;
use crate::handler::InvocationContext;
use crate::http::{Body, FezzRequest, Headers, Method, ProxyContext};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Which response shape the event's caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventVersion {
    V1,
    V2,
}

/// A decoded invocation event.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    V1(V1Event),
    V2(V2Event),
}

/// ALB / REST API event.
#[derive(Debug, Clone, Default)]
pub struct V1Event {
    pub http_method: String,
    pub path: String,
    pub query_string_parameters: BTreeMap<String, String>,
    pub multi_value_query_string_parameters: BTreeMap<String, Vec<String>>,
    pub headers: HashMap<String, String>,
    pub multi_value_headers: HashMap<String, Vec<String>>,
    pub is_base64_encoded: bool,
    pub body: String,
    pub source_ip: String,
    pub proxy: ProxyContext,
}

/// HTTP API / Function URL event.
#[derive(Debug, Clone, Default)]
pub struct V2Event {
    pub version: String,
    pub raw_path: String,
    pub raw_query_string: String,
    pub cookies: Vec<String>,
    pub headers: HashMap<String, String>,
    pub is_base64_encoded: bool,
    pub body: String,
    pub method: String,
    /// Decoded path from `requestContext.http.path`.
    pub path: String,
    pub source_ip: String,
}

/// Wire shape shared by both families; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawEvent {
    http_method: Option<String>,
    path: Option<String>,
    query_string_parameters: Option<BTreeMap<String, String>>,
    multi_value_query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    headers: Option<HashMap<String, String>>,
    multi_value_headers: Option<HashMap<String, Vec<String>>>,
    is_base64_encoded: Option<bool>,
    body: Option<String>,
    request_context: Option<RawRequestContext>,

    resource: Option<String>,
    path_parameters: Option<HashMap<String, String>>,
    stage_variables: Option<HashMap<String, String>>,

    version: Option<String>,
    raw_path: Option<String>,
    raw_query_string: Option<String>,
    cookies: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawRequestContext {
    stage: Option<String>,
    request_id: Option<String>,
    api_id: Option<String>,
    identity: Option<RawIdentity>,
    http: Option<RawHttpContext>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawIdentity {
    source_ip: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawHttpContext {
    method: Option<String>,
    path: Option<String>,
    source_ip: Option<String>,
}

fn is_v2_version(version: &str) -> bool {
    version == "2" || version.starts_with("2.")
}

impl ProxyEvent {
    /// Decode an invocation payload, resolving its family.
    pub fn from_slice(payload: &[u8]) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_slice(payload)?;
        let version = raw.version.clone().unwrap_or_default();
        if is_v2_version(&version) {
            let http = raw
                .request_context
                .and_then(|ctx| ctx.http)
                .ok_or(EventError::MissingHttpContext)?;
            return Ok(ProxyEvent::V2(V2Event {
                version,
                raw_path: raw.raw_path.unwrap_or_default(),
                raw_query_string: raw.raw_query_string.unwrap_or_default(),
                cookies: raw.cookies.unwrap_or_default(),
                headers: raw.headers.unwrap_or_default(),
                is_base64_encoded: raw.is_base64_encoded.unwrap_or(false),
                body: raw.body.unwrap_or_default(),
                method: http.method.unwrap_or_default(),
                path: http.path.unwrap_or_default(),
                source_ip: http.source_ip.unwrap_or_default(),
            }));
        }

        let ctx = raw.request_context.unwrap_or_default();
        Ok(ProxyEvent::V1(V1Event {
            http_method: raw.http_method.unwrap_or_default(),
            path: raw.path.unwrap_or_default(),
            query_string_parameters: raw.query_string_parameters.unwrap_or_default(),
            multi_value_query_string_parameters: raw
                .multi_value_query_string_parameters
                .unwrap_or_default(),
            headers: raw.headers.unwrap_or_default(),
            multi_value_headers: raw.multi_value_headers.unwrap_or_default(),
            is_base64_encoded: raw.is_base64_encoded.unwrap_or(false),
            body: raw.body.unwrap_or_default(),
            source_ip: ctx.identity.and_then(|i| i.source_ip).unwrap_or_default(),
            proxy: ProxyContext {
                resource: raw.resource,
                path_parameters: raw.path_parameters.unwrap_or_default(),
                stage_variables: raw.stage_variables.unwrap_or_default(),
                stage: ctx.stage,
                request_id: ctx.request_id,
                api_id: ctx.api_id,
            },
        }))
    }

    pub fn version(&self) -> EventVersion {
        match self {
            ProxyEvent::V1(_) => EventVersion::V1,
            ProxyEvent::V2(_) => EventVersion::V2,
        }
    }

    /// Build the canonical request for this event.
    pub fn into_request(self, context: InvocationContext) -> Result<FezzRequest, EventError> {
        match self {
            ProxyEvent::V1(event) => event.into_request(context),
            ProxyEvent::V2(event) => event.into_request(context),
        }
    }
}

impl V1Event {
    pub fn into_request(self, context: InvocationContext) -> Result<FezzRequest, EventError> {
        let mut headers = Headers::new();
        if !self.multi_value_headers.is_empty() {
            for (key, values) in self.multi_value_headers {
                headers.set_all(&key, values);
            }
        } else {
            for (key, value) in self.headers {
                headers.set(&key, value);
            }
        }

        let query = if !self.multi_value_query_string_parameters.is_empty() {
            encode_query(
                self.multi_value_query_string_parameters
                    .iter()
                    .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str()))),
            )
        } else {
            encode_query(
                self.query_string_parameters
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str())),
            )
        };

        let request_uri = if query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, query)
        };
        let path = decode_path(&self.path);
        let (body, content_length) = decode_body(&self.body, self.is_base64_encoded)?;

        Ok(FezzRequest {
            method: parse_method(&self.http_method)?,
            request_uri,
            path,
            raw_query: query,
            headers,
            remote_addr: self.source_ip,
            content_length,
            body,
            context,
            proxy: self.proxy,
        })
    }
}

impl V2Event {
    pub fn into_request(self, context: InvocationContext) -> Result<FezzRequest, EventError> {
        let mut headers = Headers::new();
        for (key, value) in self.headers {
            headers.set(&key, value);
        }
        if !self.cookies.is_empty() {
            headers.set("Cookie", self.cookies.join(";"));
        }

        let request_uri = if self.raw_query_string.is_empty() {
            self.raw_path.clone()
        } else {
            format!("{}?{}", self.raw_path, self.raw_query_string)
        };
        let (body, content_length) = decode_body(&self.body, self.is_base64_encoded)?;

        Ok(FezzRequest {
            method: parse_method(&self.method)?,
            request_uri,
            path: self.path,
            raw_query: self.raw_query_string,
            headers,
            remote_addr: self.source_ip,
            content_length,
            body,
            context,
            proxy: ProxyContext::default(),
        })
    }
}

fn parse_method(method: &str) -> Result<Method, EventError> {
    if method.is_empty() {
        return Ok(Method::GET);
    }
    Method::from_bytes(method.as_bytes()).map_err(|_| EventError::InvalidMethod(method.to_string()))
}

fn encode_query<'a>(pairs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer.extend_pairs(pairs);
    serializer.finish()
}

fn decode_path(path: &str) -> String {
    urlencoding::decode(path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| path.to_string())
}

fn decode_body(body: &str, is_base64_encoded: bool) -> Result<(Body, u64), EventError> {
    if body.is_empty() {
        return Ok((Body::Empty, 0));
    }
    let bytes = if is_base64_encoded {
        Bytes::from(STANDARD.decode(body)?)
    } else {
        Bytes::copy_from_slice(body.as_bytes())
    };
    let len = bytes.len() as u64;
    Ok((Body::Full(bytes), len))
}
