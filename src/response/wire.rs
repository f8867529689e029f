//! Documents posted to the invocation response endpoint.

use crate::http::{ContentTyped, CookieFold, Headers, StatusCode, SET_COOKIE};
use serde::Serialize;
use std::collections::BTreeMap;

/// Content type of a buffered response document.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type of a streamed HTTP integration response.
pub const CONTENT_TYPE_HTTP_INTEGRATION_RESPONSE: &str =
    "application/vnd.awslambda.http-integration-response";

/// Separates the streaming header block from the body.
pub const PRELUDE_DELIMITER: [u8; 8] = [0; 8];

fn is_false(b: &bool) -> bool {
    !*b
}

/// Buffered response in the V1 or V2 wire shape.
///
/// V1 fills `multi_value_headers` and leaves `cookies` empty, V2 the
/// reverse; empty fields are left out of the JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(rename = "multiValueHeaders", skip_serializing_if = "Headers::is_empty")]
    pub multi_value_headers: Headers,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(rename = "isBase64Encoded", skip_serializing_if = "is_false")]
    pub is_base64_encoded: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
}

impl ContentTyped for WireResponse {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_JSON
    }
}

/// Header block written at the start of a streamed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamingPrelude {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<String>,
}

impl StreamingPrelude {
    pub fn new(status: StatusCode, headers: &Headers) -> Self {
        Self {
            status_code: status.as_u16(),
            headers: headers.fold(CookieFold::Omit),
            cookies: headers.get_all(SET_COOKIE).to_vec(),
        }
    }
}

impl ContentTyped for StreamingPrelude {
    fn content_type(&self) -> &str {
        CONTENT_TYPE_HTTP_INTEGRATION_RESPONSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fields_are_omitted() {
        let resp = WireResponse {
            status_code: 204,
            headers: BTreeMap::new(),
            multi_value_headers: Headers::new(),
            body: String::new(),
            is_base64_encoded: false,
            cookies: Vec::new(),
        };
        assert_eq!(serde_json::to_string(&resp).unwrap(), r#"{"statusCode":204}"#);
        assert_eq!(resp.content_type(), "application/json");
    }

    #[test]
    fn test_prelude_extracts_cookies() {
        let mut headers = Headers::new();
        headers.set("content-type", "text/plain");
        headers.add("set-cookie", "a=1");
        headers.add("set-cookie", "b=2; Expires=Wed, 21 Oct 2015 07:28:00 GMT");
        let prelude = StreamingPrelude::new(StatusCode::CREATED, &headers);
        assert_eq!(
            serde_json::to_string(&prelude).unwrap(),
            r#"{"statusCode":201,"headers":{"Content-Type":"text/plain"},"cookies":["a=1","b=2; Expires=Wed, 21 Oct 2015 07:28:00 GMT"]}"#
        );
        assert_eq!(
            prelude.content_type(),
            "application/vnd.awslambda.http-integration-response"
        );
    }
}
