//! HTTP types shared by handlers and the Lambda adapter.

mod headers;
mod request;
mod response;

pub use headers::{canonical_key, Headers};
pub(crate) use headers::{CookieFold, SET_COOKIE};
pub use request::{Body, FezzRequest, ProxyContext};
pub use response::{ContentTyped, Flush, ResponseWriter, ResponseWriterExt};
pub use hyper::{Method, StatusCode};
