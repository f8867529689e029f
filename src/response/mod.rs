//! Response capture.
//!
//! [`BufferedResponse`] keeps the whole body and renders a JSON document;
//! [`StreamingResponse`] frames output and forwards it while the handler is
//! still running.

mod buffered;
pub(crate) mod pipe;
mod streaming;
mod wire;

pub use buffered::BufferedResponse;
pub use streaming::StreamingResponse;
pub use wire::{
    StreamingPrelude, WireResponse, CONTENT_TYPE_HTTP_INTEGRATION_RESPONSE, CONTENT_TYPE_JSON,
    PRELUDE_DELIMITER,
};
