//! Error envelopes posted to the control plane.
//!
//! Two sources feed an [`ErrorEnvelope`]: ordinary errors returned by a
//! handler (`from_error`, the process keeps serving) and panics caught at the
//! invocation boundary (`from_panic`, the process must exit once the report
//! is accepted).

use backtrace::Backtrace;
use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Once;

/// Maximum number of stack frames reported for a panic.
const MAX_FRAMES: usize = 32;

/// Symbols that raise a panic. Everything above the last of them on the
/// recorded stack is hook and unwinding machinery.
const PANIC_ENTRY_PREFIXES: &[&str] = &[
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "core::panicking::",
    "std::panicking::begin_panic",
    "std::panicking::rust_panic",
    "std::rt::begin_panic",
    "std::panic::panic_any",
];

/// Panic helpers that may still sit between the panic entry and the caller.
const PANIC_HELPER_PREFIXES: &[&str] = &[
    "core::option::unwrap_failed",
    "core::option::expect_failed",
    "core::result::unwrap_failed",
    "core::option::Option<T>::unwrap",
    "core::option::Option<T>::expect",
    "core::result::Result<T,E>::unwrap",
    "core::result::Result<T,E>::expect",
];

/// Machinery recognisable without a panic entry, for stacks where the entry
/// symbols were not resolved.
const HOOK_FRAME_PREFIXES: &[&str] = &[
    "backtrace::",
    "std::panicking",
    "std::sys",
    "std::rt::",
    "fezz_lambda::fault::install_panic_hook",
];

/// Structured failure report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "errorMessage")]
    pub message: String,
    #[serde(rename = "errorType")]
    pub error_type: String,
    #[serde(rename = "stackTrace", skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<Vec<StackFrame>>,
    /// The process must terminate after this envelope is posted.
    #[serde(skip)]
    pub should_exit: bool,
}

/// One frame of a panic stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    #[serde(rename = "path")]
    pub file: String,
    pub line: u32,
    #[serde(rename = "label")]
    pub symbol: String,
}

impl ErrorEnvelope {
    /// Build an envelope with no stack trace.
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
            stack_trace: None,
            should_exit: false,
        }
    }

    /// Convert an ordinary error.
    ///
    /// An `ErrorEnvelope` passes through unchanged; anything else uses its
    /// display message and concrete type name.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let any: &dyn Any = err;
        if let Some(envelope) = any.downcast_ref::<ErrorEnvelope>() {
            return envelope.clone();
        }
        Self::new(err.to_string(), short_type_name(std::any::type_name::<E>()))
    }

    /// Convert a caught panic payload.
    ///
    /// The stack is the one recorded by the panic hook on the panicking thread
    /// (see [`install_panic_hook`]); it is empty when the hook is not
    /// installed. A payload that already is an `ErrorEnvelope` passes through.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let stack = take_panic_stack();
        let payload = match payload.downcast::<ErrorEnvelope>() {
            Ok(envelope) => return *envelope,
            Err(payload) => payload,
        };
        let (message, error_type) = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (s.to_string(), "&str")
        } else if let Some(s) = payload.downcast_ref::<String>() {
            (s.clone(), "String")
        } else {
            ("Box<dyn Any>".to_string(), "Any")
        };
        Self {
            message,
            error_type: error_type.to_string(),
            stack_trace: Some(stack),
            should_exit: true,
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for ErrorEnvelope {}

thread_local! {
    static PANIC_STACK: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Record the stack of every panic on the panicking thread.
///
/// Chains to the previously installed hook, so the default panic message is
/// still printed. Idempotent.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::new_unresolved();
            PANIC_STACK.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

fn take_panic_stack() -> Vec<StackFrame> {
    let Some(mut trace) = PANIC_STACK.with(|slot| slot.borrow_mut().take()) else {
        return Vec::new();
    };
    trace.resolve();

    let symbols: Vec<_> = trace
        .frames()
        .iter()
        .flat_map(|f| f.symbols())
        .filter_map(|symbol| Some((format!("{:#}", symbol.name()?), symbol)))
        .collect();

    let start = symbols
        .iter()
        .rposition(|(name, _)| has_prefix(name, PANIC_ENTRY_PREFIXES))
        .map_or(0, |i| i + 1);

    symbols[start..]
        .iter()
        .skip_while(|(name, _)| {
            has_prefix(name, PANIC_HELPER_PREFIXES)
                || has_prefix(name, HOOK_FRAME_PREFIXES)
                || is_hook_box(name)
        })
        .take(MAX_FRAMES)
        .map(|(name, symbol)| StackFrame {
            file: symbol
                .filename()
                .map(|p| relative_source_path(&p.to_string_lossy()))
                .unwrap_or_default(),
            line: symbol.lineno().unwrap_or(0),
            symbol: strip_module_path(&normalize_closures(name)),
        })
        .collect()
}

fn has_prefix(name: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| name.starts_with(p))
}

/// The boxed hook closure, `<Box<dyn Fn(&PanicHookInfo)> as Fn<..>>::call`.
fn is_hook_box(name: &str) -> bool {
    name.starts_with("<alloc::boxed::Box<") && name.contains("Fn<")
}

/// Trim a source path down to the directory of the crate that owns it.
///
/// `/home/u/.cargo/registry/src/index/tokio-1.40.0/src/runtime/task.rs`
/// becomes `tokio-1.40.0/src/runtime/task.rs`, and
/// `/work/app/tests/api.rs` becomes `app/tests/api.rs`. Paths outside any
/// crate layout keep their file name and parent directory.
fn relative_source_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let anchor = ["/src/", "/tests/", "/benches/", "/examples/"]
        .iter()
        .filter_map(|dir| path.rfind(dir))
        .max();
    let cut = match anchor {
        Some(at) => path[..at].rfind('/'),
        None => path.rfind('/').and_then(|file| path[..file].rfind('/')),
    };
    match cut {
        Some(i) => path[i + 1..].to_string(),
        None => path,
    }
}

/// Rewrite v0-mangled closure markers (`{closure#0}`) to the legacy
/// `{{closure}}` form.
fn normalize_closures(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    let mut rest = symbol;
    while let Some(at) = rest.find("{closure#") {
        let Some(end) = rest[at..].find('}') else {
            break;
        };
        out.push_str(&rest[..at]);
        out.push_str("{{closure}}");
        rest = &rest[at + end + 1..];
    }
    out.push_str(rest);
    out
}

/// Drop leading module segments from a demangled symbol.
///
/// `my_app::routes::Api::serve` becomes `Api::serve`; a free function
/// `my_app::routes::index` becomes `index`; closures keep the function that
/// owns them.
fn strip_module_path(symbol: &str) -> String {
    if symbol.starts_with('<') {
        return symbol.to_string();
    }
    let segments: Vec<&str> = symbol.split("::").collect();
    if let Some(i) = segments
        .iter()
        .position(|s| s.starts_with(|c: char| c.is_ascii_uppercase() || c == '<'))
    {
        return segments[i..].join("::");
    }
    let owner = segments
        .iter()
        .rposition(|s| !s.starts_with('{'))
        .unwrap_or(0);
    segments[owner..].join("::")
}

/// Last path segment of a type name, generics included.
pub(crate) fn short_type_name(full: &str) -> String {
    let base_end = full.find('<').unwrap_or(full.len());
    let start = full[..base_end].rfind("::").map_or(0, |i| i + 2);
    full[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;

    #[derive(Debug, thiserror::Error)]
    #[error("some errors")]
    struct MyError;

    #[test]
    fn test_from_error() {
        let envelope = ErrorEnvelope::from_error(&MyError);
        assert_eq!(envelope.message, "some errors");
        assert_eq!(envelope.error_type, "MyError");
        assert!(envelope.stack_trace.is_none());
        assert!(!envelope.should_exit);
        assert_eq!(
            serde_json::to_string(&envelope).unwrap(),
            r#"{"errorMessage":"some errors","errorType":"MyError"}"#
        );
    }

    #[test]
    fn test_from_error_passes_envelope_through() {
        let original = ErrorEnvelope::new("custom", "Custom");
        assert_eq!(ErrorEnvelope::from_error(&original), original);
    }

    #[tokio::test]
    async fn test_from_panic_str() {
        install_panic_hook();
        let caught = AssertUnwindSafe(async {
            panic!("boom");
        })
        .catch_unwind()
        .await;
        let envelope = ErrorEnvelope::from_panic(caught.unwrap_err());
        assert_eq!(envelope.message, "boom");
        assert_eq!(envelope.error_type, "&str");
        assert!(envelope.should_exit);
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.starts_with(r#"{"errorMessage":"boom","errorType":"&str","stackTrace":["#));

        let frames = envelope.stack_trace.unwrap();
        let top = &frames[0];
        assert!(top.symbol.contains("test_from_panic_str"), "{frames:#?}");
        assert!(top.file.ends_with("fault.rs"), "{frames:#?}");
        assert!(!top.file.starts_with('/'), "{frames:#?}");
        for frame in &frames {
            assert!(
                !frame.symbol.starts_with("panic")
                    && !frame.symbol.starts_with("rust_begin_unwind")
                    && !frame.symbol.starts_with("<alloc::boxed::Box<dyn")
                    && !frame.symbol.contains("install_panic_hook"),
                "{frames:#?}"
            );
        }
        assert!(frames.len() <= MAX_FRAMES);
    }

    #[test]
    fn test_from_panic_string_and_envelope() {
        install_panic_hook();
        let code = std::hint::black_box(42);
        let caught = std::panic::catch_unwind(|| panic!("code {code}")).unwrap_err();
        let envelope = ErrorEnvelope::from_panic(caught);
        assert_eq!(envelope.message, "code 42");
        assert_eq!(envelope.error_type, "String");

        let inner = ErrorEnvelope::new("wrapped", "Wrapped");
        let caught = std::panic::catch_unwind({
            let inner = inner.clone();
            move || std::panic::panic_any(inner)
        })
        .unwrap_err();
        assert_eq!(ErrorEnvelope::from_panic(caught), inner);
    }

    #[test]
    fn test_relative_source_path() {
        assert_eq!(
            relative_source_path("/home/u/.cargo/registry/src/idx/tokio-1.40.0/src/runtime/task.rs"),
            "tokio-1.40.0/src/runtime/task.rs"
        );
        assert_eq!(relative_source_path("/work/app/src/main.rs"), "app/src/main.rs");
        assert_eq!(relative_source_path("/work/app/tests/api.rs"), "app/tests/api.rs");
        assert_eq!(
            relative_source_path("/rustc/abc/library/core/src/panicking.rs"),
            "core/src/panicking.rs"
        );
        assert_eq!(relative_source_path("/tmp/build/handler.rs"), "build/handler.rs");
        assert_eq!(relative_source_path("src/fault.rs"), "src/fault.rs");
        assert_eq!(relative_source_path("main.rs"), "main.rs");
    }

    #[test]
    fn test_normalize_closures() {
        assert_eq!(
            normalize_closures("my_app::main::{closure#0}::{closure#1}"),
            "my_app::main::{{closure}}::{{closure}}"
        );
        assert_eq!(normalize_closures("my_app::main::{{closure}}"), "my_app::main::{{closure}}");
        assert_eq!(normalize_closures("my_app::main"), "my_app::main");
    }

    #[test]
    fn test_strip_module_path() {
        assert_eq!(strip_module_path("my_app::routes::Api::serve"), "Api::serve");
        assert_eq!(strip_module_path("my_app::routes::index"), "index");
        assert_eq!(strip_module_path("my_app::main::{{closure}}"), "main::{{closure}}");
        assert_eq!(
            strip_module_path("my_app::tests::run::{{closure}}::{{closure}}"),
            "run::{{closure}}::{{closure}}"
        );
        assert_eq!(
            strip_module_path("<my_app::Api as fezz_lambda::FezzHandler>::serve"),
            "<my_app::Api as fezz_lambda::FezzHandler>::serve"
        );
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("my_crate::errors::MyError"), "MyError");
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(short_type_name("&str"), "&str");
        assert_eq!(
            short_type_name("alloc::boxed::Box<dyn core::error::Error>"),
            "Box<dyn core::error::Error>"
        );
    }
}
