//! Content classification.
//!
//! Two questions are answered here: which media type a body prefix looks
//! like when the handler never set one, and whether a media type must travel
//! base64-encoded through the Lambda JSON envelope.

use crate::http::Headers;

/// Number of leading bytes considered when sniffing.
pub const SNIFF_LEN: usize = 512;

/// Header a handler can set to force the text/binary decision.
pub const LAMBDA_CONTENT_ENCODING: &str = "X-Lambda-Http-Content-Encoding";

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Whether a response with these headers must be base64-encoded.
pub fn is_binary(headers: &Headers) -> bool {
    match headers.get(LAMBDA_CONTENT_ENCODING) {
        Some(v) if v.eq_ignore_ascii_case("text") => return false,
        Some(v) if v.eq_ignore_ascii_case("binary") => return true,
        _ => {}
    }
    if let Some(encoding) = headers.get("Content-Encoding") {
        let encoding = encoding.trim();
        if !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity") {
            return true;
        }
    }
    is_binary_media_type(headers.get("Content-Type").unwrap_or(""))
}

/// Whether a `Content-Type` value names a binary media type.
///
/// `text/*`, JSON, JavaScript, YAML and XML (including `+json`, `+yaml` and
/// `+xml` suffixes) are text; everything else, including an empty value, is
/// binary.
pub fn is_binary_media_type(content_type: &str) -> bool {
    let media_type = content_type
        .split_once(';')
        .map_or(content_type, |(m, _)| m)
        .trim();
    let main_type = media_type.split_once('/').map_or(media_type, |(m, _)| m);

    if main_type.eq_ignore_ascii_case("text") {
        return false;
    }
    const TEXT_TYPES: [&str; 4] = [
        "application/json",
        "application/yaml",
        "application/javascript",
        "application/xml",
    ];
    if TEXT_TYPES.iter().any(|t| media_type.eq_ignore_ascii_case(t)) {
        return false;
    }

    let suffix = media_type.rfind('+').map_or("", |i| &media_type[i..]);
    !["+json", "+yaml", "+xml"]
        .iter()
        .any(|s| suffix.eq_ignore_ascii_case(s))
}

enum Signature {
    /// Case-insensitive HTML tag, must be followed by a space or `>`.
    Html(&'static [u8]),
    /// Exact bytes after optional leading whitespace.
    Text(&'static [u8], &'static str),
    /// Exact bytes at offset zero.
    Exact(&'static [u8], &'static str),
    /// Masked comparison at offset zero.
    Masked {
        mask: &'static [u8],
        pattern: &'static [u8],
        content_type: &'static str,
    },
}

const SIGNATURES: &[Signature] = &[
    Signature::Html(b"<!DOCTYPE HTML"),
    Signature::Html(b"<HTML"),
    Signature::Html(b"<HEAD"),
    Signature::Html(b"<SCRIPT"),
    Signature::Html(b"<IFRAME"),
    Signature::Html(b"<H1"),
    Signature::Html(b"<DIV"),
    Signature::Html(b"<FONT"),
    Signature::Html(b"<TABLE"),
    Signature::Html(b"<A"),
    Signature::Html(b"<STYLE"),
    Signature::Html(b"<TITLE"),
    Signature::Html(b"<B"),
    Signature::Html(b"<BODY"),
    Signature::Html(b"<BR"),
    Signature::Html(b"<P"),
    Signature::Html(b"<!--"),
    Signature::Text(b"<?xml", "text/xml; charset=utf-8"),
    Signature::Exact(b"%PDF-", "application/pdf"),
    Signature::Exact(b"%!PS-Adobe-", "application/postscript"),
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pattern: b"\xFE\xFF\x00\x00",
        content_type: "text/plain; charset=utf-16be",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\x00\x00",
        pattern: b"\xFF\xFE\x00\x00",
        content_type: "text/plain; charset=utf-16le",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\x00",
        pattern: b"\xEF\xBB\xBF\x00",
        content_type: TEXT_PLAIN_UTF8,
    },
    Signature::Exact(b"\x00\x00\x01\x00", "image/x-icon"),
    Signature::Exact(b"\x00\x00\x02\x00", "image/x-icon"),
    Signature::Exact(b"BM", "image/bmp"),
    Signature::Exact(b"GIF87a", "image/gif"),
    Signature::Exact(b"GIF89a", "image/gif"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WEBPVP",
        content_type: "image/webp",
    },
    Signature::Exact(b"\x89PNG\x0D\x0A\x1A\x0A", "image/png"),
    Signature::Exact(b"\xFF\xD8\xFF", "image/jpeg"),
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00WAVE",
        content_type: "audio/wave",
    },
    Signature::Masked {
        mask: b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        pattern: b"RIFF\x00\x00\x00\x00AVI ",
        content_type: "video/avi",
    },
    Signature::Exact(b"OggS\x00", "application/ogg"),
    Signature::Exact(b"MThd\x00\x00\x00\x06", "audio/midi"),
    Signature::Exact(b"ID3", "audio/mpeg"),
    Signature::Exact(b"\x1A\x45\xDF\xA3", "video/webm"),
    Signature::Exact(b"\x00\x01\x00\x00", "font/ttf"),
    Signature::Exact(b"OTTO", "font/otf"),
    Signature::Exact(b"ttcf", "font/collection"),
    Signature::Exact(b"wOFF", "font/woff"),
    Signature::Exact(b"wOF2", "font/woff2"),
    Signature::Exact(b"\x1F\x8B\x08", "application/x-gzip"),
    Signature::Exact(b"PK\x03\x04", "application/zip"),
    Signature::Exact(b"Rar!\x1A\x07\x00", "application/x-rar-compressed"),
    Signature::Exact(b"Rar!\x1A\x07\x01\x00", "application/x-rar-compressed"),
    Signature::Exact(b"7z\xBC\xAF\x27\x1C", "application/x-7z-compressed"),
    Signature::Exact(b"\x00\x61\x73\x6D", "application/wasm"),
];

/// Infer a `Content-Type` from the first bytes of a body.
///
/// Only the first [`SNIFF_LEN`] bytes are inspected. Always returns a valid
/// media type; falls back to `text/plain; charset=utf-8` when the prefix has
/// no binary control bytes and `application/octet-stream` otherwise.
pub fn detect_content_type(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    let first_non_ws = data
        .iter()
        .position(|b| !is_whitespace(*b))
        .unwrap_or(data.len());
    let trimmed = &data[first_non_ws..];

    for sig in SIGNATURES {
        let matched = match sig {
            Signature::Html(tag) => html_matches(trimmed, tag),
            Signature::Text(prefix, ct) => trimmed.starts_with(prefix).then_some(*ct),
            Signature::Exact(prefix, ct) => data.starts_with(prefix).then_some(*ct),
            Signature::Masked {
                mask,
                pattern,
                content_type,
            } => masked_matches(data, mask, pattern).then_some(*content_type),
        };
        if let Some(ct) = matched {
            return ct;
        }
    }

    if data.iter().any(|b| is_binary_byte(*b)) {
        OCTET_STREAM
    } else {
        TEXT_PLAIN_UTF8
    }
}

fn html_matches(data: &[u8], tag: &[u8]) -> Option<&'static str> {
    if data.len() < tag.len() + 1 {
        return None;
    }
    let prefix_matches = tag
        .iter()
        .zip(data)
        .all(|(t, d)| if t.is_ascii_uppercase() { *t == d.to_ascii_uppercase() } else { t == d });
    if !prefix_matches {
        return None;
    }
    matches!(data[tag.len()], b' ' | b'>').then_some("text/html; charset=utf-8")
}

fn masked_matches(data: &[u8], mask: &[u8], pattern: &[u8]) -> bool {
    data.len() >= pattern.len()
        && mask
            .iter()
            .zip(pattern)
            .zip(data)
            .all(|((m, p), d)| d & m == *p)
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn is_binary_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
