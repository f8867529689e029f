//! Header multi-map keyed by canonical MIME header names.

use serde::{Serialize, Serializer};
use std::collections::btree_map::{self, BTreeMap};

/// Ordered header multi-map.
///
/// Keys are stored in canonical form (`content-type` becomes `Content-Type`)
/// and iterate in key order, so rendered JSON is deterministic. Values for a
/// single key keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the first value for a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&canonical_key(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Get every value for a header, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&canonical_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append a value, keeping any existing values.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(canonical_key(name))
            .or_default()
            .push(value.into());
    }

    /// Replace all values of a header with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(canonical_key(name), vec![value.into()]);
    }

    /// Replace all values of a header.
    pub fn set_all(&mut self, name: &str, values: Vec<String>) {
        self.entries.insert(canonical_key(name), values);
    }

    /// Remove a header, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&canonical_key(name))
    }

    /// Whether the header is present with a non-empty first value.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Iterate over `(name, values)` pairs in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<String>> {
        self.entries.iter()
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fold each header into one comma-joined value.
    ///
    /// `Set-Cookie` cannot be folded since commas are legal inside cookie
    /// attributes; `cookie_policy` decides what happens to it.
    pub(crate) fn fold(&self, cookie_policy: CookieFold) -> BTreeMap<String, String> {
        let mut folded = BTreeMap::new();
        for (key, values) in &self.entries {
            if key == SET_COOKIE {
                if let (CookieFold::FirstValue, Some(first)) = (cookie_policy, values.first()) {
                    folded.insert(key.clone(), first.clone());
                }
                continue;
            }
            folded.insert(key.clone(), values.join(", "));
        }
        folded
    }
}

pub(crate) const SET_COOKIE: &str = "Set-Cookie";

/// How [`Headers::fold`] treats `Set-Cookie`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CookieFold {
    /// Expose only the first cookie.
    FirstValue,
    /// Leave cookies out entirely.
    Omit,
}

impl<'a> IntoIterator for &'a Headers {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = btree_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

/// Canonicalize a header name.
///
/// The first letter and any letter following a hyphen are upper-cased, the
/// rest lower-cased. Names containing bytes that are not valid header token
/// characters are returned unchanged.
pub fn canonical_key(name: &str) -> String {
    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("content-type"), "Content-Type");
        assert_eq!(canonical_key("X-AMZN-trace-ID"), "X-Amzn-Trace-Id");
        assert_eq!(canonical_key("host"), "Host");
        assert_eq!(canonical_key("bad header"), "bad header");
    }

    #[test]
    fn test_add_keeps_order() {
        let mut headers = Headers::new();
        headers.add("bar", "bar1");
        headers.add("Bar", "bar2");
        assert_eq!(headers.get("BAR"), Some("bar1"));
        assert_eq!(headers.get_all("bar"), ["bar1", "bar2"]);
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_set_replaces() {
        let mut headers = Headers::new();
        headers.add("foo", "a");
        headers.add("foo", "b");
        headers.set("foo", "c");
        assert_eq!(headers.get_all("foo"), ["c"]);
        assert!(headers.remove("foo").is_some());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_fold_set_cookie() {
        let mut headers = Headers::new();
        headers.add("bar", "bar1");
        headers.add("bar", "bar2");
        headers.add("Set-Cookie", "foo1=bar1");
        headers.add("Set-Cookie", "foo2=bar2");

        let first = headers.fold(CookieFold::FirstValue);
        assert_eq!(first["Bar"], "bar1, bar2");
        assert_eq!(first["Set-Cookie"], "foo1=bar1");

        let omitted = headers.fold(CookieFold::Omit);
        assert!(!omitted.contains_key("Set-Cookie"));
    }
}
