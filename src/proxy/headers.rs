//! Single-valued HTTP header map and the helpers that operate on it

use std::fmt;

use indexmap::IndexMap;

/// Headers that only apply to one transport leg and must not be forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Header map keyed by lower-cased name with one value per name.
///
/// Inserting a name that is already present replaces its value (last one
/// wins) but keeps its original position, so serialising a map is stable.
/// Values are stored as the raw bytes received.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: IndexMap<String, Vec<u8>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.entries
            .insert(name.trim().to_ascii_lowercase(), value.into());
    }

    /// Value as text; `None` when absent or not valid UTF-8.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_raw(name)
            .and_then(|value| std::str::from_utf8(value).ok())
    }

    pub fn get_raw(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.shift_remove(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Append `Name: value\r\n` lines followed by the blank line that ends a
    /// header block.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in self.iter() {
            buf.extend_from_slice(canonical_name(name).as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
    }
}

impl fmt::Debug for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.iter()
                    .map(|(name, value)| (name, String::from_utf8_lossy(value))),
            )
            .finish()
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Upper-case the first letter of every dash-separated segment, e.g.
/// `content-length` becomes `Content-Length`.
pub fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
        if c == '-' {
            upper = true;
        }
    }
    out
}

/// Drop every header that is meaningful only for a single connection,
/// including those listed in the `Connection` header itself.
pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    if let Some(connection) = headers.get("connection").map(str::to_string) {
        for name in connection.split(',') {
            let name = name.trim();
            if !name.is_empty() {
                headers.remove(name);
            }
        }
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_lowercases_and_last_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("X-Trace", "1");
        headers.insert("CONTENT-TYPE", "text/html");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        let names: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["content-type", "x-trace"]);
    }

    #[test]
    fn test_canonical_name() {
        assert_eq!(canonical_name("content-length"), "Content-Length");
        assert_eq!(canonical_name("host"), "Host");
        assert_eq!(canonical_name("x-forwarded-for"), "X-Forwarded-For");
        assert_eq!(canonical_name("-x"), "-X");
        assert_eq!(canonical_name("1st-party"), "1St-Party");
    }

    #[test]
    fn test_write_to() {
        let headers: HeaderMap = [("host", "example.com"), ("content-length", "6")]
            .into_iter()
            .collect();
        let mut buf = Vec::new();
        headers.write_to(&mut buf);
        assert_eq!(buf, b"Host: example.com\r\nContent-Length: 6\r\n\r\n");
    }

    #[test]
    fn test_write_empty_map() {
        let mut buf = Vec::new();
        HeaderMap::new().write_to(&mut buf);
        assert_eq!(buf, b"\r\n");
    }

    #[test]
    fn test_remove_hop_by_hop_headers() {
        let mut headers: HeaderMap = [
            ("host", "example.com"),
            ("connection", "keep-alive, X-Session"),
            ("keep-alive", "timeout=5"),
            ("x-session", "abc"),
            ("proxy-authorization", "Basic Zm9v"),
            ("transfer-encoding", "chunked"),
            ("accept", "*/*"),
        ]
        .into_iter()
        .collect();

        remove_hop_by_hop_headers(&mut headers);

        let remaining: Vec<&str> = headers.iter().map(|(k, _)| k).collect();
        assert_eq!(remaining, vec!["host", "accept"]);
    }
}
