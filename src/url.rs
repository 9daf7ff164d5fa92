//! Minimal URL helpers for navigation targets: query parsing and building.

use std::collections::HashMap;

/// Percent-decoding for URL query parameters. `+` decodes to a space and
/// multi-byte UTF-8 sequences are reassembled; invalid escapes are kept
/// verbatim.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encode everything outside the unreserved set.
pub fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Parse a query string into key-value pairs. Later duplicates win.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

/// Build a query string from ordered pairs.
pub fn build_query(pairs: &[(&str, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Split `/path?query` into `(path, query)`; the query excludes the `?`.
pub fn split_url(url: &str) -> (&str, &str) {
    match url.find('?') {
        Some(idx) => (&url[..idx], &url[idx + 1..]),
        None => (url, ""),
    }
}

/// Return `url` with `key` set to `value` (or removed when `value` is None),
/// keeping the other parameters in their original order.
pub fn with_param(url: &str, key: &str, value: Option<&str>) -> String {
    let (path, query) = split_url(url);
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let k = url_decode(parts.next()?);
            let v = url_decode(parts.next().unwrap_or(""));
            Some((k, v))
        })
        .filter(|(k, _)| k != key)
        .collect();
    if let Some(v) = value {
        pairs.push((key.to_string(), v.to_string()));
    }
    if pairs.is_empty() {
        return path.to_string();
    }
    let borrowed: Vec<(&str, String)> = pairs.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    format!("{}?{}", path, build_query(&borrowed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode_basic() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("a%26b"), "a&b");
        assert_eq!(url_decode("plain"), "plain");
    }

    #[test]
    fn test_url_decode_utf8() {
        assert_eq!(url_decode("%E7%8E%8B"), "王");
    }

    #[test]
    fn test_url_decode_bad_escape_kept() {
        assert_eq!(url_decode("100%zz"), "100%zz");
        assert_eq!(url_decode("trailing%"), "trailing%");
        assert_eq!(url_decode("short%4"), "short%4");
    }

    #[test]
    fn test_url_encode_reserved() {
        assert_eq!(url_encode("a b&c=d"), "a%20b%26c%3Dd");
        assert_eq!(url_encode("safe-_.~"), "safe-_.~");
    }

    #[test]
    fn test_encode_decode_inverse() {
        let s = "conv_1700000000000_abc/+= 王";
        assert_eq!(url_decode(&url_encode(s)), s);
    }

    #[test]
    fn test_parse_query_basic() {
        let params = parse_query("from=index&doctor_id=wangzhiruo");
        assert_eq!(params.get("from").map(|s| s.as_str()), Some("index"));
        assert_eq!(params.get("doctor_id").map(|s| s.as_str()), Some("wangzhiruo"));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
        assert!(parse_query("?").is_empty());
    }

    #[test]
    fn test_parse_query_duplicate_keys_last_wins() {
        let params = parse_query("a=1&a=2");
        assert_eq!(params.get("a").map(|s| s.as_str()), Some("2"));
    }

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("/ai/index.html?from=analysis"), ("/ai/index.html", "from=analysis"));
        assert_eq!(split_url("/index/index.html"), ("/index/index.html", ""));
    }

    #[test]
    fn test_with_param_set_and_remove() {
        let url = "/upload/index.html?from=index&doctor_id=wangzhiruo";
        let added = with_param(url, "backup", Some("abc="));
        assert_eq!(added, "/upload/index.html?from=index&doctor_id=wangzhiruo&backup=abc%3D");
        let removed = with_param(&added, "backup", None);
        assert_eq!(removed, url);
        assert_eq!(with_param("/x?only=1", "only", None), "/x");
    }
}
