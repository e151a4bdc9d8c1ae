//! Byte-level helpers shared by the cloud query executors.

use std::borrow::Cow;

const WEB_HDR_ACCEPT_ENC: &str = "Accept-Encoding:";

/// Escape raw bytes for embedding inside a JSON string literal.
///
/// Tabs are dropped. Newlines are dropped, or written as `\n` when
/// `keep_newlines` is set. Other control bytes become `\u00XX`, and `"` and
/// `\` are backslash-escaped. Everything else is copied unchanged. The
/// output grows as needed: a control-heavy input can expand six-fold.
pub fn encode_json_string(src: &[u8], keep_newlines: bool) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut dst = Vec::with_capacity(src.len() + src.len() / 8);
    for &byte in src {
        match byte {
            b'\n' => {
                if keep_newlines {
                    dst.extend_from_slice(b"\\n");
                }
            }
            b'\t' => {}
            0x00..=0x1F => {
                dst.extend_from_slice(b"\\u00");
                dst.push(HEX[usize::from(byte >> 4)]);
                dst.push(HEX[usize::from(byte & 0x0F)]);
            }
            b'"' | b'\\' => {
                dst.push(b'\\');
                dst.push(byte);
            }
            _ => dst.push(byte),
        }
    }
    dst
}

/// Split a query into its path and the query string after the first `?`.
pub fn split_query(query: &str) -> (&str, &str) {
    match query.split_once('?') {
        Some((path, query_string)) => (path, query_string),
        None => (query, ""),
    }
}

/// The API endpoint is the last path segment, `noop` without any `/`.
pub fn endpoint_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => "noop",
    }
}

/// Decode `%XX` escapes and `+` as space. Invalid UTF-8 is replaced.
pub fn url_decode(query_string: &str) -> String {
    let plus_decoded: Cow<'_, str> = if query_string.contains('+') {
        Cow::Owned(query_string.replace('+', " "))
    } else {
        Cow::Borrowed(query_string)
    };
    let bytes = urlencoding::decode_binary(plus_decoded.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Whether the request head advertises gzip in its `Accept-Encoding` line.
pub fn accepts_gzip(request_head: &str) -> bool {
    let Some(start) = request_head.find(WEB_HDR_ACCEPT_ENC) else {
        return false;
    };
    let rest = &request_head[start + WEB_HDR_ACCEPT_ENC.len()..];
    match (rest.find("\r\n"), rest.find("gzip")) {
        (Some(end), Some(gzip)) => gzip < end,
        _ => false,
    }
}

/// Replace control characters so a query can be logged on one line.
pub fn strip_control_characters(text: &str) -> Cow<'_, str> {
    if text.chars().any(char::is_control) {
        Cow::Owned(text.chars().map(|c| if c.is_control() { ' ' } else { c }).collect())
    } else {
        Cow::Borrowed(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(src: &[u8], keep_newlines: bool) -> String {
        String::from_utf8(encode_json_string(src, keep_newlines)).unwrap()
    }

    fn decode(encoded: &str) -> String {
        serde_json::from_str(&format!("\"{}\"", encoded)).unwrap()
    }

    #[test]
    fn test_newlines_and_tabs() {
        assert_eq!(encode(b"a\nb\tc", false), "abc");
        assert_eq!(encode(b"a\nb\tc", true), "a\\nbc");
        assert_eq!(decode(&encode(b"line1\nline2", true)), "line1\nline2");
    }

    #[test]
    fn test_control_bytes_use_uppercase_hex() {
        assert_eq!(encode(&[0x01], false), "\\u0001");
        assert_eq!(encode(&[0x0B], false), "\\u000B");
        assert_eq!(encode(&[0x0F], false), "\\u000F");
        assert_eq!(encode(&[0x1F], false), "\\u001F");
        assert_eq!(encode(&[0x00], false), "\\u0000");
    }

    #[test]
    fn test_worst_case_expansion() {
        let src = vec![0x01u8; 1000];
        let out = encode_json_string(&src, false);
        assert_eq!(out.len(), 6000);
    }

    #[test]
    fn test_decode_roundtrip_keeps_quotes_and_controls() {
        let src = "say \"hi\" \\ back\r\u{1}\u{1f}end";
        let once = decode(&encode(src.as_bytes(), true));
        assert_eq!(once, src);
        let twice = decode(&encode(once.as_bytes(), true));
        assert_eq!(twice, src);
    }

    #[test]
    fn test_json_body_survives_embedding() {
        let body = br#"{"labels":["time","user"],"note":"a \"quoted\" word"}"#;
        let decoded = decode(&encode(body, false));
        let value: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(value["note"], "a \"quoted\" word");
    }

    #[test]
    fn test_split_query_and_endpoint() {
        let (path, qs) = split_query("/api/v1/data?chart=system.cpu&after=-60");
        assert_eq!(path, "/api/v1/data");
        assert_eq!(qs, "chart=system.cpu&after=-60");
        assert_eq!(endpoint_name(path), "data");

        assert_eq!(split_query("/api/v1/info"), ("/api/v1/info", ""));
        assert_eq!(endpoint_name("info"), "noop");
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("chart=system.cpu&dims=user%2Csystem"), "chart=system.cpu&dims=user,system");
        assert_eq!(url_decode("label=a+b"), "label=a b");
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip("GET /api/v1/data HTTP/1.1\r\nAccept-Encoding: gzip\r\n\r\n"));
        assert!(accepts_gzip("GET / HTTP/1.1\r\nAccept-Encoding: deflate, gzip\r\nHost: x\r\n"));
        assert!(!accepts_gzip("GET / HTTP/1.1\r\nAccept-Encoding: deflate\r\nX-Gzip: gzip\r\n"));
        assert!(!accepts_gzip("GET / HTTP/1.1\r\nAccept-Encoding: GZIP\r\n"));
        assert!(!accepts_gzip("GET / HTTP/1.1\r\nHost: x\r\n"));
    }

    #[test]
    fn test_strip_control_characters() {
        assert_eq!(strip_control_characters("/api/v1/info\r\n"), "/api/v1/info  ");
        assert!(matches!(strip_control_characters("/api/v1/info"), Cow::Borrowed(_)));
    }
}
