//! Connection property strings: `key=value` pairs separated by `;`.
//!
//! `;;` stands for a literal `;`. Everything after the first `=` of a pair is
//! the value, verbatim. Empty segments are ignored, so a trailing `;` is fine.

use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};

/// Split on unescaped `;`, turning `;;` into `;`.
fn segments(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != ';' { cur.push(c); continue; }
        if chars.peek() == Some(&';') {
            chars.next();
            cur.push(';');
        } else {
            out.push(std::mem::take(&mut cur));
        }
    }
    out.push(cur);
    out
}

pub fn parse_properties(s: &str) -> AppResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for seg in segments(s) {
        if seg.is_empty() { continue; }
        let Some((key, value)) = seg.split_once('=') else {
            return Err(AppError::malformed("bad_properties", format!("property without '=': {:?}", seg)));
        };
        if key.is_empty() { return Err(AppError::malformed("bad_properties", format!("property with empty key: {:?}", seg))); }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Inverse of [`parse_properties`].
pub fn format_properties(map: &BTreeMap<String, String>) -> String {
    map.iter().map(|(k, v)| format!("{}={}", k.replace(';', ";;"), v.replace(';', ";;"))).collect::<Vec<_>>().join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(k: &str, v: &str) -> BTreeMap<String, String> { BTreeMap::from([(k.to_string(), v.to_string())]) }

    #[test]
    fn empty_string_is_empty_map() {
        assert!(parse_properties("").unwrap().is_empty());
        assert!(parse_properties(";").unwrap().is_empty());
    }

    #[test]
    fn simple_pairs_and_trailing_separator() {
        assert_eq!(parse_properties("key1=val1").unwrap(), one("key1", "val1"));
        assert_eq!(parse_properties("key1=val1;").unwrap(), one("key1", "val1"));
        let m = parse_properties("a=1;b=2;c=").unwrap();
        assert_eq!(m.len(), 3);
        assert_eq!(m["c"], "");
    }

    #[test]
    fn escaped_semicolons_and_verbatim_equals() {
        assert_eq!(parse_properties("key3=a=b;;c===d;;;;e=f").unwrap(), one("key3", "a=b;c===d;;e=f"));
        // odd run: one escaped pair then a separator
        let m = parse_properties("a=1;;;b=2").unwrap();
        assert_eq!(m["a"], "1;");
        assert_eq!(m["b"], "2");
    }

    #[test]
    fn malformed_segments_are_rejected() {
        assert_eq!(parse_properties("novalue").unwrap_err().code_str(), "bad_properties");
        assert!(parse_properties("a=1;=2").is_err());
        assert_eq!(parse_properties("a=1;b").unwrap_err().http_status(), 400);
    }

    #[test]
    fn format_is_inverse_of_parse() {
        let src = "key3=a=b;;c===d;;;;e=f;path=/tmp/x.db";
        let m = parse_properties(src).unwrap();
        assert_eq!(parse_properties(&format_properties(&m)).unwrap(), m);
        assert_eq!(format_properties(&one("k", "x;y")), "k=x;;y");
    }
}
