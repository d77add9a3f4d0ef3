//! Input sanitization applied after validation.

use serde_json::{Map, Value};

/// Strip control characters (keeping `\n`, `\r`, `\t`) and truncate to
/// `max_len` characters.
pub(crate) fn sanitize_str(s: &str, max_len: usize) -> String {
    s.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .take(max_len)
        .collect()
}

/// Sanitize every string reachable from `value`, in place. Object keys are
/// left alone.
pub(crate) fn sanitize_value(value: &mut Value, max_len: usize) {
    let mut stack: Vec<&mut Value> = vec![value];
    while let Some(v) = stack.pop() {
        match v {
            Value::String(s) => {
                if needs_sanitizing(s, max_len) {
                    *s = sanitize_str(s, max_len);
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => stack.extend(map.values_mut()),
            _ => {}
        }
    }
}

pub(crate) fn sanitize_args(args: &mut Map<String, Value>, max_len: usize) {
    for v in args.values_mut() {
        sanitize_value(v, max_len);
    }
}

fn needs_sanitizing(s: &str, max_len: usize) -> bool {
    s.len() > max_len
        || s
            .chars()
            .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_control_characters_but_keeps_whitespace() {
        assert_eq!(sanitize_str("a\u{0}b\u{7}c\n\td\r", 100), "abc\n\td\r");
    }

    #[test]
    fn truncates_by_characters() {
        assert_eq!(sanitize_str("héllo wörld", 5), "héllo");
    }

    #[test]
    fn walks_nested_values() {
        let mut v = json!({"a": ["x\u{1b}y", {"b": "abcdef"}], "n": 3});
        sanitize_value(&mut v, 4);
        assert_eq!(v, json!({"a": ["xy", {"b": "abcd"}], "n": 3}));
    }
}
