//! Canonical JSON.
//!
//! Every hash and signature in HSN is computed over the output of
//! [`canonicalize`]. The format is plain JSON with:
//!
//! - object keys sorted by the byte order of their UTF-8 encoding,
//! - no whitespace between tokens,
//! - strings escaped exactly as `serde_json` escapes them,
//! - numbers in `serde_json`'s shortest round-trip form,
//! - array order preserved.
//!
//! Changing any of these rules invalidates every stored signature.

use serde::Serialize;
use serde_json::Value;

use crate::error::CanonicalError;

/// Canonicalize an already-built JSON value.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize `value` through `serde_json` and canonicalize the result.
pub fn to_canonical<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalError> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize(&value))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Display on a JSON string value yields the escaped, quoted literal.
    out.push_str(&Value::String(s.to_owned()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_no_whitespace() {
        let value = json!({ "b": 1, "a": { "d": [3, 2, 1], "c": null } });
        assert_eq!(canonicalize(&value), r#"{"a":{"c":null,"d":[3,2,1]},"b":1}"#);
    }

    #[test]
    fn test_string_escaping() {
        let value = json!({ "text": "line\n\"quoted\" \\ tab\t" });
        assert_eq!(
            canonicalize(&value),
            r#"{"text":"line\n\"quoted\" \\ tab\t"}"#
        );
    }

    #[test]
    fn test_distinguishable_values_differ() {
        assert_ne!(canonicalize(&json!({ "a": 1 })), canonicalize(&json!({ "a": "1" })));
        assert_ne!(canonicalize(&json!([1, 2])), canonicalize(&json!([2, 1])));
        assert_ne!(canonicalize(&json!({ "a": null })), canonicalize(&json!({})));
        assert_ne!(canonicalize(&json!(true)), canonicalize(&json!("true")));
    }

    #[test]
    fn test_repeated_calls_identical() {
        let value = json!({ "type": "chat.append", "payload": { "text": "hi", "meta": { "b": 2, "a": 1 } } });
        assert_eq!(canonicalize(&value), canonicalize(&value));
    }

    #[test]
    fn test_to_canonical_matches_value_path() {
        #[derive(Serialize)]
        struct Record {
            zeta: u32,
            alpha: &'static str,
        }
        let record = Record { zeta: 7, alpha: "x" };
        assert_eq!(to_canonical(&record).unwrap(), r#"{"alpha":"x","zeta":7}"#);
    }

    #[test]
    fn test_unicode_keys_ordered_by_bytes() {
        let value = json!({ "é": 1, "z": 2, "A": 3 });
        assert_eq!(canonicalize(&value), r#"{"A":3,"z":2,"é":1}"#);
    }

    fn object_text(entries: &[(String, i64)]) -> String {
        let body: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
            .collect();
        format!("{{{}}}", body.join(", "))
    }

    proptest! {
        #[test]
        fn prop_insertion_order_irrelevant(
            entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12)
        ) {
            let forward: Vec<(String, i64)> = entries.clone().into_iter().collect();
            let mut reversed = forward.clone();
            reversed.reverse();

            let a: Value = serde_json::from_str(&object_text(&forward)).unwrap();
            let b: Value = serde_json::from_str(&object_text(&reversed)).unwrap();
            prop_assert_eq!(canonicalize(&a), canonicalize(&b));
        }

        #[test]
        fn prop_reparse_is_stable(text in ".{0,40}", n in any::<i64>()) {
            let value = json!({ "s": text, "n": n, "nested": [{ "k": n }] });
            let once = canonicalize(&value);
            let reparsed: Value = serde_json::from_str(&once).unwrap();
            prop_assert_eq!(canonicalize(&reparsed), once);
        }
    }
}
