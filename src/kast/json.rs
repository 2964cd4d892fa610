//! Structural encoding of JSON payloads (bodies, constants) as terms.
//!
//! ```text
//! null            -> noValue
//! true / 3 / "s"  -> tokens of sort Bool / Int / String
//! [a, b]          -> list(a, b)
//! {"Call": x}     -> Call(x)                 (single capitalised key)
//! {"k1": a, ...}  -> record(k1(a), ...)      (keys in sorted order)
//! ```

use super::Term;
use serde_json::Value;

/// Encode a JSON value as a term
pub fn encode(value: &Value) -> Term {
    match value {
        Value::Null => Term::constant("noValue"),
        Value::Bool(b) => Term::bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Term::int(i128::from(i)),
            None => match n.as_u64() {
                Some(u) => Term::int(i128::from(u)),
                None => Term::Token {
                    token: n.to_string(),
                    sort: "Float".to_string(),
                },
            },
        },
        Value::String(s) => Term::string(s.clone()),
        Value::Array(items) => Term::list(items.iter().map(encode).collect()),
        Value::Object(obj) => {
            if obj.len() == 1 {
                if let Some((key, inner)) = obj.iter().next() {
                    if key.chars().next().map_or(false, char::is_uppercase) {
                        return Term::apply(key.clone(), vec![encode(inner)]);
                    }
                }
            }
            Term::apply(
                "record",
                obj.iter()
                    .map(|(k, v)| Term::apply(k.clone(), vec![encode(v)]))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_variant_and_record() {
        let t = encode(&json!({"Goto": {"target": 3}}));
        assert_eq!(
            t,
            Term::apply(
                "Goto",
                vec![Term::apply(
                    "record",
                    vec![Term::apply("target", vec![Term::int(3)])]
                )]
            )
        );
        assert_eq!(encode(&json!(null)), Term::constant("noValue"));
        assert_eq!(encode(&json!("Return")), Term::string("Return"));
    }

    #[test]
    fn test_record_keys_sorted() {
        let t = encode(&json!({"b": 1, "a": 2}));
        let labels: Vec<_> = t.args().iter().filter_map(Term::label).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }
}
