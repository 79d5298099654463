//! Property values that may carry tokens at any depth.

use std::collections::BTreeMap;

use crate::token::Token;

/// A raw property value as authored in the construct tree.
///
/// Tokens can appear directly (`Value::Token`) or embedded in strings through
/// their string encoding (see [`Token::as_string`]).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Token(Token),
}

impl Value {
    /// Build a map value from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value.
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether a token appears anywhere inside this value.
    pub fn has_tokens(&self) -> bool {
        match self {
            Value::Token(_) => true,
            Value::String(s) => crate::encoding::contains_token(s),
            Value::List(items) => items.iter().any(Value::has_tokens),
            Value::Map(m) => m
                .iter()
                .any(|(k, v)| crate::encoding::contains_token(k) || v.has_tokens()),
            Value::Null | Value::Bool(_) | Value::Number(_) => false,
        }
    }

    /// Set a value at a dotted path inside a map, creating intermediate maps.
    ///
    /// Non-map intermediates are replaced.
    pub fn set_path(&mut self, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('.').collect();
        set_path_segments(self, &segments, value);
    }
}

fn set_path_segments(target: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !matches!(target, Value::Map(_)) {
        *target = Value::Map(BTreeMap::new());
    }
    if let Value::Map(map) = target {
        let entry = map.entry(first.to_string()).or_insert(Value::Null);
        set_path_segments(entry, rest, value);
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl From<Token> for Value {
    fn from(t: Token) -> Self {
        Value::Token(t)
    }
}

impl From<&Token> for Value {
    fn from(t: &Token) -> Self {
        Value::Token(t.clone())
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::list(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(v: Option<V>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_shape() {
        let json = serde_json::json!({"a": [1, "two", null], "b": {"c": true}});
        let value = Value::from(json);
        let map = value.as_map().unwrap();
        assert_eq!(
            map["a"],
            Value::List(vec![1i64.into(), "two".into(), Value::Null])
        );
        assert_eq!(map["b"], Value::map([("c", true)]));
        assert!(!value.has_tokens());
    }

    #[test]
    fn test_set_path_creates_intermediate_maps() {
        let mut value = Value::map([("Existing", "x")]);
        value.set_path("Config.Nested.Leaf", Value::from(5i64));
        value.set_path("Existing", Value::from("y"));

        let map = value.as_map().unwrap();
        assert_eq!(map["Existing"], Value::from("y"));
        let config = map["Config"].as_map().unwrap();
        assert_eq!(config["Nested"], Value::map([("Leaf", 5i64)]));
    }
}
