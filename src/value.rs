use std::collections::BTreeMap;

/// A value bound into (or embedded into) a processed SQL statement.
///
/// `Enum` carries the name of its enumeration so that conversion rules can be
/// registered either for one specific enumeration or for all of them (see
/// [`TypeKey::AnyEnum`]).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Enum { type_name: String, variant: String },
    Array(Vec<SqlValue>),
    Object(BTreeMap<String, SqlValue>),
}

impl SqlValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The registry key this value's runtime type maps to.
    pub fn type_key(&self) -> TypeKey {
        match self {
            Self::Null => TypeKey::Null,
            Self::Bool(_) => TypeKey::Bool,
            Self::Int(_) => TypeKey::Int,
            Self::Float(_) => TypeKey::Float,
            Self::Text(_) => TypeKey::Text,
            Self::Enum { type_name, .. } => TypeKey::Enum(type_name.clone()),
            Self::Array(_) => TypeKey::Array,
            Self::Object(_) => TypeKey::Object,
        }
    }

    /// Default stringification used when an embedded value has no registered
    /// conversion rule. Text is inlined verbatim, an enum value becomes its
    /// variant name, arrays are comma-joined, objects render as JSON.
    pub fn embedded_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Text(s) => s.clone(),
            Self::Enum { variant, .. } => variant.clone(),
            Self::Array(items) => items
                .iter()
                .map(Self::embedded_text)
                .collect::<Vec<_>>()
                .join(", "),
            Self::Object(_) => serde_json::Value::from(self).to_string(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for SqlValue {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&SqlValue> for serde_json::Value {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Bool(b) => Self::Bool(*b),
            SqlValue::Int(i) => Self::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f).map_or(Self::Null, Self::Number),
            SqlValue::Text(s) => Self::String(s.clone()),
            SqlValue::Enum { variant, .. } => Self::String(variant.clone()),
            SqlValue::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            SqlValue::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Key used to register and look up conversion rules by runtime type.
///
/// `Enum(name)` matches one specific enumeration; `AnyEnum` is the generic
/// supertype that matches every enumeration when no direct registration
/// exists.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeKey {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Array,
    Object,
    Enum(String),
    AnyEnum,
}

impl TypeKey {
    /// Whether a rule registered under `self` applies to a value of the
    /// `required` type.
    pub fn accepts(&self, required: &Self) -> bool {
        self == required || (matches!(self, Self::AnyEnum) && matches!(required, Self::Enum(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn json_round_trip() {
        let json: serde_json::Value = serde_json::json!({
            "name": "ada",
            "age": 36,
            "scores": [1, 2.5, null],
            "active": true,
        });
        let value = SqlValue::from(json.clone());
        assert_eq!(
            value,
            SqlValue::Object(BTreeMap::from([
                ("name".to_string(), SqlValue::Text("ada".to_string())),
                ("age".to_string(), SqlValue::Int(36)),
                (
                    "scores".to_string(),
                    SqlValue::Array(vec![
                        SqlValue::Int(1),
                        SqlValue::Float(2.5),
                        SqlValue::Null
                    ])
                ),
                ("active".to_string(), SqlValue::Bool(true)),
            ]))
        );
        assert_eq!(serde_json::Value::from(&value), json);
    }

    #[test]
    #[ntest::timeout(100)]
    fn embedded_text_defaults() {
        assert_eq!(SqlValue::Int(42).embedded_text(), "42");
        assert_eq!(SqlValue::Text("name desc".to_string()).embedded_text(), "name desc");
        assert_eq!(
            SqlValue::Enum {
                type_name: "Role".to_string(),
                variant: "ADMIN".to_string()
            }
            .embedded_text(),
            "ADMIN"
        );
        assert_eq!(
            SqlValue::Array(vec![SqlValue::Int(1), SqlValue::Int(2)]).embedded_text(),
            "1, 2"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn type_key_assignability() {
        assert!(TypeKey::AnyEnum.accepts(&TypeKey::Enum("Role".to_string())));
        assert!(!TypeKey::AnyEnum.accepts(&TypeKey::Text));
        assert!(TypeKey::Enum("Role".to_string()).accepts(&TypeKey::Enum("Role".to_string())));
        assert!(!TypeKey::Enum("Role".to_string()).accepts(&TypeKey::Enum("Job".to_string())));
    }
}
