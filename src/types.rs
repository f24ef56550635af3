use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ConversionError;
use crate::value::{SqlValue, TypeKey};

/// A conversion rule applied to values before they are bound or embedded.
///
/// `bind_value` rewrites a value just before it is recorded as a parameter;
/// `embedded_value` turns a value into literal SQL text. The default
/// `embedded_value` falls back to [`SqlValue::embedded_text`].
pub trait SqlValueType: Send + Sync {
    fn bind_value(&self, value: &SqlValue) -> Result<SqlValue, ConversionError>;

    fn embedded_value(&self, value: &SqlValue) -> Result<String, ConversionError> {
        Ok(value.embedded_text())
    }
}

#[derive(Clone)]
struct PathRule {
    registered: TypeKey,
    rule: Arc<dyn SqlValueType>,
}

impl PathRule {
    fn get(&self, required: &TypeKey) -> Option<Arc<dyn SqlValueType>> {
        self.registered
            .accepts(required)
            .then(|| Arc::clone(&self.rule))
    }
}

/// Precedence-ordered lookup from (runtime type, property path) to a
/// conversion rule.
///
/// Rules can be registered per runtime type or per property path. Cloning a
/// registry is cheap: the maps are copied but the rules themselves are shared,
/// so a caller can layer local overrides on a shared registry without
/// mutating it.
#[derive(Clone, Default)]
pub struct ValueTypeRegistry {
    type_map: BTreeMap<TypeKey, Arc<dyn SqlValueType>>,
    path_map: BTreeMap<String, PathRule>,
}

impl ValueTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a rule for every value of the given runtime type.
    pub fn register<T: SqlValueType + 'static>(&mut self, key: TypeKey, rule: T) {
        self.type_map.insert(key, Arc::new(rule));
    }

    /// Registers a rule for one property path, constrained to the given
    /// runtime type.
    pub fn register_path<T: SqlValueType + 'static>(
        &mut self,
        path: impl Into<String>,
        key: TypeKey,
        rule: T,
    ) {
        self.path_map.insert(
            path.into(),
            PathRule {
                registered: key,
                rule: Arc::new(rule),
            },
        );
    }

    /// Finds the conversion rule for a required runtime type and an optional
    /// property path.
    ///
    /// Precedence: exact path match, then index-stripped path variants in
    /// generation order, then the type map, then the [`TypeKey::AnyEnum`]
    /// fallback for enumeration types.
    pub fn find_value_type(
        &self,
        required: &TypeKey,
        path: Option<&str>,
    ) -> Option<Arc<dyn SqlValueType>> {
        if let Some(path) = path {
            if let Some(rule) = self.path_map.get(path).and_then(|h| h.get(required)) {
                return Some(rule);
            }

            let mut stripped = Vec::new();
            add_stripped_paths(&mut stripped, "", path);
            for candidate in &stripped {
                if let Some(rule) = self
                    .path_map
                    .get(candidate.as_str())
                    .and_then(|h| h.get(required))
                {
                    return Some(rule);
                }
            }
        }

        if let Some(rule) = self.type_map.get(required) {
            return Some(Arc::clone(rule));
        }

        if matches!(required, TypeKey::Enum(_)) {
            if let Some(rule) = self.type_map.get(&TypeKey::AnyEnum) {
                return Some(Arc::clone(rule));
            }
        }

        None
    }
}

impl std::fmt::Debug for ValueTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueTypeRegistry")
            .field("type_keys", &self.type_map.keys().collect::<Vec<_>>())
            .field("paths", &self.path_map.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Generates the index-stripped variants of a property path.
///
/// Each bracketed segment is removed three ways: fully stripped, stripped
/// with recursion on the suffix, and retained with recursion on the suffix.
/// `"abc[1].efg[key]"` yields `["abc.efg[key]", "abc.efg", "abc[1].efg"]`.
fn add_stripped_paths(out: &mut Vec<String>, nested: &str, path: &str) {
    let Some(start) = path.find('[') else {
        return;
    };
    let Some(end) = path[start..].find(']').map(|i| start + i) else {
        return;
    };

    let prefix = &path[..start];
    let key = &path[start..=end];
    let suffix = &path[end + 1..];

    out.push(format!("{nested}{prefix}{suffix}"));
    add_stripped_paths(out, &format!("{nested}{prefix}"), suffix);
    add_stripped_paths(out, &format!("{nested}{prefix}{key}"), suffix);
}
