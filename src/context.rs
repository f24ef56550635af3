use std::collections::BTreeMap;

use crate::expr::EvaluationEnv;
use crate::types::ValueTypeRegistry;
use crate::value::SqlValue;

/// Supplies a template's variables and conversion rules at process time.
pub trait TemplateContext {
    fn value_type_registry(&self) -> &ValueTypeRegistry;

    fn evaluation_env(&self) -> EvaluationEnv<'_>;
}

/// A [`TemplateContext`] backed by a name/value map.
#[derive(Debug, Clone, Default)]
pub struct MapTemplateContext {
    variables: BTreeMap<String, SqlValue>,
    value_type_registry: ValueTypeRegistry,
    ignore_missing: bool,
}

impl MapTemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: BTreeMap<String, SqlValue>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn with_registry(value_type_registry: ValueTypeRegistry) -> Self {
        Self {
            value_type_registry,
            ..Self::default()
        }
    }

    pub fn add_variable(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> &mut Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// When set, unknown variables evaluate to `Null` instead of failing, so
    /// one template serves callers that only populate some of its variables.
    pub const fn set_ignore_missing(&mut self, ignore_missing: bool) -> &mut Self {
        self.ignore_missing = ignore_missing;
        self
    }

    /// Builds a context from a JSON object; each top-level key becomes a
    /// variable.
    pub fn from_json(json: serde_json::Value) -> Self {
        let variables = match SqlValue::from(json) {
            SqlValue::Object(map) => map,
            other => BTreeMap::from([("value".to_string(), other)]),
        };
        Self::with_variables(variables)
    }

    #[cfg(feature = "serde")]
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::from_json(serde_json::to_value(value)?))
    }
}

impl TemplateContext for MapTemplateContext {
    fn value_type_registry(&self) -> &ValueTypeRegistry {
        &self.value_type_registry
    }

    fn evaluation_env(&self) -> EvaluationEnv<'_> {
        EvaluationEnv::new(&self.variables, self.ignore_missing)
    }
}

/// A context with no variables, for templates whose directives only use
/// literals (or none at all).
#[derive(Debug, Clone, Default)]
pub struct EmptyTemplateContext {
    variables: BTreeMap<String, SqlValue>,
    value_type_registry: ValueTypeRegistry,
}

impl EmptyTemplateContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateContext for EmptyTemplateContext {
    fn value_type_registry(&self) -> &ValueTypeRegistry {
        &self.value_type_registry
    }

    fn evaluation_env(&self) -> EvaluationEnv<'_> {
        EvaluationEnv::new(&self.variables, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn from_json_object() {
        let context = MapTemplateContext::from_json(serde_json::json!({
            "job": "CLERK",
            "deptno": 10,
        }));
        let env = context.evaluation_env();
        let vars = BTreeMap::from([
            ("job".to_string(), SqlValue::Text("CLERK".to_string())),
            ("deptno".to_string(), SqlValue::Int(10)),
        ]);
        let expected = EvaluationEnv::new(&vars, false);
        // Compare through evaluation rather than map internals.
        use crate::expr::{DefaultExpressionParser, ExpressionParser as _};
        let expression = DefaultExpressionParser.parse("job").unwrap();
        assert_eq!(
            expression.evaluate(&env).unwrap(),
            expression.evaluate(&expected).unwrap()
        );
    }
}
