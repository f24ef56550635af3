use std::collections::BTreeSet;

use crate::error::{ProcessError, ProcessErrorKind};
use crate::expr::{EvaluationEnv, Expression};
use crate::position::resolve_sql_position;
use crate::types::ValueTypeRegistry;
use crate::value::SqlValue;

/// A parsed template fragment. Positions are byte offsets into the
/// normalized source, kept so evaluation errors can point at the directive
/// that raised them.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal SQL emitted verbatim.
    Sql { position: usize, text: String },
    /// SQL opening a conditional fragment: the prefix (a connector like
    /// `AND ` or `, `) is emitted only when the surrounding scope already
    /// produced output.
    PrefixSql {
        position: usize,
        prefix: String,
        text: String,
    },
    /// `/*expr*/literal`: evaluate, record a parameter, emit a placeholder.
    BindVariable {
        position: usize,
        expression: Expression,
    },
    /// `/*expr*/(...)`: expand a collection into an `IN` list.
    ParenBindVariable {
        position: usize,
        expression: Expression,
    },
    /// `/*$expr*/literal`: splice the value into the SQL text itself.
    EmbeddedValue {
        position: usize,
        expression: Expression,
    },
    If {
        position: usize,
        expression: Expression,
        children: Vec<Node>,
        else_node: Option<Box<Node>>,
    },
    Else { position: usize, children: Vec<Node> },
    /// `/*BEGIN*/ WHERE ... /*END*/`: kept only if some inner `IF` matched.
    Begin { position: usize, children: Vec<Node> },
    Container { position: usize, children: Vec<Node> },
}

/// Everything evaluation needs besides the node tree itself.
pub struct EvalState<'a> {
    pub sql: &'a str,
    pub env: EvaluationEnv<'a>,
    pub registry: &'a ValueTypeRegistry,
}

/// Accumulates the output of one conditional scope. A `Begin` evaluates its
/// children into a fresh disabled scope and merges it into the parent only
/// if some `IF` inside turned it on.
#[derive(Debug, Default)]
pub struct Scope {
    pub sql: String,
    pub binds: Vec<(String, SqlValue)>,
    pub enabled: bool,
}

impl Scope {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

/// How placeholders and parameters are recorded: positional `?` or named
/// `:name`.
pub trait BindMode {
    fn add_bind(&mut self, scope: &mut Scope, expression: &str, value: SqlValue);
}

pub struct Positional;

impl BindMode for Positional {
    fn add_bind(&mut self, scope: &mut Scope, expression: &str, value: SqlValue) {
        scope.sql.push('?');
        scope.binds.push((expression.to_string(), value));
    }
}

/// Named placeholders derived from expression text. Names are deduplicated
/// with `_1`, `_2`.. suffixes; the used set spans the whole template, so a
/// name handed out inside a later-discarded `BEGIN` is never reissued.
#[derive(Default)]
pub struct Named {
    used: BTreeSet<String>,
}

impl BindMode for Named {
    fn add_bind(&mut self, scope: &mut Scope, expression: &str, value: SqlValue) {
        let base: String = expression
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let mut name = base.clone();
        let mut n = 1;
        while self.used.contains(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        self.used.insert(name.clone());
        scope.sql.push(':');
        scope.sql.push_str(&name);
        scope.binds.push((name, value));
    }
}

impl Node {
    pub fn evaluate<M: BindMode>(
        &self,
        state: &EvalState<'_>,
        mode: &mut M,
        out: &mut Scope,
    ) -> Result<(), ProcessError> {
        match self {
            Self::Sql { text, .. } => {
                out.sql.push_str(text);
                Ok(())
            }
            Self::PrefixSql { prefix, text, .. } => {
                if out.enabled {
                    out.sql.push_str(prefix);
                }
                out.sql.push_str(text);
                Ok(())
            }
            Self::Container { children, .. } => {
                for child in children {
                    child.evaluate(state, mode, out)?;
                }
                Ok(())
            }
            Self::Begin { children, .. } => {
                let mut inner = Scope::default();
                for child in children {
                    child.evaluate(state, mode, &mut inner)?;
                }
                if inner.enabled {
                    out.sql.push_str(&inner.sql);
                    out.binds.extend(inner.binds);
                    out.enabled = true;
                }
                Ok(())
            }
            Self::If {
                position,
                expression,
                children,
                else_node,
            } => {
                let condition = expression
                    .evaluate_bool(&state.env)
                    .map_err(|source| evaluation_error(state, *position, expression, source))?;
                if condition {
                    for child in children {
                        child.evaluate(state, mode, out)?;
                    }
                    out.enabled = true;
                } else if let Some(else_node) = else_node {
                    else_node.evaluate(state, mode, out)?;
                }
                Ok(())
            }
            Self::Else { children, .. } => {
                for child in children {
                    child.evaluate(state, mode, out)?;
                }
                out.enabled = true;
                Ok(())
            }
            Self::BindVariable { position, expression } => {
                let value = eval_value(state, *position, expression)?;
                let value = convert_bind(state, *position, expression, value)?;
                mode.add_bind(out, expression.source(), value);
                Ok(())
            }
            Self::ParenBindVariable { position, expression } => {
                evaluate_paren_bind(state, mode, out, *position, expression)
            }
            Self::EmbeddedValue { position, expression } => {
                evaluate_embedded(state, out, *position, expression)
            }
        }
    }
}

fn evaluation_error(
    state: &EvalState<'_>,
    position: usize,
    expression: &Expression,
    source: crate::error::ExpressionError,
) -> ProcessError {
    ProcessError {
        position: resolve_sql_position(state.sql, position),
        kind: ProcessErrorKind::EvaluationFailed {
            expression: expression.source().to_string(),
            source,
        },
    }
}

fn conversion_error(
    state: &EvalState<'_>,
    position: usize,
    expression: &Expression,
    source: crate::error::ConversionError,
) -> ProcessError {
    ProcessError {
        position: resolve_sql_position(state.sql, position),
        kind: ProcessErrorKind::ConversionFailed {
            expression: expression.source().to_string(),
            source,
        },
    }
}

fn eval_value(
    state: &EvalState<'_>,
    position: usize,
    expression: &Expression,
) -> Result<SqlValue, ProcessError> {
    expression
        .evaluate(&state.env)
        .map_err(|source| evaluation_error(state, position, expression, source))
}

/// Applies the registered conversion rule for the value's runtime type and
/// the expression text used as property path. Values without a rule pass
/// through unchanged.
fn convert_bind(
    state: &EvalState<'_>,
    position: usize,
    expression: &Expression,
    value: SqlValue,
) -> Result<SqlValue, ProcessError> {
    match state
        .registry
        .find_value_type(&value.type_key(), Some(expression.source()))
    {
        Some(rule) => rule
            .bind_value(&value)
            .map_err(|source| conversion_error(state, position, expression, source)),
        None => Ok(value),
    }
}

fn evaluate_paren_bind<M: BindMode>(
    state: &EvalState<'_>,
    mode: &mut M,
    out: &mut Scope,
    position: usize,
    expression: &Expression,
) -> Result<(), ProcessError> {
    let value = eval_value(state, position, expression)?;
    match value {
        SqlValue::Null => Ok(()),
        SqlValue::Array(items) => {
            if items.is_empty() {
                return Ok(());
            }
            // One conversion rule for the whole list, looked up from the
            // first non-null element.
            let rule = items.iter().find(|item| !item.is_null()).and_then(|item| {
                state
                    .registry
                    .find_value_type(&item.type_key(), Some(expression.source()))
            });
            out.sql.push('(');
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out.sql.push_str(", ");
                }
                let item = match &rule {
                    Some(rule) => rule
                        .bind_value(&item)
                        .map_err(|source| conversion_error(state, position, expression, source))?,
                    None => item,
                };
                mode.add_bind(out, expression.source(), item);
            }
            out.sql.push(')');
            Ok(())
        }
        scalar => {
            let scalar = convert_bind(state, position, expression, scalar)?;
            mode.add_bind(out, expression.source(), scalar);
            Ok(())
        }
    }
}

fn evaluate_embedded(
    state: &EvalState<'_>,
    out: &mut Scope,
    position: usize,
    expression: &Expression,
) -> Result<(), ProcessError> {
    let value = eval_value(state, position, expression)?;
    if value.is_null() {
        return Ok(());
    }
    let text = match state
        .registry
        .find_value_type(&value.type_key(), Some(expression.source()))
    {
        Some(rule) => rule
            .embedded_value(&value)
            .map_err(|source| conversion_error(state, position, expression, source))?,
        None => value.embedded_text(),
    };
    // Splicing a semicolon would let one template smuggle in a second
    // statement.
    if text.contains(';') {
        return Err(ProcessError {
            position: resolve_sql_position(state.sql, position),
            kind: ProcessErrorKind::EmbeddedSemicolon {
                expression: expression.source().to_string(),
                value: text,
            },
        });
    }
    out.sql.push_str(&text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::expr::{DefaultExpressionParser, ExpressionParser};

    fn expression(source: &str) -> Expression {
        DefaultExpressionParser.parse(source).unwrap()
    }

    fn run<M: BindMode>(
        node: &Node,
        vars: &BTreeMap<String, SqlValue>,
        registry: &ValueTypeRegistry,
        mode: &mut M,
    ) -> Scope {
        let state = EvalState {
            sql: "",
            env: EvaluationEnv::new(vars, false),
            registry,
        };
        let mut out = Scope::enabled();
        node.evaluate(&state, mode, &mut out).unwrap();
        out
    }

    #[test]
    #[ntest::timeout(100)]
    fn begin_discards_when_no_if_matches() {
        let node = Node::Begin {
            position: 0,
            children: vec![
                Node::Sql {
                    position: 0,
                    text: "WHERE ".to_string(),
                },
                Node::If {
                    position: 0,
                    expression: expression("false"),
                    children: vec![Node::Sql {
                        position: 0,
                        text: "id = 1".to_string(),
                    }],
                    else_node: None,
                },
            ],
        };
        let vars = BTreeMap::new();
        let registry = ValueTypeRegistry::new();
        let out = run(&node, &vars, &registry, &mut Positional);
        assert_eq!(out.sql, "");
        assert!(out.binds.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn begin_merge_enables_parent_scope() {
        // The inner BEGIN fires, which must activate the outer one too;
        // otherwise the outer scope is discarded with the inner output in it.
        let node = Node::Begin {
            position: 0,
            children: vec![
                Node::Sql {
                    position: 0,
                    text: "WHERE ".to_string(),
                },
                Node::Begin {
                    position: 0,
                    children: vec![Node::If {
                        position: 0,
                        expression: expression("true"),
                        children: vec![Node::Sql {
                            position: 0,
                            text: "id = 1".to_string(),
                        }],
                        else_node: None,
                    }],
                },
            ],
        };
        let vars = BTreeMap::new();
        let registry = ValueTypeRegistry::new();
        let out = run(&node, &vars, &registry, &mut Positional);
        assert_eq!(out.sql, "WHERE id = 1");
    }

    #[test]
    #[ntest::timeout(100)]
    fn prefix_gated_on_scope_state() {
        let prefixed = Node::PrefixSql {
            position: 0,
            prefix: " AND ".to_string(),
            text: "job = 'CLERK'".to_string(),
        };
        let vars = BTreeMap::new();
        let registry = ValueTypeRegistry::new();

        let state = EvalState {
            sql: "",
            env: EvaluationEnv::new(&vars, false),
            registry: &registry,
        };
        let mut off = Scope::default();
        prefixed.evaluate(&state, &mut Positional, &mut off).unwrap();
        assert_eq!(off.sql, "job = 'CLERK'");

        let mut on = Scope::enabled();
        prefixed.evaluate(&state, &mut Positional, &mut on).unwrap();
        assert_eq!(on.sql, " AND job = 'CLERK'");
    }

    #[test]
    #[ntest::timeout(100)]
    fn paren_bind_expands_array() {
        let node = Node::ParenBindVariable {
            position: 0,
            expression: expression("ids"),
        };
        let vars = BTreeMap::from([(
            "ids".to_string(),
            SqlValue::Array(vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Int(3)]),
        )]);
        let registry = ValueTypeRegistry::new();
        let out = run(&node, &vars, &registry, &mut Positional);
        assert_eq!(out.sql, "(?, ?, ?)");
        assert_eq!(out.binds.len(), 3);
    }

    #[test]
    #[ntest::timeout(100)]
    fn paren_bind_scalar_is_bare_placeholder() {
        let node = Node::ParenBindVariable {
            position: 0,
            expression: expression("id"),
        };
        let vars = BTreeMap::from([("id".to_string(), SqlValue::Int(7))]);
        let registry = ValueTypeRegistry::new();
        let out = run(&node, &vars, &registry, &mut Positional);
        assert_eq!(out.sql, "?");
        assert_eq!(out.binds, vec![("id".to_string(), SqlValue::Int(7))]);
    }

    #[test]
    #[ntest::timeout(100)]
    fn named_binds_deduplicate_globally() {
        let mut named = Named::default();
        let mut scope = Scope::enabled();
        named.add_bind(&mut scope, "job", SqlValue::Text("a".to_string()));
        named.add_bind(&mut scope, "job_1", SqlValue::Text("b".to_string()));
        named.add_bind(&mut scope, "job", SqlValue::Text("c".to_string()));
        named.add_bind(&mut scope, "emp.name", SqlValue::Text("d".to_string()));
        assert_eq!(scope.sql, ":job:job_1:job_2:emp_name");
        assert_eq!(
            scope.binds.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["job", "job_1", "job_2", "emp_name"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn embedded_semicolon_rejected() {
        let node = Node::EmbeddedValue {
            position: 0,
            expression: expression("$orderBy"),
        };
        let vars = BTreeMap::from([(
            "$orderBy".to_string(),
            SqlValue::Text("name; DROP TABLE emp".to_string()),
        )]);
        let registry = ValueTypeRegistry::new();
        let state = EvalState {
            sql: "",
            env: EvaluationEnv::new(&vars, false),
            registry: &registry,
        };
        let mut out = Scope::enabled();
        let err = node.evaluate(&state, &mut Positional, &mut out).unwrap_err();
        assert!(matches!(
            err.kind,
            ProcessErrorKind::EmbeddedSemicolon { .. }
        ));
    }
}
