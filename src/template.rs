use std::collections::BTreeMap;

use crate::context::TemplateContext;
use crate::error::ProcessError;
use crate::node::{EvalState, Named, Node, Positional, Scope};
use crate::value::SqlValue;

/// A parsed template, ready to be processed against any number of contexts.
///
/// Processing never mutates the template, so one parsed instance can be
/// shared across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SqlTemplate {
    sql: String,
    root: Node,
}

impl SqlTemplate {
    pub(crate) fn new(sql: String, root: Node) -> Self {
        Self { sql, root }
    }

    /// The normalized template source.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Evaluates the template into SQL with positional `?` placeholders and
    /// the matching ordered parameter list.
    pub fn process(&self, context: &impl TemplateContext) -> Result<ProcessResult, ProcessError> {
        let state = EvalState {
            sql: &self.sql,
            env: context.evaluation_env(),
            registry: context.value_type_registry(),
        };
        let mut out = Scope::enabled();
        self.root.evaluate(&state, &mut Positional, &mut out)?;
        // A directive that vanished at the end of the statement can leave
        // whitespace behind.
        out.sql.truncate(out.sql.trim_end().len());
        Ok(ProcessResult {
            sql: out.sql,
            parameters: out.binds.into_iter().map(|(_, value)| value).collect(),
        })
    }

    /// Evaluates the template into SQL with named `:name` placeholders
    /// derived from the directive expressions.
    pub fn process_named(
        &self,
        context: &impl TemplateContext,
    ) -> Result<NamedProcessResult, ProcessError> {
        let state = EvalState {
            sql: &self.sql,
            env: context.evaluation_env(),
            registry: context.value_type_registry(),
        };
        let mut out = Scope::enabled();
        let mut mode = Named::default();
        self.root.evaluate(&state, &mut mode, &mut out)?;
        out.sql.truncate(out.sql.trim_end().len());
        Ok(NamedProcessResult {
            sql: out.sql,
            parameters: out.binds.into_iter().collect(),
        })
    }
}

/// The output of [`SqlTemplate::process`]: executable SQL and its parameters
/// in placeholder order.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    sql: String,
    parameters: Vec<SqlValue>,
}

impl ProcessResult {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[SqlValue] {
        &self.parameters
    }

    pub fn into_parts(self) -> (String, Vec<SqlValue>) {
        (self.sql, self.parameters)
    }
}

/// The output of [`SqlTemplate::process_named`]: executable SQL and its
/// parameters keyed by placeholder name.
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NamedProcessResult {
    sql: String,
    parameters: BTreeMap<String, SqlValue>,
}

impl NamedProcessResult {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &BTreeMap<String, SqlValue> {
        &self.parameters
    }

    pub fn into_parts(self) -> (String, BTreeMap<String, SqlValue>) {
        (self.sql, self.parameters)
    }
}
