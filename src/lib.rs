//! A two-way SQL template engine.
//!
//! Directives hide inside SQL comments, so a template remains an executable
//! statement: run it as-is against a database and the literals after each
//! directive act as sample values, or process it with a context and the
//! directives take over.
//!
//! ```
//! use twosql::{MapTemplateContext, SqlTemplateEngine, SqlValue};
//!
//! let engine = SqlTemplateEngine::new();
//! let template = engine
//!     .template_by_text(
//!         "SELECT * FROM emp WHERE job = /*job*/'CLERK'\
//!          /*IF deptno != null*/ AND deptno = /*deptno*/20/*END*/",
//!     )
//!     .unwrap();
//!
//! let mut context = MapTemplateContext::new();
//! context.add_variable("job", "MANAGER");
//! context.add_variable("deptno", 10);
//!
//! let result = template.process(&context).unwrap();
//! assert_eq!(
//!     result.sql(),
//!     "SELECT * FROM emp WHERE job = ? AND deptno = ?"
//! );
//! assert_eq!(
//!     result.parameters(),
//!     &[SqlValue::Text("MANAGER".into()), SqlValue::Int(10)]
//! );
//! ```

mod context;
mod engine;
mod error;
mod expr;
mod loader;
mod node;
mod parser;
mod position;
mod template;
mod tokenizer;
mod types;
mod value;

pub use context::{EmptyTemplateContext, MapTemplateContext, TemplateContext};
pub use engine::SqlTemplateEngine;
pub use error::{
    ConversionError, ExpressionError, ParseError, ParseErrorKind, ProcessError, ProcessErrorKind,
    TwoWaySqlError, TwoWaySqlResult,
};
pub use expr::{
    CompiledExpression, DefaultExpressionParser, EvaluationEnv, Expression, ExpressionParser,
};
pub use loader::TemplateLoader;
pub use position::{Position, resolve_sql_position};
pub use template::{NamedProcessResult, ProcessResult, SqlTemplate};
pub use types::{SqlValueType, ValueTypeRegistry};
pub use value::{SqlValue, TypeKey};
