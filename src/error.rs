use crate::position::Position;

pub type TwoWaySqlResult<T> = std::result::Result<T, TwoWaySqlError>;

/// What went wrong while parsing a template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("Not closed comment '{closer}' for {body}.")]
    UnclosedComment { closer: String, body: String },

    #[error("Not found IF condition.")]
    MissingIfCondition,

    #[error("Not found END comment.")]
    MissingEndComment,

    #[error("Fail parsing expression '{expression}'.")]
    InvalidExpression {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Too deeply nested scopes ({depth}).")]
    NestingTooDeep { depth: usize },
}

/// A fatal template parse error with its resolved source position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at {position}: {kind}")]
pub struct ParseError {
    pub position: Position,
    pub kind: ParseErrorKind,
}

/// What went wrong while evaluating a parsed template.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessErrorKind {
    #[error("Fail evaluating expression '{expression}'.")]
    EvaluationFailed {
        expression: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Fail converting value of expression '{expression}'.")]
    ConversionFailed {
        expression: String,
        #[source]
        source: ConversionError,
    },

    #[error("Not allowed semicolon at embedded value '{expression}' to '{value}'.")]
    EmbeddedSemicolon { expression: String, value: String },
}

/// A fatal evaluation error with its resolved source position.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("process error at {position}: {kind}")]
pub struct ProcessError {
    pub position: Position,
    pub kind: ProcessErrorKind,
}

/// Errors raised by expression parsing or evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset} in '{expression}'")]
    Syntax { expression: String, offset: usize },

    #[error("unknown variable or property '{name}'")]
    UnknownVariable { name: String },

    #[error("expression '{expression}' did not evaluate to a boolean")]
    NotBoolean { expression: String },

    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },
}

/// A failed bind-value or embedded-value conversion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ConversionError {
    pub message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Top-level error type, covering parsing, evaluation, and template loading.
#[derive(Debug, thiserror::Error)]
pub enum TwoWaySqlError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Not found or non-readable file : {location}")]
    TemplateNotFound { location: String },

    #[error("Fail load file : {location}")]
    TemplateLoad {
        location: String,
        #[source]
        source: std::io::Error,
    },
}
