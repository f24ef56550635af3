use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ExpressionError;
use crate::value::SqlValue;

/// The variable environment an expression is evaluated against.
///
/// With `ignore_missing` set, unknown variables and absent properties resolve
/// to `Null` instead of raising [`ExpressionError::UnknownVariable`].
pub struct EvaluationEnv<'a> {
    variables: &'a BTreeMap<String, SqlValue>,
    ignore_missing: bool,
}

impl<'a> EvaluationEnv<'a> {
    pub const fn new(variables: &'a BTreeMap<String, SqlValue>, ignore_missing: bool) -> Self {
        Self {
            variables,
            ignore_missing,
        }
    }

    pub const fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }

    fn variable(&self, name: &str) -> Result<SqlValue, ExpressionError> {
        match self.variables.get(name) {
            Some(value) => Ok(value.clone()),
            None if self.ignore_missing => Ok(SqlValue::Null),
            None => Err(ExpressionError::UnknownVariable {
                name: name.to_string(),
            }),
        }
    }
}

/// A pre-parsed expression ready for repeated evaluation.
pub trait CompiledExpression: Send + Sync {
    fn evaluate(&self, env: &EvaluationEnv<'_>) -> Result<SqlValue, ExpressionError>;
}

/// Parses expression strings found in template directives.
///
/// The engine ships with [`DefaultExpressionParser`]; callers can plug in a
/// richer language by implementing this trait.
pub trait ExpressionParser: Send + Sync {
    fn parse(&self, expression: &str) -> Result<Expression, ExpressionError>;
}

/// An expression captured at parse time: the source string plus its compiled
/// form.
#[derive(Clone)]
pub struct Expression {
    source: String,
    compiled: Arc<dyn CompiledExpression>,
}

impl Expression {
    pub fn new(source: impl Into<String>, compiled: Arc<dyn CompiledExpression>) -> Self {
        Self {
            source: source.into(),
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, env: &EvaluationEnv<'_>) -> Result<SqlValue, ExpressionError> {
        self.compiled.evaluate(env)
    }

    pub fn evaluate_bool(&self, env: &EvaluationEnv<'_>) -> Result<bool, ExpressionError> {
        match self.evaluate(env)? {
            SqlValue::Bool(b) => Ok(b),
            _ => Err(ExpressionError::NotBoolean {
                expression: self.source.clone(),
            }),
        }
    }
}

impl std::fmt::Debug for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// The bundled expression language.
///
/// Supports `null`/`true`/`false`, integer and float literals, quoted
/// strings, property paths (`a.b`, `a[0]`, `a[key]`), unary `!` and `-`,
/// comparisons, and short-circuiting `&&`/`||`. Property paths resolve
/// against the context's variable map.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExpressionParser;

impl ExpressionParser for DefaultExpressionParser {
    fn parse(&self, expression: &str) -> Result<Expression, ExpressionError> {
        let ast = ExprReader::new(expression).parse()?;
        Ok(Expression::new(expression, Arc::new(ast)))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Literal(SqlValue),
    Variable(String),
    Property { target: Box<Ast>, name: String },
    Index { target: Box<Ast>, key: IndexKey },
    Not(Box<Ast>),
    Neg(Box<Ast>),
    Binary { op: BinOp, lhs: Box<Ast>, rhs: Box<Ast> },
}

#[derive(Debug, Clone, PartialEq)]
enum IndexKey {
    Number(usize),
    Name(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompiledExpression for Ast {
    fn evaluate(&self, env: &EvaluationEnv<'_>) -> Result<SqlValue, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Variable(name) => env.variable(name),
            Self::Property { target, name } => {
                let target = target.evaluate(env)?;
                property(&target, name, env)
            }
            Self::Index { target, key } => {
                let target = target.evaluate(env)?;
                index(&target, key, env)
            }
            Self::Not(inner) => match inner.evaluate(env)? {
                SqlValue::Bool(b) => Ok(SqlValue::Bool(!b)),
                other => Err(type_mismatch(format!(
                    "'!' applied to non-boolean {other:?}"
                ))),
            },
            Self::Neg(inner) => match inner.evaluate(env)? {
                SqlValue::Int(i) => Ok(SqlValue::Int(-i)),
                SqlValue::Float(f) => Ok(SqlValue::Float(-f)),
                other => Err(type_mismatch(format!(
                    "'-' applied to non-numeric {other:?}"
                ))),
            },
            Self::Binary { op, lhs, rhs } => evaluate_binary(*op, lhs, rhs, env),
        }
    }
}

fn evaluate_binary(
    op: BinOp,
    lhs: &Ast,
    rhs: &Ast,
    env: &EvaluationEnv<'_>,
) -> Result<SqlValue, ExpressionError> {
    match op {
        BinOp::And | BinOp::Or => {
            let left = expect_bool(lhs.evaluate(env)?)?;
            // Short-circuit.
            if (op == BinOp::And && !left) || (op == BinOp::Or && left) {
                return Ok(SqlValue::Bool(left));
            }
            let right = expect_bool(rhs.evaluate(env)?)?;
            Ok(SqlValue::Bool(right))
        }
        BinOp::Eq => Ok(SqlValue::Bool(loose_eq(&lhs.evaluate(env)?, &rhs.evaluate(env)?))),
        BinOp::Ne => Ok(SqlValue::Bool(!loose_eq(&lhs.evaluate(env)?, &rhs.evaluate(env)?))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let left = lhs.evaluate(env)?;
            let right = rhs.evaluate(env)?;
            let ordering = compare(&left, &right)?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => unreachable!(),
            };
            Ok(SqlValue::Bool(result))
        }
    }
}

fn expect_bool(value: SqlValue) -> Result<bool, ExpressionError> {
    match value {
        SqlValue::Bool(b) => Ok(b),
        other => Err(type_mismatch(format!(
            "boolean operator applied to {other:?}"
        ))),
    }
}

/// Equality with numeric coercion; values of mismatched types are unequal
/// rather than an error, so `job != null` is a usable existence test.
fn loose_eq(left: &SqlValue, right: &SqlValue) -> bool {
    match (left, right) {
        (SqlValue::Int(a), SqlValue::Float(b)) | (SqlValue::Float(b), SqlValue::Int(a)) => {
            (*a as f64) == *b
        }
        (a, b) => a == b,
    }
}

fn compare(left: &SqlValue, right: &SqlValue) -> Result<std::cmp::Ordering, ExpressionError> {
    let ordering = match (left, right) {
        (SqlValue::Int(a), SqlValue::Int(b)) => a.cmp(b),
        (SqlValue::Int(a), SqlValue::Float(b)) => float_cmp(*a as f64, *b)?,
        (SqlValue::Float(a), SqlValue::Int(b)) => float_cmp(*a, *b as f64)?,
        (SqlValue::Float(a), SqlValue::Float(b)) => float_cmp(*a, *b)?,
        (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
        (a, b) => {
            return Err(type_mismatch(format!(
                "cannot order {a:?} against {b:?}"
            )));
        }
    };
    Ok(ordering)
}

fn float_cmp(a: f64, b: f64) -> Result<std::cmp::Ordering, ExpressionError> {
    a.partial_cmp(&b)
        .ok_or_else(|| type_mismatch("cannot order NaN".to_string()))
}

fn type_mismatch(message: String) -> ExpressionError {
    ExpressionError::TypeMismatch { message }
}

fn property(
    target: &SqlValue,
    name: &str,
    env: &EvaluationEnv<'_>,
) -> Result<SqlValue, ExpressionError> {
    match target {
        SqlValue::Object(map) => match map.get(name) {
            Some(value) => Ok(value.clone()),
            None if env.ignore_missing() => Ok(SqlValue::Null),
            None => Err(ExpressionError::UnknownVariable {
                name: name.to_string(),
            }),
        },
        SqlValue::Null if env.ignore_missing() => Ok(SqlValue::Null),
        other => Err(type_mismatch(format!(
            "property '{name}' accessed on {other:?}"
        ))),
    }
}

fn index(
    target: &SqlValue,
    key: &IndexKey,
    env: &EvaluationEnv<'_>,
) -> Result<SqlValue, ExpressionError> {
    match (target, key) {
        (SqlValue::Array(items), IndexKey::Number(i)) => match items.get(*i) {
            Some(value) => Ok(value.clone()),
            None if env.ignore_missing() => Ok(SqlValue::Null),
            None => Err(type_mismatch(format!(
                "index {i} out of bounds for array of {}",
                items.len()
            ))),
        },
        (SqlValue::Object(_), IndexKey::Name(name)) => property(target, name, env),
        (SqlValue::Null, _) if env.ignore_missing() => Ok(SqlValue::Null),
        (other, key) => Err(type_mismatch(format!(
            "cannot index {other:?} with {key:?}"
        ))),
    }
}

/// Recursive-descent reader over an expression string.
struct ExprReader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ExprReader<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(mut self) -> Result<Ast, ExpressionError> {
        let ast = self.or_expr()?;
        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.syntax_error());
        }
        Ok(ast)
    }

    fn syntax_error(&self) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.input.to_string(),
            offset: self.pos,
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn or_expr(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.and_expr()?;
        loop {
            self.skip_whitespace();
            if !self.eat("||") {
                return Ok(lhs);
            }
            let rhs = self.and_expr()?;
            lhs = Ast::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn and_expr(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.equality()?;
        loop {
            self.skip_whitespace();
            if !self.eat("&&") {
                return Ok(lhs);
            }
            let rhs = self.equality()?;
            lhs = Ast::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn equality(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.relational()?;
        loop {
            self.skip_whitespace();
            let op = if self.eat("==") {
                BinOp::Eq
            } else if self.eat("!=") {
                BinOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.relational()?;
            lhs = Ast::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn relational(&mut self) -> Result<Ast, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            self.skip_whitespace();
            let op = if self.eat("<=") {
                BinOp::Le
            } else if self.eat(">=") {
                BinOp::Ge
            } else if self.rest().starts_with('<') && !self.rest().starts_with("<=") {
                self.pos += 1;
                BinOp::Lt
            } else if self.rest().starts_with('>') && !self.rest().starts_with(">=") {
                self.pos += 1;
                BinOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.unary()?;
            lhs = Ast::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Ast, ExpressionError> {
        self.skip_whitespace();
        if self.rest().starts_with('!') && !self.rest().starts_with("!=") {
            self.pos += 1;
            return Ok(Ast::Not(Box::new(self.unary()?)));
        }
        if self.peek() == Some('-') {
            self.pos += 1;
            return Ok(Ast::Neg(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Ast, ExpressionError> {
        self.skip_whitespace();
        let Some(c) = self.peek() else {
            return Err(self.syntax_error());
        };

        if c == '(' {
            self.pos += 1;
            let inner = self.or_expr()?;
            self.skip_whitespace();
            if !self.eat(")") {
                return Err(self.syntax_error());
            }
            return self.path(inner);
        }
        if c == '\'' || c == '"' {
            let text = self.string_literal(c)?;
            return Ok(Ast::Literal(SqlValue::Text(text)));
        }
        if c.is_ascii_digit() {
            return self.number_literal();
        }
        if is_ident_start(c) {
            let word = self.identifier();
            let ast = match word {
                "null" => Ast::Literal(SqlValue::Null),
                "true" => Ast::Literal(SqlValue::Bool(true)),
                "false" => Ast::Literal(SqlValue::Bool(false)),
                name => Ast::Variable(name.to_string()),
            };
            return self.path(ast);
        }

        Err(self.syntax_error())
    }

    /// Consumes trailing `.name` and `[key]` accessors.
    fn path(&mut self, mut target: Ast) -> Result<Ast, ExpressionError> {
        loop {
            if self.rest().starts_with('.') {
                self.pos += 1;
                let c = self.peek().ok_or_else(|| self.syntax_error())?;
                if !is_ident_start(c) {
                    return Err(self.syntax_error());
                }
                let name = self.identifier().to_string();
                target = Ast::Property {
                    target: Box::new(target),
                    name,
                };
            } else if self.rest().starts_with('[') {
                self.pos += 1;
                let key = self.index_key()?;
                if !self.eat("]") {
                    return Err(self.syntax_error());
                }
                target = Ast::Index {
                    target: Box::new(target),
                    key,
                };
            } else {
                return Ok(target);
            }
        }
    }

    fn index_key(&mut self) -> Result<IndexKey, ExpressionError> {
        let c = self.peek().ok_or_else(|| self.syntax_error())?;
        if c.is_ascii_digit() {
            let start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
            let number: usize = self.input[start..self.pos]
                .parse()
                .map_err(|_| self.syntax_error())?;
            return Ok(IndexKey::Number(number));
        }
        if c == '\'' || c == '"' {
            return Ok(IndexKey::Name(self.string_literal(c)?));
        }
        if is_ident_start(c) {
            return Ok(IndexKey::Name(self.identifier().to_string()));
        }
        Err(self.syntax_error())
    }

    fn string_literal(&mut self, quote: char) -> Result<String, ExpressionError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.syntax_error());
            };
            self.pos += c.len_utf8();
            if c == quote {
                // Doubled quote is an escape.
                if quote == '\'' && self.peek() == Some('\'') {
                    self.pos += 1;
                    out.push('\'');
                    continue;
                }
                return Ok(out);
            }
            out.push(c);
        }
    }

    fn number_literal(&mut self) -> Result<Ast, ExpressionError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut float = false;
        if self.rest().starts_with('.')
            && self.rest()[1..].chars().next().is_some_and(|c| c.is_ascii_digit())
        {
            float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.input[start..self.pos];
        if float {
            let value: f64 = text.parse().map_err(|_| self.syntax_error())?;
            Ok(Ast::Literal(SqlValue::Float(value)))
        } else {
            let value: i64 = text.parse().map_err(|_| self.syntax_error())?;
            Ok(Ast::Literal(SqlValue::Int(value)))
        }
    }

    fn identifier(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += self.peek().map_or(0, char::len_utf8);
        }
        &self.input[start..self.pos]
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(pairs: &[(&str, SqlValue)]) -> BTreeMap<String, SqlValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn eval(expression: &str, vars: &BTreeMap<String, SqlValue>) -> SqlValue {
        let env = EvaluationEnv::new(vars, false);
        DefaultExpressionParser
            .parse(expression)
            .unwrap()
            .evaluate(&env)
            .unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn literals() {
        let vars = BTreeMap::new();
        assert_eq!(eval("null", &vars), SqlValue::Null);
        assert_eq!(eval("true", &vars), SqlValue::Bool(true));
        assert_eq!(eval("42", &vars), SqlValue::Int(42));
        assert_eq!(eval("-42", &vars), SqlValue::Int(-42));
        assert_eq!(eval("2.5", &vars), SqlValue::Float(2.5));
        assert_eq!(eval("'it''s'", &vars), SqlValue::Text("it's".to_string()));
        assert_eq!(eval("\"abc\"", &vars), SqlValue::Text("abc".to_string()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn null_comparison() {
        let vars = env_with(&[("job", SqlValue::Text("CLERK".to_string()))]);
        assert_eq!(eval("job != null", &vars), SqlValue::Bool(true));
        assert_eq!(eval("job == null", &vars), SqlValue::Bool(false));

        let vars = env_with(&[("job", SqlValue::Null)]);
        assert_eq!(eval("job != null", &vars), SqlValue::Bool(false));
    }

    #[test]
    #[ntest::timeout(100)]
    fn numeric_comparison() {
        let vars = env_with(&[("age", SqlValue::Int(30))]);
        assert_eq!(eval("age >= 1", &vars), SqlValue::Bool(true));
        assert_eq!(eval("age < 30", &vars), SqlValue::Bool(false));
        assert_eq!(eval("age <= 30.5", &vars), SqlValue::Bool(true));
        assert_eq!(eval("age == 30.0", &vars), SqlValue::Bool(true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn boolean_operators() {
        let vars = env_with(&[
            ("a", SqlValue::Int(1)),
            ("b", SqlValue::Null),
        ]);
        assert_eq!(eval("a == 1 && b == null", &vars), SqlValue::Bool(true));
        assert_eq!(eval("a != 1 || b == null", &vars), SqlValue::Bool(true));
        assert_eq!(eval("!(a == 1)", &vars), SqlValue::Bool(false));
        // Short-circuit: the undefined variable on the right is never read.
        assert_eq!(eval("a == 1 || missing == 2", &vars), SqlValue::Bool(true));
    }

    #[test]
    #[ntest::timeout(100)]
    fn property_paths() {
        let vars = env_with(&[(
            "emp",
            SqlValue::Object(BTreeMap::from([
                ("name".to_string(), SqlValue::Text("ada".to_string())),
                (
                    "tags".to_string(),
                    SqlValue::Array(vec![SqlValue::Text("a".to_string())]),
                ),
            ])),
        )]);
        assert_eq!(eval("emp.name", &vars), SqlValue::Text("ada".to_string()));
        assert_eq!(eval("emp.tags[0]", &vars), SqlValue::Text("a".to_string()));
        assert_eq!(eval("emp[name]", &vars), SqlValue::Text("ada".to_string()));
        assert_eq!(eval("emp['name']", &vars), SqlValue::Text("ada".to_string()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn placeholder_names_are_identifiers() {
        let vars = env_with(&[("$1", SqlValue::Int(7))]);
        assert_eq!(eval("$1", &vars), SqlValue::Int(7));
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_variable_errors() {
        let vars = BTreeMap::new();
        let env = EvaluationEnv::new(&vars, false);
        let expression = DefaultExpressionParser.parse("deptno").unwrap();
        assert_eq!(
            expression.evaluate(&env),
            Err(ExpressionError::UnknownVariable {
                name: "deptno".to_string()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn ignore_missing_resolves_null() {
        let vars = BTreeMap::new();
        let env = EvaluationEnv::new(&vars, true);
        let expression = DefaultExpressionParser.parse("emp.name").unwrap();
        assert_eq!(expression.evaluate(&env), Ok(SqlValue::Null));

        let expression = DefaultExpressionParser.parse("job != null").unwrap();
        assert_eq!(expression.evaluate(&env), Ok(SqlValue::Bool(false)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn non_boolean_condition_errors() {
        let vars = env_with(&[("job", SqlValue::Text("CLERK".to_string()))]);
        let env = EvaluationEnv::new(&vars, false);
        let expression = DefaultExpressionParser.parse("job").unwrap();
        assert_eq!(
            expression.evaluate_bool(&env),
            Err(ExpressionError::NotBoolean {
                expression: "job".to_string()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn syntax_errors() {
        assert!(DefaultExpressionParser.parse("abc/*b").is_err());
        assert!(DefaultExpressionParser.parse("").is_err());
        assert!(DefaultExpressionParser.parse("a ==").is_err());
        assert!(DefaultExpressionParser.parse("(a == 1").is_err());
        assert!(DefaultExpressionParser.parse("'unterminated").is_err());
    }
}
