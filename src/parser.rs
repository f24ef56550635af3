use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{Expression, ExpressionParser};
use crate::node::Node;
use crate::position::resolve_sql_position;
use crate::tokenizer::{SqlTokenizer, TokenType};

/// Directive scopes deeper than this abort the parse.
const MAX_DEPTH: usize = 64;

/// Trims the template and drops one trailing semicolon, so a statement
/// copied straight out of a SQL console parses the same as a bare one.
pub fn normalize_sql(sql: &str) -> &str {
    let sql = sql.trim();
    sql.strip_suffix(';').unwrap_or(sql)
}

/// Parses a normalized template into a [`Node`] tree.
///
/// Directive comments open and close scopes tracked as a frame stack; the
/// SQL between them becomes child nodes of the innermost open frame.
pub struct SqlParser<'a> {
    tokenizer: SqlTokenizer<'a>,
    expression_parser: &'a dyn ExpressionParser,
    frames: Vec<Frame>,
}

struct Frame {
    kind: FrameKind,
    children: Vec<Node>,
    /// Offset of the comment that opened this scope, reported when its END
    /// is missing.
    open_offset: usize,
}

enum FrameKind {
    Root,
    Begin {
        position: usize,
    },
    If {
        position: usize,
        expression: Expression,
    },
    /// An `IF` whose `-- ELSE` marker has been seen; the then-branch is
    /// parked while the else-branch collects children.
    Else {
        position: usize,
        if_position: usize,
        if_expression: Expression,
        then_children: Vec<Node>,
    },
}

impl<'a> SqlParser<'a> {
    pub fn new(sql: &'a str, expression_parser: &'a dyn ExpressionParser) -> Self {
        Self {
            tokenizer: SqlTokenizer::new(sql),
            expression_parser,
            frames: vec![Frame {
                kind: FrameKind::Root,
                children: Vec::new(),
                open_offset: 0,
            }],
        }
    }

    pub fn parse(mut self) -> Result<Node, ParseError> {
        loop {
            let token_start = self.tokenizer.position();
            match self.tokenizer.next()? {
                TokenType::Sql => self.handle_sql(token_start),
                TokenType::Comment => self.handle_comment()?,
                TokenType::Else => self.handle_else(token_start),
                TokenType::BindVariable => self.handle_bind_variable()?,
                TokenType::Eof => break,
            }
        }

        if self.frames.len() > 1 {
            let open_offset = self.frames.last().map_or(0, |frame| frame.open_offset);
            return Err(ParseError {
                position: resolve_sql_position(self.tokenizer.sql(), open_offset),
                kind: ParseErrorKind::MissingEndComment,
            });
        }

        let children = self.frames.pop().map(|f| f.children).unwrap_or_default();
        Ok(Node::Container {
            position: 0,
            children,
        })
    }

    fn add_child(&mut self, node: Node) {
        if let Some(frame) = self.frames.last_mut() {
            frame.children.push(node);
        }
    }

    /// Whether any enclosing scope is an else-branch. Inside one, `--`
    /// sequences are stripped from SQL text so the branch the template's
    /// author commented out becomes live.
    fn else_mode(&self) -> bool {
        self.frames
            .iter()
            .any(|frame| matches!(frame.kind, FrameKind::Else { .. }))
    }

    fn handle_sql(&mut self, position: usize) {
        let mut text = self.tokenizer.token().to_string();
        if self.else_mode() {
            text = text.replace("--", "");
        }
        let branch_start = self.frames.last().is_some_and(|frame| {
            matches!(frame.kind, FrameKind::If { .. } | FrameKind::Else { .. })
                && frame.children.is_empty()
        });
        let node = if branch_start {
            classify_branch_sql(position, &text)
        } else {
            Node::Sql { position, text }
        };
        self.add_child(node);
    }

    fn handle_comment(&mut self) -> Result<(), ParseError> {
        let body = self.tokenizer.token().to_string();
        let open_offset = self.tokenizer.comment_open_offset();
        let body_start =
            self.tokenizer.position() - self.tokenizer.comment_closer().len() - body.len();

        let first = body.chars().next();
        if first.is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$') {
            if body.starts_with("IF") {
                return self.parse_if(&body, body_start, open_offset);
            }
            if body == "BEGIN" {
                return self.push_frame(FrameKind::Begin { position: open_offset }, open_offset);
            }
            if body == "END" {
                self.close_frame();
                return Ok(());
            }
            return self.parse_bind_directive(&body, body_start);
        }

        // Hints and ordinary comments pass through untouched.
        let opener = self.tokenizer.comment_opener();
        let closer = self.tokenizer.comment_closer();
        self.add_child(Node::Sql {
            position: open_offset,
            text: format!("{opener}{body}{closer}"),
        });
        Ok(())
    }

    fn parse_if(
        &mut self,
        body: &str,
        body_start: usize,
        open_offset: usize,
    ) -> Result<(), ParseError> {
        let raw = &body[2..];
        let condition = raw.trim();
        let cond_start = body_start + 2 + (raw.len() - raw.trim_start().len());
        if condition.is_empty() {
            return Err(ParseError {
                position: resolve_sql_position(self.tokenizer.sql(), cond_start),
                kind: ParseErrorKind::MissingIfCondition,
            });
        }
        let expression = self.parse_expression(condition, cond_start)?;
        self.push_frame(
            FrameKind::If {
                position: cond_start,
                expression,
            },
            open_offset,
        )
    }

    fn parse_bind_directive(&mut self, body: &str, body_start: usize) -> Result<(), ParseError> {
        // The literal after the comment is a sample value; consume and drop
        // it. A parenthesized literal marks an IN-list expansion.
        let literal = self.tokenizer.skip_token().to_string();
        let node = if literal.starts_with('(') && literal.ends_with(')') {
            Node::ParenBindVariable {
                position: body_start,
                expression: self.parse_expression(body, body_start)?,
            }
        } else if let Some(stripped) = body.strip_prefix('$') {
            Node::EmbeddedValue {
                position: body_start + 1,
                expression: self.parse_expression(stripped, body_start + 1)?,
            }
        } else if body.eq_ignore_ascii_case("orderBy") {
            Node::EmbeddedValue {
                position: body_start,
                expression: self.parse_expression(body, body_start)?,
            }
        } else {
            Node::BindVariable {
                position: body_start,
                expression: self.parse_expression(body, body_start)?,
            }
        };
        self.add_child(node);
        Ok(())
    }

    fn handle_else(&mut self, position: usize) {
        match self.frames.pop() {
            Some(Frame {
                kind: FrameKind::If {
                    position: if_position,
                    expression,
                },
                children,
                open_offset,
            }) => {
                self.frames.push(Frame {
                    kind: FrameKind::Else {
                        position,
                        if_position,
                        if_expression: expression,
                        then_children: children,
                    },
                    children: Vec::new(),
                    open_offset,
                });
                self.tokenizer.skip_whitespace();
            }
            // An else marker outside an IF scope is dropped.
            Some(frame) => self.frames.push(frame),
            None => {}
        }
    }

    fn handle_bind_variable(&mut self) -> Result<(), ParseError> {
        let name = self.tokenizer.token().to_string();
        let position = self.tokenizer.position() - 1;
        let expression = self.parse_expression(&name, position)?;
        self.add_child(Node::BindVariable {
            position,
            expression,
        });
        Ok(())
    }

    fn parse_expression(&self, source: &str, offset: usize) -> Result<Expression, ParseError> {
        self.expression_parser
            .parse(source)
            .map_err(|err| ParseError {
                position: resolve_sql_position(self.tokenizer.sql(), offset),
                kind: ParseErrorKind::InvalidExpression {
                    expression: source.to_string(),
                    source: err,
                },
            })
    }

    fn push_frame(&mut self, kind: FrameKind, open_offset: usize) -> Result<(), ParseError> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(ParseError {
                position: resolve_sql_position(self.tokenizer.sql(), open_offset),
                kind: ParseErrorKind::NestingTooDeep {
                    depth: self.frames.len(),
                },
            });
        }
        self.frames.push(Frame {
            kind,
            children: Vec::new(),
            open_offset,
        });
        Ok(())
    }

    /// Closes the innermost scope on END. An END with no open scope is
    /// ignored.
    fn close_frame(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let node = match frame.kind {
            FrameKind::Root => return,
            FrameKind::Begin { position } => Node::Begin {
                position,
                children: frame.children,
            },
            FrameKind::If {
                position,
                expression,
            } => Node::If {
                position,
                expression,
                children: frame.children,
                else_node: None,
            },
            FrameKind::Else {
                position,
                if_position,
                if_expression,
                then_children,
            } => Node::If {
                position: if_position,
                expression: if_expression,
                children: then_children,
                else_node: Some(Box::new(Node::Else {
                    position,
                    children: frame.children,
                })),
            },
        };
        self.add_child(node);
    }
}

/// Classifies the first SQL fragment of an IF or ELSE branch. A leading
/// comma or `AND`/`OR` connector becomes a conditional prefix, emitted only
/// when the surrounding scope already produced output.
fn classify_branch_sql(position: usize, text: &str) -> Node {
    if let Some(rest) = text.strip_prefix(", ") {
        return Node::PrefixSql {
            position,
            prefix: ", ".to_string(),
            text: rest.to_string(),
        };
    }
    if let Some(rest) = text.strip_prefix(',') {
        return Node::PrefixSql {
            position,
            prefix: ",".to_string(),
            text: rest.to_string(),
        };
    }

    let mut sub = SqlTokenizer::new(text);
    sub.skip_whitespace();
    let token = sub.skip_token().to_string();
    sub.skip_whitespace();
    if token.eq_ignore_ascii_case("AND") || token.eq_ignore_ascii_case("OR") {
        return Node::PrefixSql {
            position,
            prefix: sub.before().to_string(),
            text: sub.after().to_string(),
        };
    }

    Node::Sql {
        position,
        text: text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DefaultExpressionParser;

    fn parse(sql: &str) -> Node {
        SqlParser::new(sql, &DefaultExpressionParser)
            .parse()
            .unwrap()
    }

    fn parse_err(sql: &str) -> ParseError {
        SqlParser::new(sql, &DefaultExpressionParser)
            .parse()
            .unwrap_err()
    }

    fn expression(source: &str) -> Expression {
        use crate::expr::ExpressionParser as _;
        DefaultExpressionParser.parse(source).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn normalizes_trailing_semicolon() {
        assert_eq!(normalize_sql("  SELECT 1;  "), "SELECT 1");
        assert_eq!(normalize_sql("SELECT 1"), "SELECT 1");
    }

    #[test]
    #[ntest::timeout(100)]
    fn if_else_bind_tree() {
        let sql =
            "SELECT * FROM emp WHERE /*IF job != null*/job = /*job*/'CLERK' -- ELSE job is null/*END*/";
        let root = parse(sql);
        assert_eq!(
            root,
            Node::Container {
                position: 0,
                children: vec![
                    Node::Sql {
                        position: 0,
                        text: "SELECT * FROM emp WHERE ".to_string(),
                    },
                    Node::If {
                        position: 29,
                        expression: expression("job != null"),
                        children: vec![
                            Node::Sql {
                                position: 42,
                                text: "job = ".to_string(),
                            },
                            Node::BindVariable {
                                position: 50,
                                expression: expression("job"),
                            },
                            Node::Sql {
                                position: 62,
                                text: " ".to_string(),
                            },
                        ],
                        else_node: Some(Box::new(Node::Else {
                            position: 70,
                            children: vec![Node::Sql {
                                position: 71,
                                text: "job is null".to_string(),
                            }],
                        })),
                    },
                ],
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn branch_prefixes() {
        let sql = "/*BEGIN*/WHERE /*IF a != null*/AND a = /*a*/1/*END*//*END*/";
        let root = parse(sql);
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        let Node::Begin { children, .. } = &children[0] else {
            panic!("expected BEGIN scope, got {:?}", children[0]);
        };
        let Node::If { children, .. } = &children[1] else {
            panic!("expected IF scope, got {:?}", children[1]);
        };
        assert_eq!(
            children[0],
            Node::PrefixSql {
                position: 31,
                prefix: "AND ".to_string(),
                text: "a = ".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn comma_prefix() {
        let sql = "SELECT a/*IF b != null*/, b/*END*/ FROM t";
        let root = parse(sql);
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        let Node::If { children, .. } = &children[1] else {
            panic!("expected IF scope, got {:?}", children[1]);
        };
        assert_eq!(
            children[0],
            Node::PrefixSql {
                position: 24,
                prefix: ", ".to_string(),
                text: "b".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn bind_directive_variants() {
        let root = parse("id in /*ids*/(1, 2) AND name = /*$name*/'x' ORDER BY /*orderBy*/id");
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        assert_eq!(
            children[1],
            Node::ParenBindVariable {
                position: 8,
                expression: expression("ids"),
            }
        );
        assert_eq!(
            children[3],
            Node::EmbeddedValue {
                position: 34,
                expression: expression("name"),
            }
        );
        assert_eq!(
            children[5],
            Node::EmbeddedValue {
                position: 55,
                expression: expression("orderBy"),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn raw_placeholders_are_numbered() {
        let root = parse("a = ? AND b = ?");
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        assert_eq!(
            children[1],
            Node::BindVariable {
                position: 4,
                expression: expression("$1"),
            }
        );
        assert_eq!(
            children[3],
            Node::BindVariable {
                position: 14,
                expression: expression("$2"),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn hint_comment_passes_through() {
        let root = parse("SELECT /*+ INDEX(emp idx) */ * FROM emp");
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        assert_eq!(
            children[1],
            Node::Sql {
                position: 7,
                text: "/*+ INDEX(emp idx) */".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn else_mode_strips_line_comments() {
        let sql = "SELECT * FROM emp WHERE /*IF false*/x = 1 -- ELSE x -- is null/*END*/";
        let root = parse(sql);
        let Node::Container { children, .. } = &root else {
            panic!("expected container, got {root:?}");
        };
        let Node::If { else_node: Some(else_node), .. } = &children[1] else {
            panic!("expected IF with else branch, got {:?}", children[1]);
        };
        let Node::Else { children, .. } = else_node.as_ref() else {
            panic!("expected else branch, got {else_node:?}");
        };
        assert_eq!(
            children[0],
            Node::Sql {
                position: 50,
                text: "x  is null".to_string(),
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn stray_end_is_ignored() {
        let root = parse("a/*END*/b");
        assert_eq!(
            root,
            Node::Container {
                position: 0,
                children: vec![
                    Node::Sql {
                        position: 0,
                        text: "a".to_string(),
                    },
                    Node::Sql {
                        position: 8,
                        text: "b".to_string(),
                    },
                ],
            }
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_end_reported_at_scope_open() {
        let err = parse_err("/*BEGIN*/WHERE /*IF id != null*/id = /*id*/1/*END*/");
        assert_eq!(err.kind, ParseErrorKind::MissingEndComment);
        assert_eq!(err.position.row, 1);
        assert_eq!(err.position.col, 0);
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_if_condition() {
        let err = parse_err("a/*IF */b/*END*/");
        assert_eq!(err.kind, ParseErrorKind::MissingIfCondition);
        assert_eq!(err.position.col, 6);
    }

    #[test]
    #[ntest::timeout(100)]
    fn invalid_if_expression() {
        let err = parse_err("x/*IF ==*/y/*END*/");
        assert!(matches!(
            err.kind,
            ParseErrorKind::InvalidExpression { ref expression, .. } if expression == "=="
        ));
        assert_eq!(err.position.col, 6);
    }

    #[test]
    #[ntest::timeout(100)]
    fn nesting_cap() {
        let mut sql = String::new();
        for _ in 0..70 {
            sql.push_str("/*BEGIN*/");
        }
        let err = parse_err(&sql);
        assert!(matches!(err.kind, ParseErrorKind::NestingTooDeep { .. }));
    }
}
