use crate::error::{ParseError, ParseErrorKind};
use crate::position::resolve_sql_position;

/// Directive comment delimiter pairs. The alternate `#*`..`*#` pair exists
/// for templates whose tooling chokes on nested `/*`..`*/`. At equal offsets
/// the pair listed first wins.
const DELIMITERS: [(&str, &str); 2] = [("/*", "*/"), ("#*", "*#")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Sql,
    Comment,
    Else,
    BindVariable,
    Eof,
}

/// Splits a template into SQL fragments, directive comment bodies, `-- ELSE`
/// markers, and raw `?` placeholders.
///
/// The tokenizer is a cursor: `next` advances to the following token, and the
/// parser can reach into the stream with `skip_token`/`skip_whitespace` to
/// consume the literal that follows a bind directive.
pub struct SqlTokenizer<'a> {
    sql: &'a str,
    position: usize,
    token: String,
    token_type: TokenType,
    next_token_type: TokenType,
    bind_variable_num: usize,
    comment_open_offset: usize,
    comment_opener: &'static str,
    comment_closer: &'static str,
}

impl<'a> SqlTokenizer<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self {
            sql,
            position: 0,
            token: String::new(),
            token_type: TokenType::Sql,
            next_token_type: TokenType::Sql,
            bind_variable_num: 0,
            comment_open_offset: 0,
            comment_opener: "/*",
            comment_closer: "*/",
        }
    }

    pub fn sql(&self) -> &'a str {
        self.sql
    }

    pub const fn position(&self) -> usize {
        self.position
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub const fn token_type(&self) -> TokenType {
        self.token_type
    }

    /// The text already consumed.
    pub fn before(&self) -> &'a str {
        &self.sql[..self.position]
    }

    /// The text not yet consumed.
    pub fn after(&self) -> &'a str {
        &self.sql[self.position..]
    }

    /// Offset of the opening delimiter of the comment most recently entered.
    pub const fn comment_open_offset(&self) -> usize {
        self.comment_open_offset
    }

    pub const fn comment_opener(&self) -> &'static str {
        self.comment_opener
    }

    pub const fn comment_closer(&self) -> &'static str {
        self.comment_closer
    }

    pub fn next(&mut self) -> Result<TokenType, ParseError> {
        if self.position >= self.sql.len() {
            // A comment opener with nothing after it.
            if self.next_token_type == TokenType::Comment {
                return Err(self.unclosed_comment_error());
            }
            self.token.clear();
            self.token_type = TokenType::Eof;
            self.next_token_type = TokenType::Eof;
            return Ok(self.token_type);
        }
        match self.next_token_type {
            TokenType::Sql => self.parse_sql()?,
            TokenType::Comment => self.parse_comment()?,
            TokenType::Else => self.parse_else(),
            TokenType::BindVariable => self.parse_bind_variable(),
            TokenType::Eof => {
                self.token.clear();
                self.token_type = TokenType::Eof;
            }
        }
        Ok(self.token_type)
    }

    fn parse_sql(&mut self) -> Result<(), ParseError> {
        let rest = &self.sql[self.position..];

        let mut comment_start: Option<(usize, &'static str, &'static str)> = None;
        for (opener, closer) in DELIMITERS {
            if let Some(idx) = rest.find(opener) {
                let offset = self.position + idx;
                if comment_start.is_none_or(|(best, _, _)| offset < best) {
                    comment_start = Some((offset, opener, closer));
                }
            }
        }
        let else_start = self.find_else_comment();
        let bind_start = rest.find('?').map(|idx| self.position + idx);

        let mut next_start = usize::MAX;
        if let Some((offset, _, _)) = comment_start {
            next_start = next_start.min(offset);
        }
        if let Some((offset, _)) = else_start {
            next_start = next_start.min(offset);
        }
        if let Some(offset) = bind_start {
            next_start = next_start.min(offset);
        }

        if next_start == usize::MAX {
            self.token = rest.to_string();
            self.token_type = TokenType::Sql;
            self.next_token_type = TokenType::Eof;
            self.position = self.sql.len();
            return Ok(());
        }

        self.token = self.sql[self.position..next_start].to_string();
        self.token_type = TokenType::Sql;
        let need_next = next_start == self.position;

        if let Some((offset, opener, closer)) = comment_start
            && offset == next_start
        {
            self.next_token_type = TokenType::Comment;
            self.comment_open_offset = offset;
            self.comment_opener = opener;
            self.comment_closer = closer;
            self.position = offset + opener.len();
        } else if let Some((offset, length)) = else_start
            && offset == next_start
        {
            self.next_token_type = TokenType::Else;
            self.position = offset + length;
        } else {
            self.next_token_type = TokenType::BindVariable;
            self.position = next_start;
        }

        if need_next {
            self.next()?;
        }
        Ok(())
    }

    /// Finds the next `--` line comment whose first word is `ELSE`. Returns
    /// the offset of the `--` and the length through the end of `ELSE`.
    fn find_else_comment(&self) -> Option<(usize, usize)> {
        let mut search = self.position;
        while let Some(idx) = self.sql[search..].find("--") {
            let start = search + idx;
            let skip_pos = self.skip_whitespace_from(start + 2);
            if skip_pos + 4 <= self.sql.len() && &self.sql[skip_pos..skip_pos + 4] == "ELSE" {
                return Some((start, skip_pos + 4 - start));
            }
            search = start + 2;
        }
        None
    }

    fn parse_comment(&mut self) -> Result<(), ParseError> {
        let rest = &self.sql[self.position..];
        let Some(end) = rest.find(self.comment_closer) else {
            return Err(self.unclosed_comment_error());
        };
        self.token = rest[..end].to_string();
        self.token_type = TokenType::Comment;
        self.next_token_type = TokenType::Sql;
        self.position += end + self.comment_closer.len();
        Ok(())
    }

    fn parse_else(&mut self) {
        self.token.clear();
        self.token_type = TokenType::Else;
        self.next_token_type = TokenType::Sql;
    }

    fn parse_bind_variable(&mut self) {
        self.bind_variable_num += 1;
        self.token = format!("${}", self.bind_variable_num);
        self.token_type = TokenType::BindVariable;
        self.next_token_type = TokenType::Sql;
        self.position += 1;
    }

    fn unclosed_comment_error(&self) -> ParseError {
        let opener_end = self.comment_open_offset + self.comment_opener.len();
        ParseError {
            position: resolve_sql_position(self.sql, self.comment_open_offset),
            kind: ParseErrorKind::UnclosedComment {
                closer: self.comment_closer.to_string(),
                body: self.sql[opener_end..].to_string(),
            },
        }
    }

    /// Consumes the literal following a directive comment. Single-quoted
    /// strings (with `''` escapes) and parenthesized groups are consumed
    /// whole; otherwise the token ends at whitespace, a comma, a parenthesis,
    /// or the start of another comment.
    pub fn skip_token(&mut self) -> &str {
        let quote = match self.sql[self.position..].chars().next() {
            Some('\'') => Some('\''),
            Some('(') => Some(')'),
            _ => None,
        };
        let quoting = quote.is_some();
        let start = if quoting { self.position + 1 } else { self.position };

        let mut index = self.sql.len();
        let mut chars = self.sql[start..].char_indices();
        while let Some((i, c)) = chars.next() {
            let offset = start + i;
            let next_char = self.sql[offset + c.len_utf8()..].chars().next();
            if !quoting && (c.is_whitespace() || c == ',' || c == '(' || c == ')') {
                index = offset;
                break;
            } else if (c == '/' || c == '#') && next_char == Some('*') {
                index = offset;
                break;
            } else if c == '-' && next_char == Some('-') {
                index = offset;
                break;
            } else if Some(c) == quote {
                if next_char == quote {
                    chars.next();
                } else {
                    index = offset + c.len_utf8();
                    break;
                }
            }
        }

        self.token = self.sql[self.position..index].to_string();
        self.token_type = TokenType::Sql;
        self.next_token_type = TokenType::Sql;
        self.position = index;
        &self.token
    }

    pub fn skip_whitespace(&mut self) -> &str {
        let index = self.skip_whitespace_from(self.position);
        self.token = self.sql[self.position..index].to_string();
        self.position = index;
        &self.token
    }

    fn skip_whitespace_from(&self, from: usize) -> usize {
        self.sql[from..]
            .char_indices()
            .find(|(_, c)| !c.is_whitespace())
            .map_or(self.sql.len(), |(i, _)| from + i)
    }
}
