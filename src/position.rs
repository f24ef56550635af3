/// A resolved location within a template's normalized source text.
///
/// `row` and `col` are 1-based for the first line; `line` is the full text of
/// the line containing the location, with line-break characters removed.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub row: usize,
    pub col: usize,
    pub line: String,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}, col {}", self.row, self.col)
    }
}

/// Resolves a byte offset in `sql` to a [`Position`].
///
/// Line breaks are matched as `\r\n`, `\r`, or `\n`, with the two-character
/// sequence taking priority when both would match at the same offset. The
/// column is counted from the end of the last break before the offset.
pub fn resolve_sql_position(sql: &str, offset: usize) -> Position {
    let mut offset = offset.min(sql.len());
    while offset > 0 && !sql.is_char_boundary(offset) {
        offset -= 1;
    }

    let before = &sql[..offset];
    let mut row = 1;
    let mut last_break_end = 0;
    let mut search = 0;
    while let Some((idx, len)) = find_line_break(before, search) {
        row += 1;
        search = idx + len;
        last_break_end = search;
    }

    let mut col = offset - last_break_end;
    if last_break_end > 0 {
        col = col.saturating_sub(1);
    }

    let rest = &sql[last_break_end..];
    let line = match find_line_break(rest, 0) {
        Some((idx, _)) => &rest[..idx],
        None => rest,
    };

    Position {
        row,
        col,
        line: line.to_string(),
    }
}

/// Returns the start offset and byte length of the next line break at or
/// after `from`.
fn find_line_break(text: &str, from: usize) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                let len = if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                return Some((i, len));
            }
            b'\n' => return Some((i, 1)),
            _ => i += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn first_row() {
        let sql = "SELECT * FROM emp WHERE id = 1";
        let position = resolve_sql_position(sql, 7);
        assert_eq!(position.row, 1);
        assert_eq!(position.col, 7);
        assert_eq!(position.line, "SELECT * FROM emp WHERE id = 1");
    }

    #[test]
    #[ntest::timeout(100)]
    fn middle_row_crlf() {
        let sql = "SELECT * \r\n FROM\r\n EMPLOYEE\r\n WHERE\r\n  /*IF id != null*/\r\n  id = /*id*/10\r\n  /*END*/";
        let position = resolve_sql_position(sql, 46);
        assert_eq!(position.row, 5);
        assert_eq!(position.col, 8);
        assert_eq!(position.line, "  /*IF id != null*/");
    }

    #[test]
    #[ntest::timeout(100)]
    fn mixed_line_endings() {
        let sql = "one\ntwo\r\nthree\rfour";
        let position = resolve_sql_position(sql, 15);
        assert_eq!(position.row, 4);
        assert_eq!(position.col, 0);
        assert_eq!(position.line, "four");

        let position = resolve_sql_position(sql, 9);
        assert_eq!(position.row, 3);
        assert_eq!(position.col, 0);
        assert_eq!(position.line, "three");
    }

    #[test]
    #[ntest::timeout(100)]
    fn offset_past_end_clamps() {
        let position = resolve_sql_position("abc", 100);
        assert_eq!(position.row, 1);
        assert_eq!(position.col, 3);
        assert_eq!(position.line, "abc");
    }
}
