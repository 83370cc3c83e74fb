//! Sql string scanning.
//!
//! The scanner understands just enough lexical structure to find the
//! characters the driver cares about outside of literals and comments:
//! positional `?` placeholders, named `@ident` placeholders, and
//! statement-separating `;`. Everything else passes through untouched.
//!
//! Recognized lexical elements: single-quoted strings with doubled-quote
//! escape, double-quoted identifiers, `--` line comments, `/* .. */`
//! block comments, and `$tag$ .. $tag$` dollar-quoted literals.
//! Unterminated elements extend to the end of input; the scanner never
//! fails.

/// Replace each top-level `?` with the value produced by `subst`.
///
/// Used by the interpolation path of unprepared execution.
pub fn rewrite_positional(sql: &str, mut subst: impl FnMut() -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    scan(sql, |event, text| match event {
        Event::Positional => out.push_str(&subst()),
        _ => out.push_str(text),
    });
    out
}

/// Replace each top-level `@ident` with `?`, reporting the uppercased
/// identifier to `on_name` in encounter order.
///
/// Duplicate names are reported every time they appear. An at-sign inside
/// a literal or comment is not a parameter.
pub fn rewrite_named(sql: &str, mut on_name: impl FnMut(&str)) -> String {
    let mut out = String::with_capacity(sql.len());
    scan(sql, |event, text| match event {
        Event::Named => {
            on_name(&text[1..].to_uppercase());
            out.push('?');
        }
        _ => out.push_str(text),
    });
    out
}

/// Count the top-level positional placeholders of `sql`.
pub fn count_positional(sql: &str) -> usize {
    let mut n = 0;
    scan(sql, |event, _| {
        if matches!(event, Event::Positional) {
            n += 1;
        }
    });
    n
}

/// Split `sql` on top-level `;`, trimming whitespace and dropping empty
/// segments.
pub fn split_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let mut statements = Vec::new();
    let mut current = String::new();

    scan(sql, |event, text| match event {
        Event::Separator => {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
        _ => current.push_str(text),
    });

    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }

    statements
}

/// What a scanned span means at the top level.
enum Event {
    /// Literal text, quoted content, or comments; copied through.
    Text,
    /// A top-level `?`.
    Positional,
    /// A top-level `@ident` span, including the at-sign.
    Named,
    /// A top-level `;`.
    Separator,
}

/// Drive `emit` over `sql`, one span at a time.
///
/// Spans never split a multi-byte character: literals and comments are
/// emitted byte-exact, placeholders are ascii.
fn scan(sql: &str, mut emit: impl FnMut(Event, &str)) {
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                let end = quoted_end(bytes, i, b'\'');
                emit(Event::Text, &sql[i..end]);
                i = end;
            }
            b'"' => {
                let end = quoted_end(bytes, i, b'"');
                emit(Event::Text, &sql[i..end]);
                i = end;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = line_comment_end(bytes, i);
                emit(Event::Text, &sql[i..end]);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = block_comment_end(bytes, i);
                emit(Event::Text, &sql[i..end]);
                i = end;
            }
            b'$' => match dollar_tag(bytes, i) {
                Some(tag_len) => {
                    let end = dollar_quoted_end(bytes, i, tag_len);
                    emit(Event::Text, &sql[i..end]);
                    i = end;
                }
                None => {
                    emit(Event::Text, &sql[i..i + 1]);
                    i += 1;
                }
            },
            b'?' => {
                emit(Event::Positional, "?");
                i += 1;
            }
            b'@' if bytes.get(i + 1).is_some_and(|b| is_ident_byte(*b)) => {
                let mut end = i + 1;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                emit(Event::Named, &sql[i..end]);
                i = end;
            }
            b';' => {
                emit(Event::Separator, ";");
                i += 1;
            }
            _ => {
                // extend over the full utf8 character
                let mut end = i + 1;
                while end < bytes.len() && bytes[end] & 0b1100_0000 == 0b1000_0000 {
                    end += 1;
                }
                emit(Event::Text, &sql[i..end]);
                i = end;
            }
        }
    }
}

/// Past-the-end index of a quoted run starting at `start`, handling the
/// doubled-quote escape. Unterminated quotes run to end of input.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn line_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i < bytes.len() {
        if matches!(bytes[i], b'\n' | b'\r') {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Length of a `$tag$` opener at `start`, tag chars `[A-Za-z0-9_]*`.
fn dollar_tag(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            return Some(i + 1 - start);
        }
        if !is_ident_byte(bytes[i]) {
            return None;
        }
        i += 1;
    }
    None
}

/// Past-the-end index of a dollar-quoted literal; exits only on the exact
/// opening tag, or end of input.
fn dollar_quoted_end(bytes: &[u8], start: usize, tag_len: usize) -> usize {
    let tag = &bytes[start..start + tag_len];
    let mut i = start + tag_len;
    while i + tag_len <= bytes.len() {
        if &bytes[i..i + tag_len] == tag {
            return i + tag_len;
        }
        i += 1;
    }
    bytes.len()
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod test {
    use super::*;

    fn capture_names(sql: &str) -> (String, Vec<String>) {
        let mut names = Vec::new();
        let out = rewrite_named(sql, |name| names.push(name.to_string()));
        (out, names)
    }

    #[test]
    fn named_rewrite() {
        let (out, names) = capture_names(
            "select * from whatever where a = @first and b = @second and c = '@fooledYou'",
        );
        assert_eq!(
            out,
            "select * from whatever where a = ? and b = ? and c = '@fooledYou'"
        );
        assert_eq!(names, ["FIRST", "SECOND"]);
    }

    #[test]
    fn named_rewrite_no_params() {
        let (out, names) = capture_names("select * from whatever where a = 'test'");
        assert_eq!(out, "select * from whatever where a = 'test'");
        assert!(names.is_empty());

        let (out, names) = capture_names("");
        assert_eq!(out, "");
        assert!(names.is_empty());
    }

    #[test]
    fn named_rewrite_pre_escaped_string() {
        let (out, names) = capture_names("select * from whatever where a = @first and b = 'isn''t");
        assert_eq!(out, "select * from whatever where a = ? and b = 'isn''t");
        assert_eq!(names, ["FIRST"]);
    }

    #[test]
    fn named_rewrite_malformed_string() {
        let (out, names) =
            capture_names("select * from whatever where a = @first and b = 'isn'''t");
        assert_eq!(out, "select * from whatever where a = ? and b = 'isn'''t");
        assert_eq!(names, ["FIRST"]);
    }

    #[test]
    fn named_rewrite_comment() {
        let (out, names) = capture_names(
            "select --some select stuff\n* from whatever where a = @param",
        );
        assert_eq!(out, "select --some select stuff\n* from whatever where a = ?");
        assert_eq!(names, ["PARAM"]);
    }

    #[test]
    fn named_rewrite_line_endings() {
        let (out, names) = capture_names("select\n* from t\nwhere\na = @param1\nand b = @param2");
        assert_eq!(out, "select\n* from t\nwhere\na = ?\nand b = ?");
        assert_eq!(names, ["PARAM1", "PARAM2"]);

        let (out, names) = capture_names("select * from t where a = @param1\n");
        assert_eq!(out, "select * from t where a = ?\n");
        assert_eq!(names, ["PARAM1"]);
    }

    #[test]
    fn duplicate_names_in_order() {
        let (out, names) = capture_names("select @a, @b, @a");
        assert_eq!(out, "select ?, ?, ?");
        assert_eq!(names, ["A", "B", "A"]);
    }

    #[test]
    fn positional_rewrite() {
        let subst = || "'replaced'".to_string();
        assert_eq!(
            rewrite_positional("select * from t where a = ? and b = 2", subst),
            "select * from t where a = 'replaced' and b = 2"
        );
        assert_eq!(
            rewrite_positional("select * from t where a = ?", subst),
            "select * from t where a = 'replaced'"
        );
        assert_eq!(
            rewrite_positional("select * from t where a = ? and b = '?fooledYou'", subst),
            "select * from t where a = 'replaced' and b = '?fooledYou'"
        );
        assert_eq!(
            rewrite_positional("select\n* from -- maybe broken?\nwhere a = ?", subst),
            "select\n* from -- maybe broken?\nwhere a = 'replaced'"
        );
    }

    #[test]
    fn positional_count() {
        assert_eq!(count_positional("select ?, '?', ? -- ?"), 2);
        assert_eq!(count_positional("select 1"), 0);
    }

    #[test]
    fn split_simple() {
        assert_eq!(split_statements("SELECT 1"), ["SELECT 1"]);
        assert_eq!(
            split_statements("SELECT 1; SELECT 2; SELECT 3;"),
            ["SELECT 1", "SELECT 2", "SELECT 3"]
        );
        assert!(split_statements("   ").is_empty());
    }

    #[test]
    fn split_ignores_quoted_semicolons() {
        assert_eq!(
            split_statements("SELECT ';' AS txt; SELECT 'still;literal';"),
            ["SELECT ';' AS txt", "SELECT 'still;literal'"]
        );
    }

    #[test]
    fn split_ignores_comments() {
        assert_eq!(
            split_statements("-- leading comment;\nSELECT 1; /* block;comment */ SELECT 2;"),
            ["-- leading comment;\nSELECT 1", "/* block;comment */ SELECT 2"]
        );
    }

    #[test]
    fn split_dollar_quoted() {
        assert_eq!(
            split_statements("SELECT $$value;inside$$; SELECT $tag$semi;colon$tag$;"),
            ["SELECT $$value;inside$$", "SELECT $tag$semi;colon$tag$"]
        );
        assert_eq!(
            split_statements("SELECT $tag$semi;colon$tag$; SELECT 'x;y'"),
            ["SELECT $tag$semi;colon$tag$", "SELECT 'x;y'"]
        );
    }

    #[test]
    fn split_mixed_whitespace() {
        assert_eq!(
            split_statements("  SELECT 1;\n\n ; SELECT 2  ;"),
            ["SELECT 1", "SELECT 2"]
        );
    }

    #[test]
    fn split_join_round_trip() {
        let q = "SELECT a FROM t WHERE b = 'x;y'; UPDATE t SET a = 1";
        assert_eq!(split_statements(q).join("; "), q);
    }

    #[test]
    fn bare_dollar_passes_through() {
        assert_eq!(split_statements("SELECT 1 $ 2; SELECT 3"), ["SELECT 1 $ 2", "SELECT 3"]);
    }

    #[test]
    fn unterminated_literal_extends_to_end() {
        assert_eq!(split_statements("SELECT 'oops; SELECT 2"), ["SELECT 'oops; SELECT 2"]);
        assert_eq!(split_statements("SELECT 1 /* dangling; "), ["SELECT 1 /* dangling;"]);
    }
}
