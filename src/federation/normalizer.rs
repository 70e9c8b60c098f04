// SPDX-License-Identifier: Apache-2.0

//! Statement normalization.
//!
//! A single pass over the statement tracks whether it is inside a single-quoted
//! literal. Two texts come out of it:
//!
//! - the *executable* text, which is what backends receive: whitespace outside
//!   literals collapsed to one space, trailing spaces inside literals removed,
//!   trailing `;` dropped;
//! - the *masked* text, which only the classifier sees: the executable text with
//!   literal whitespace, literal parentheses and umlauts replaced by placeholder
//!   tokens.
//!
//! The masked text is derived from the executable one, so masking never leaks
//! into what a backend executes.

use fedsql_core::{FedError, FedResult};

/// Replaces a whitespace run inside a string literal (masked text only)
pub const LITERAL_SPACE_SENTINEL: &str = "---";
const OPEN_PAREN_SENTINEL: &str = "(((";
const CLOSE_PAREN_SENTINEL: &str = "//////";

const UMLAUT_PLACEHOLDERS: [(char, &str); 7] = [
    ('Ä', "u00c4"),
    ('Ö', "u00d6"),
    ('Ü', "u00dc"),
    ('ä', "u00e4"),
    ('ö', "u00f6"),
    ('ü', "u00fc"),
    ('ß', "u00df"),
];

/// Result of normalizing one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    /// Text dispatched to backends
    pub executable: String,
    /// Text handed to the classifier
    pub masked: String,
}

/// Normalizes a raw statement. Applying it to its own `executable` output is a no-op.
pub fn normalize(raw: &str) -> FedResult<NormalizedQuery> {
    let executable = canonicalize(raw)?;
    let masked = mask(&executable);

    if let Some(c) = masked.chars().find(|c| c.is_control()) {
        return Err(FedError::normalization(format!(
            "Statement contains control character U+{:04X}",
            c as u32
        )));
    }
    if masked.contains("  ") {
        return Err(FedError::normalization("Statement still contains repeated spaces"));
    }

    Ok(NormalizedQuery { executable, masked })
}

/// Collapses whitespace outside literals and trims literal trailing spaces
pub fn canonicalize(raw: &str) -> FedResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;

        if c != '\'' {
            out.push(c);
            continue;
        }

        let mut body = String::new();
        let mut terminated = false;
        while let Some(lc) = chars.next() {
            if lc == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    body.push_str("''");
                    continue;
                }
                terminated = true;
                break;
            }
            body.push(lc);
        }
        if !terminated {
            return Err(FedError::normalization("Unterminated string literal"));
        }

        out.push('\'');
        out.push_str(body.trim_end_matches(' '));
        out.push('\'');
    }

    let trimmed = out.trim_end_matches(|c: char| c == ';' || c == ' ');
    Ok(trimmed.to_string())
}

/// Applies the classifier-only placeholder substitutions
fn mask(executable: &str) -> String {
    let mut out = String::with_capacity(executable.len() + 16);
    let mut in_literal = false;
    let mut in_space_run = false;

    for c in executable.chars() {
        if in_literal && c.is_whitespace() {
            if !in_space_run {
                out.push_str(LITERAL_SPACE_SENTINEL);
                in_space_run = true;
            }
            continue;
        }
        in_space_run = false;

        match c {
            '\'' => {
                in_literal = !in_literal;
                out.push(c);
            }
            '(' if in_literal => out.push_str(OPEN_PAREN_SENTINEL),
            ')' if in_literal => out.push_str(CLOSE_PAREN_SENTINEL),
            _ => match umlaut_placeholder(c) {
                Some(placeholder) => out.push_str(placeholder),
                None => out.push(c),
            },
        }
    }
    out
}

fn umlaut_placeholder(c: char) -> Option<&'static str> {
    UMLAUT_PLACEHOLDERS
        .iter()
        .find(|(u, _)| *u == c)
        .map(|(_, placeholder)| *placeholder)
}

/// Byte offset of `keyword` as a whole word outside string literals, ignoring ASCII case
pub fn find_keyword_outside_literals(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut in_literal = false;

    for (i, c) in text.char_indices() {
        if c == '\'' {
            in_literal = !in_literal;
            continue;
        }
        if in_literal {
            continue;
        }
        let Some(candidate) = text.get(i..i + keyword.len()) else {
            continue;
        };
        if !candidate.eq_ignore_ascii_case(keyword) {
            continue;
        }
        let before_ok = i == 0 || !is_word_byte(bytes[i - 1]);
        let after_ok = bytes
            .get(i + keyword.len())
            .map_or(true, |b| !is_word_byte(*b));
        if before_ok && after_ok {
            return Some(i);
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Re-attaches the part of `raw` after `keyword` to the normalized head of `executable`.
///
/// Used to send INSERT value lists and SELECT filters exactly as written, including
/// trailing spaces inside their literals.
pub fn restore_tail(raw: &str, executable: &str, keyword: &str) -> String {
    let (Some(exec_at), Some(raw_at)) = (
        find_keyword_outside_literals(executable, keyword),
        find_keyword_outside_literals(raw, keyword),
    ) else {
        return executable.to_string();
    };

    let head = &executable[..exec_at + keyword.len()];
    let tail = raw[raw_at + keyword.len()..]
        .trim_end()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("{head}{tail}")
}

/// True when the statement carries a HAVING clause
pub fn contains_having(text: &str) -> bool {
    text.to_ascii_uppercase().contains(" HAVING ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn collapses_whitespace_and_drops_semicolon() {
        let n = normalize("SELECT *\tFROM\r\n  people   WHERE id = 1 ;").unwrap();
        assert_eq!(n.executable, "SELECT * FROM people WHERE id = 1");
        assert_eq!(n.masked, n.executable);
    }

    #[test]
    fn literal_whitespace_is_kept_for_backends_and_masked_for_classifier() {
        let n = normalize("INSERT INTO t VALUES ('Fulda  (Hessen)  ', 1)").unwrap();
        assert_eq!(n.executable, "INSERT INTO t VALUES ('Fulda  (Hessen)', 1)");
        assert_eq!(n.masked, "INSERT INTO t VALUES ('Fulda---(((Hessen//////', 1)");
    }

    #[test]
    fn umlauts_only_change_the_masked_text() {
        let n = normalize("SELECT * FROM orte WHERE name = 'Köln'").unwrap();
        assert!(n.executable.ends_with("'Köln'"));
        assert!(n.masked.ends_with("'Ku00f6ln'"));
    }

    #[test]
    fn escaped_quotes_stay_inside_the_literal() {
        let n = normalize("SELECT 'it''s  here' FROM dual").unwrap();
        assert_eq!(n.executable, "SELECT 'it''s  here' FROM dual");
        assert_eq!(n.masked, "SELECT 'it''s---here' FROM dual");
    }

    #[test]
    fn unterminated_literal_is_rejected() {
        let err = normalize("SELECT 'abc FROM t").unwrap_err();
        assert_eq!(err.kind(), fedsql_core::FedErrorKind::Normalization);
    }

    #[test]
    fn control_characters_are_rejected() {
        assert!(normalize("SELECT 1\u{7}").is_err());
    }

    #[test]
    fn keyword_search_skips_literals_and_partial_words() {
        let text = "INSERT INTO valuesx VALUES ('VALUES')";
        assert_eq!(find_keyword_outside_literals(text, "values"), Some(20));
        assert_eq!(find_keyword_outside_literals("SELECT 'where'", "WHERE"), None);
    }

    #[test]
    fn restore_tail_keeps_value_list_verbatim() {
        let raw = "INSERT  INTO t\nVALUES (1, 'ab  ');";
        let n = normalize(raw).unwrap();
        assert_eq!(n.executable, "INSERT INTO t VALUES (1, 'ab')");
        assert_eq!(
            restore_tail(raw, &n.executable, "VALUES"),
            "INSERT INTO t VALUES (1, 'ab  ')"
        );
    }

    #[test]
    fn having_detection_is_case_insensitive() {
        assert!(contains_having("SELECT a FROM t GROUP BY a having count(*) > 1"));
        assert!(!contains_having("SELECT having_flag FROM t"));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[a-zA-Z0-9 ',;()\t\näö]{0,64}") {
            if let Ok(first) = normalize(&raw) {
                let second = normalize(&first.executable).unwrap();
                prop_assert_eq!(second, first);
            }
        }
    }
}
