//! # proxy-sql
//!
//! A deliberately shallow, regex-driven recognizer for a handful of SQL
//! statement shapes (`INSERT`, `UPDATE`, multi-row `INSERT`). It is not a SQL
//! parser: anything outside the recognized shapes is left alone by the
//! caller, and reconstruction only ever touches the literal values inside a
//! recognized statement, never its structure.
//!
//! Value splitting toggles on every unescaped `'`, so a literal containing
//! an escaped quote (`''`) cannot be told apart from two adjacent empty
//! strings. Extraction treats any such statement as unrecognized rather than
//! risk misparsing it — see [`extract_values`] and [`extract_multirow_values`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

use once_cell::sync::Lazy;
use regex::Regex;

static INSERT_COLUMNS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)insert\s+into\s+([\w.\[\]]+)\s*\(([^)]+)\)").unwrap()
});
static UPDATE_COLUMNS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)update\s+([\w.\[\]]+)\s+set\s+(.+?)\s+where\s").unwrap()
});
static INSERT_VALUES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)insert\s+into\s+[\w.\[\]]+\s*\([^)]+\)\s*values\s*\(([^)]+)\)").unwrap()
});
static UPDATE_ASSIGNS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)update\s+[\w.\[\]]+\s+set\s+(.+?)\s+where\s").unwrap()
});
static RECONSTRUCT_INSERT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(insert\s+into\s+[\w.\[\]]+\s*\([^)]+\)\s*values\s*\()([^)]+)(\).*)").unwrap()
});
static RECONSTRUCT_UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(update\s+[\w.\[\]]+\s+set\s+)(.+?)(\s+where\s.+)").unwrap()
});
static MULTIROW_VALUES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)insert\s+into\s+[\w.\[\]]+\s*\([^)]+\)\s*values\s*(.+)$").unwrap()
});
static RECONSTRUCT_MULTIROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(insert\s+into\s+[\w.\[\]]+\s*\([^)]+\)\s*values\s*)(.+)$").unwrap()
});
static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?$").unwrap());

/// Extract the target table and column list from an `INSERT` or `UPDATE`.
#[must_use]
pub fn extract_table_and_columns(sql_text: &str) -> Option<(String, Vec<String>)> {
    let sql = sql_text.trim();

    if let Some(caps) = INSERT_COLUMNS_RE.captures(sql) {
        let table = caps[1].to_string();
        let columns = caps[2]
            .split(',')
            .map(|c| c.trim().trim_matches(|ch| ch == '[' || ch == ']').to_string())
            .collect();
        return Some((table, columns));
    }

    if let Some(caps) = UPDATE_COLUMNS_RE.captures(sql) {
        let table = caps[1].to_string();
        let columns = caps[2]
            .split(',')
            .map(|part| {
                part.split('=')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .trim_matches(|ch| ch == '[' || ch == ']')
                    .to_string()
            })
            .collect();
        return Some((table, columns));
    }

    None
}

/// Split a comma-separated list, toggling quote state on every `'`.
///
/// This cannot distinguish an escaped `''` from two adjacent empty string
/// literals; callers that need that distinction should reject input
/// containing `''` up front (see [`has_escaped_quote`]).
fn split_csv_respecting_quotes(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;

    for ch in s.chars() {
        match ch {
            '\'' => {
                in_quotes = !in_quotes;
                buf.push(ch);
            }
            ',' if !in_quotes => {
                out.push(buf.trim().to_string());
                buf.clear();
            }
            _ => buf.push(ch),
        }
    }
    if !buf.is_empty() {
        out.push(buf.trim().to_string());
    }
    out
}

/// Whether `s` contains an escaped quote (`''`), which the quote-toggling
/// splitter cannot safely interpret.
#[must_use]
pub fn has_escaped_quote(s: &str) -> bool {
    s.contains("''")
}

fn unquote(v: &str) -> String {
    if v.len() >= 2 && v.starts_with('\'') && v.ends_with('\'') {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}

/// Extract the literal values of a single-row `INSERT` or `UPDATE`.
///
/// Returns an empty vector if the statement is not recognized, or if it
/// contains an escaped quote the splitter cannot safely handle.
#[must_use]
pub fn extract_values(sql_text: &str) -> Vec<String> {
    let sql = sql_text.trim();

    if let Some(caps) = INSERT_VALUES_RE.captures(sql) {
        let raw = &caps[1];
        if has_escaped_quote(raw) {
            return Vec::new();
        }
        return split_csv_respecting_quotes(raw).iter().map(|v| unquote(v)).collect();
    }

    if let Some(caps) = UPDATE_ASSIGNS_RE.captures(sql) {
        let raw = &caps[1];
        if has_escaped_quote(raw) {
            return Vec::new();
        }
        return split_csv_respecting_quotes(raw)
            .iter()
            .filter_map(|part| part.split_once('='))
            .map(|(_, right)| unquote(right.trim()))
            .collect();
    }

    Vec::new()
}

fn encode_literal(v: &str) -> String {
    if NUMERIC_RE.is_match(v) {
        v.to_string()
    } else {
        format!("'{}'", v.replace('\'', "''"))
    }
}

/// Rebuild an `INSERT ... VALUES (...)` statement with new literal values.
#[must_use]
pub fn reconstruct_insert(sql_text: &str, new_values: &[String]) -> Option<String> {
    let caps = RECONSTRUCT_INSERT_RE.captures(sql_text)?;
    let prefix = &caps[1];
    let suffix = &caps[3];
    let encoded: Vec<String> = new_values.iter().map(|v| encode_literal(v)).collect();
    Some(format!("{prefix}{}{suffix}", encoded.join(", ")))
}

/// Rebuild an `UPDATE ... SET ... WHERE ...` statement's assignment list.
#[must_use]
pub fn reconstruct_update(sql_text: &str, columns: &[String], new_values: &[String]) -> Option<String> {
    let caps = RECONSTRUCT_UPDATE_RE.captures(sql_text)?;
    let prefix = &caps[1];
    let suffix = &caps[3];
    let parts: Vec<String> = columns
        .iter()
        .zip(new_values.iter())
        .map(|(col, v)| format!("{col} = {}", encode_literal(v)))
        .collect();
    Some(format!("{prefix}{}{suffix}", parts.join(", ")))
}

/// Extract per-row literal values from a multi-row `INSERT ... VALUES (...),(...)`.
#[must_use]
pub fn extract_multirow_values(sql_text: &str) -> Option<Vec<Vec<String>>> {
    let caps = MULTIROW_VALUES_RE.captures(sql_text)?;
    let tail = &caps[1];

    let mut rows = Vec::new();
    let mut depth = 0i32;
    let mut buf = String::new();

    for ch in tail.chars() {
        match ch {
            '(' => {
                depth += 1;
                if depth == 1 {
                    buf.clear();
                    continue;
                }
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    if has_escaped_quote(&buf) {
                        return None;
                    }
                    let row = split_csv_respecting_quotes(&buf)
                        .iter()
                        .map(|v| unquote(v))
                        .collect();
                    rows.push(row);
                    buf.clear();
                    continue;
                }
            }
            _ => {}
        }
        if depth >= 1 {
            buf.push(ch);
        }
    }

    if rows.is_empty() { None } else { Some(rows) }
}

/// Rebuild a multi-row `INSERT` with new per-row literal values.
#[must_use]
pub fn reconstruct_multirow_insert(sql_text: &str, new_rows: &[Vec<String>]) -> Option<String> {
    let caps = RECONSTRUCT_MULTIROW_RE.captures(sql_text)?;
    let prefix = &caps[1];
    let row_strs: Vec<String> = new_rows
        .iter()
        .map(|row| {
            let encoded: Vec<String> = row.iter().map(|v| encode_literal(v)).collect();
            format!("({})", encoded.join(", "))
        })
        .collect();
    Some(format!("{prefix}{}", row_strs.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_insert_table_and_columns() {
        let (table, cols) =
            extract_table_and_columns("INSERT INTO dbo.Users (Email, Name) VALUES ('a@b.com', 'x')")
                .unwrap();
        assert_eq!(table, "dbo.Users");
        assert_eq!(cols, vec!["Email", "Name"]);
    }

    #[test]
    fn extract_update_table_and_columns() {
        let (table, cols) =
            extract_table_and_columns("UPDATE dbo.Users SET Email = 'a@b.com' WHERE Id = 1").unwrap();
        assert_eq!(table, "dbo.Users");
        assert_eq!(cols, vec!["Email"]);
    }

    #[test]
    fn extract_insert_values() {
        let vals = extract_values("INSERT INTO dbo.Users (Email) VALUES ('TEST@EXAMPLE.COM')");
        assert_eq!(vals, vec!["TEST@EXAMPLE.COM"]);
    }

    #[test]
    fn extract_values_skips_escaped_quote() {
        let vals = extract_values("INSERT INTO dbo.Users (Name) VALUES ('O''Brien')");
        assert!(vals.is_empty());
    }

    #[test]
    fn round_trip_insert_s1() {
        let sql = "INSERT INTO dbo.Users (Email) VALUES ('TEST@EXAMPLE.COM')";
        let rebuilt = reconstruct_insert(sql, &["test@example.com".to_string()]).unwrap();
        assert_eq!(rebuilt, "INSERT INTO dbo.Users (Email) VALUES ('test@example.com')");
    }

    #[test]
    fn round_trip_update() {
        let sql = "UPDATE dbo.Users SET Email = 'TEST@EXAMPLE.COM' WHERE Id = 1";
        let rebuilt = reconstruct_update(
            sql,
            &["Email".to_string()],
            &["test@example.com".to_string()],
        )
        .unwrap();
        assert_eq!(
            rebuilt,
            "UPDATE dbo.Users SET Email = 'test@example.com' WHERE Id = 1"
        );
    }

    #[test]
    fn multirow_extract_and_reconstruct() {
        let sql = "INSERT INTO dbo.Users (Email) VALUES ('A@B.COM'), ('C@D.COM')";
        let rows = extract_multirow_values(sql).unwrap();
        assert_eq!(rows, vec![vec!["A@B.COM".to_string()], vec!["C@D.COM".to_string()]]);

        let new_rows = vec![vec!["a@b.com".to_string()], vec!["c@d.com".to_string()]];
        let rebuilt = reconstruct_multirow_insert(sql, &new_rows).unwrap();
        assert_eq!(
            rebuilt,
            "INSERT INTO dbo.Users (Email) VALUES ('a@b.com'), ('c@d.com')"
        );
    }

    #[test]
    fn numeric_literal_unquoted() {
        let sql = "INSERT INTO dbo.Orders (Total) VALUES (10)";
        let rebuilt = reconstruct_insert(sql, &["20".to_string()]).unwrap();
        assert_eq!(rebuilt, "INSERT INTO dbo.Orders (Total) VALUES (20)");
    }

    #[test]
    fn unrecognized_statement_returns_none() {
        assert!(reconstruct_insert("SELECT * FROM dbo.Users", &["x".to_string()]).is_none());
    }

    proptest::proptest! {
        #[test]
        fn reconstruct_insert_preserves_prefix_and_suffix(table in "[a-zA-Z_]{1,10}", val in "[a-zA-Z0-9]{1,10}") {
            let sql = format!("INSERT INTO {table} (Col) VALUES ('{val}')");
            let rebuilt = reconstruct_insert(&sql, &[val.clone()]).unwrap();
            proptest::prop_assert!(rebuilt.starts_with(&format!("INSERT INTO {table} (Col) VALUES (")));
            proptest::prop_assert!(rebuilt.ends_with(')'));
        }
    }
}
