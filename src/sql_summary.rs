//! Short, human-readable synopsis of a SQL statement and its bound values.
//!
//! Best effort only: anything the patterns below do not recognize is passed
//! through unchanged.

use regex::{Captures, Regex};

use std::sync::LazyLock;

use crate::QueryParam;

/// Longest summary kept for `SELECT` and `INSERT` statements.
const MAX_SUMMARY_CHARS: usize = 101;
/// Literals and parameter values longer than this are abbreviated.
const MAX_VALUE_CHARS: usize = 20;

const TRANSACTION_STATEMENTS: [&str; 3] = ["BEGIN", "COMMIT", "ROLLBACK"];

/// Column introspection against the system catalog, keyed by class name.
static SCHEMA_LOOKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"pg_attribute a.*'"?([^'"]*)"?'::regclass"#).expect("invalid regex")
});

static OPERATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\A\s*(SELECT|UPDATE|DELETE|INSERT)").expect("invalid regex")
});

static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\b").expect("invalid regex"));

static WHERE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("invalid regex"));

/// Right-hand side of a `column = value` assignment.
static ASSIGNMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"= *('[^']*'|\$?[0-9.]*)").expect("invalid regex"));

pub fn is_schema_lookup(sql: &str) -> bool {
    SCHEMA_LOOKUP_RE.is_match(sql)
}

/// A bare `BEGIN`, `COMMIT` or `ROLLBACK`, any case, with an optional `;`.
pub fn is_transaction_control(sql: &str) -> bool {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    TRANSACTION_STATEMENTS
        .iter()
        .any(|keyword| statement.eq_ignore_ascii_case(keyword))
}

pub fn summarize(
    sql: &str,
    parameters: Option<&[QueryParam]>,
    include_size_suffix: bool,
) -> String {
    if let Some(caps) = SCHEMA_LOOKUP_RE.captures(sql) {
        return format!("SCHEMA {}", &caps[1]);
    }

    let operation = OPERATION_RE
        .captures(sql)
        .map(|caps| caps[1].to_ascii_uppercase());
    let mut summary = match operation.as_deref() {
        Some("SELECT") => truncate(prefix_before(sql, &FROM_RE), MAX_SUMMARY_CHARS),
        Some("INSERT") => truncate(
            sql.split('(').next().unwrap_or_default(),
            MAX_SUMMARY_CHARS,
        ),
        Some("UPDATE") => abbreviate_assignments(prefix_before(sql, &WHERE_RE)),
        // DELETE, transaction control and anything unrecognized.
        _ => sql.to_string(),
    };

    if let Some(params) = parameters {
        summary.push(' ');
        summary.push_str(&format!("{:?}", display_values(params)));
    }
    if include_size_suffix {
        summary.push_str(&format!(" -- [{}]", statement_size(sql, parameters)));
    }
    summary
}

/// Rough cost of a statement: its length plus the printed length of every
/// bound value.
pub fn statement_size(sql: &str, parameters: Option<&[QueryParam]>) -> usize {
    let values: usize = parameters
        .unwrap_or_default()
        .iter()
        .map(|(_, value)| inspect(value).chars().count())
        .sum();
    sql.chars().count() + values
}

fn prefix_before<'a>(sql: &'a str, keyword: &Regex) -> &'a str {
    keyword.find(sql).map_or(sql, |m| &sql[..m.start()])
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn abbreviate_assignments(segment: &str) -> String {
    ASSIGNMENT_RE
        .replace_all(segment, |caps: &Captures<'_>| {
            let literal = &caps[1];
            let len = literal.chars().count();
            if len > MAX_VALUE_CHARS {
                format!("= .{{{len}}}")
            } else {
                format!("= {}", literal.split('\n').next().unwrap_or_default())
            }
        })
        .into_owned()
}

/// Bound values as shown in a summary: single character boolean flags spelled
/// out, nulls named, long values cut short with their original length.
fn display_values(params: &[QueryParam]) -> Vec<String> {
    params
        .iter()
        .map(|(_, value)| {
            let text = match value {
                serde_json::Value::String(s) if s == "t" => "true".to_string(),
                serde_json::Value::String(s) if s == "f" => "false".to_string(),
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "null".to_string(),
                other => other.to_string(),
            };
            let len = text.chars().count();
            if len > MAX_VALUE_CHARS {
                let head: String = text.chars().take(MAX_VALUE_CHARS + 1).collect();
                format!("{head}...[{len}]")
            } else {
                text
            }
        })
        .collect()
}

fn inspect(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("{s:?}"),
        serde_json::Value::Null => "nil".to_string(),
        other => other.to_string(),
    }
}
