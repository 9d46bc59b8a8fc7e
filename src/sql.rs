//! SQL text helpers.
//!
//! Every statement this crate executes is rendered to a complete string
//! before execution so it can be logged for audit and replayed in tests.
//! Identifiers are validated against the identifier pattern at configuration
//! time and double-quoted here; literals are escaped with standard quote
//! doubling.

use serde_json::Value;

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a JSON value as a SQL literal.
///
/// Strings are single-quoted with quote doubling; arrays and objects are
/// rendered as JSON text literals so they can target json/jsonb columns.
pub fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_str(s),
        Value::Array(_) | Value::Object(_) => quote_str(&value.to_string()),
    }
}

/// Render a string as a SQL literal.
pub fn literal_str(s: &str) -> String {
    quote_str(s)
}

fn quote_str(s: &str) -> String {
    // E'' form when a backslash is present so the text round-trips under
    // any standard_conforming_strings setting.
    let escaped = s.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{}'", escaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_literal_scalars() {
        assert_eq!(literal(&json!(null)), "NULL");
        assert_eq!(literal(&json!(true)), "true");
        assert_eq!(literal(&json!(42)), "42");
        assert_eq!(literal(&json!(1.5)), "1.5");
        assert_eq!(literal(&json!("plain")), "'plain'");
    }

    #[test]
    fn test_literal_escapes_quotes() {
        assert_eq!(literal(&json!("it's")), "'it''s'");
        assert_eq!(literal(&json!("a\\b")), "E'a\\\\b'");
    }

    #[test]
    fn test_literal_json_compound() {
        assert_eq!(literal(&json!([1, 2])), "'[1,2]'");
        assert_eq!(literal(&json!({"k": "v"})), "'{\"k\":\"v\"}'");
    }
}
