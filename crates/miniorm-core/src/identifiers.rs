//! SQL identifier validation and quoting.
//!
//! Every table, column and alias name that reaches generated SQL passes
//! through [`quote_ident`]. Names are checked against a strict allow-list
//! (`^[A-Za-z_][A-Za-z0-9_#]*$`) before being double-quoted, so a name
//! that would need escaping is rejected instead of escaped.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::IdentifierError;

/// Allow-list for identifiers. `#` is permitted for generated column aliases
/// such as `owners#name`.
pub const IDENTIFIER_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_#]*$";

fn identifier_regex() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(IDENTIFIER_PATTERN).ok()).as_ref()
}

/// Check a name against the identifier allow-list.
pub fn is_safe_identifier(name: &str) -> bool {
    identifier_regex().is_some_and(|re| re.is_match(name))
}

/// Validate a name, returning it unchanged when it is safe.
pub fn validate_identifier(name: &str) -> Result<&str, IdentifierError> {
    if is_safe_identifier(name) {
        Ok(name)
    } else {
        tracing::warn!(identifier = name, "Rejected unsafe SQL identifier");
        Err(IdentifierError {
            identifier: name.to_string(),
        })
    }
}

/// Validate and double-quote an identifier.
///
/// ```
/// use miniorm_core::quote_ident;
///
/// assert_eq!(quote_ident("owners").unwrap(), "\"owners\"");
/// assert!(quote_ident("owners; DROP TABLE pets").is_err());
/// ```
pub fn quote_ident(name: &str) -> Result<String, IdentifierError> {
    validate_identifier(name).map(|n| format!("\"{}\"", n))
}

/// Quote a `table.column` reference.
pub fn quote_qualified(table: &str, column: &str) -> Result<String, IdentifierError> {
    Ok(format!("{}.{}", quote_ident(table)?, quote_ident(column)?))
}

/// Alias under which a selected column is returned: `table#column`.
pub fn column_alias(table: &str, column: &str) -> String {
    format!("{}#{}", table, column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_simple() {
        assert_eq!(quote_ident("users").unwrap(), "\"users\"");
        assert_eq!(quote_ident("_private").unwrap(), "\"_private\"");
        assert_eq!(quote_ident("owners#name").unwrap(), "\"owners#name\"");
    }

    #[test]
    fn test_quote_ident_sql_keyword() {
        assert_eq!(quote_ident("select").unwrap(), "\"select\"");
    }

    #[test]
    fn test_rejects_semicolon() {
        let err = quote_ident("a;b").unwrap_err();
        assert_eq!(err.identifier, "a;b");
    }

    #[test]
    fn test_rejects_injection_attempt() {
        assert!(quote_ident("users\"; DROP TABLE secrets; --").is_err());
    }

    #[test]
    fn test_rejects_leading_digit_and_empty() {
        assert!(quote_ident("123table").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("#alias").is_err());
    }

    #[test]
    fn test_rejects_spaces_quotes_and_unicode() {
        assert!(!is_safe_identifier("first name"));
        assert!(!is_safe_identifier("user\"name"));
        assert!(!is_safe_identifier("naïve"));
        assert!(!is_safe_identifier("a\nb"));
    }

    #[test]
    fn test_quote_qualified() {
        assert_eq!(
            quote_qualified("pets", "owner_id").unwrap(),
            "\"pets\".\"owner_id\""
        );
        assert!(quote_qualified("pets", "x y").is_err());
    }

    #[test]
    fn test_column_alias() {
        assert_eq!(column_alias("owners", "name"), "owners#name");
        assert!(is_safe_identifier(&column_alias("owners", "name")));
    }
}
