// ABOUTME: Identifier validation, quoting, and value rendering helpers
// ABOUTME: Guards every name that is interpolated into SQL or shell text

use crate::error::{ReplicatorError, Result};

/// Maximum identifier length PostgreSQL accepts without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name against the allow-list
/// `^[A-Za-z_][A-Za-z0-9_]*$`.
///
/// Names discovered from a source database are untrusted: this check is the
/// only thing standing between them and DDL/DML text, so every name must
/// pass it before being quoted with [`quote_ident`].
///
/// # Examples
///
/// ```
/// # use device_replicator::utils::validate_identifier;
/// assert!(validate_identifier("dwjKey").is_ok());
/// assert!(validate_identifier("_private").is_ok());
/// assert!(validate_identifier("9lives").is_err());
/// assert!(validate_identifier("name\"; DROP TABLE jobs; --").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(ReplicatorError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ReplicatorError::InvalidIdentifier(format!(
            "'{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LEN,
            identifier.len()
        )));
    }

    for (i, c) in identifier.chars().enumerate() {
        let allowed = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };
        if !allowed {
            return Err(ReplicatorError::InvalidIdentifier(format!(
                "'{}' contains invalid character '{}' at position {}; \
                 only letters, digits, and underscores are allowed",
                sanitize_identifier(identifier),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }

    Ok(())
}

/// Strip control characters and cap length so a hostile name can't forge
/// log lines. Display only.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Wrap an already-validated identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a string for a POSIX shell (used for paths handed to `adb shell`).
///
/// ```
/// # use device_replicator::utils::shell_quote;
/// assert_eq!(shell_quote("/sdcard/db.db"), "'/sdcard/db.db'");
/// assert_eq!(shell_quote("it's"), "'it'\\''s'");
/// ```
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Render a SQLite value as the text stored in the destination and compared
/// between snapshots.
///
/// REAL uses `Debug` formatting so `5.0` keeps its fractional part and never
/// collides with INTEGER `5`. BLOBs become standard base64. TEXT holding
/// bytes that are not UTF-8 is decoded lossily.
pub fn render_value(value: rusqlite::types::ValueRef<'_>) -> Option<String> {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(format!("{:?}", f)),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
    }
}
