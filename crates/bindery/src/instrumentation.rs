//! Statement rendering for log events.
//!
//! Dispatch events carry the statement text under `db.statement` and its
//! leading keyword under `db.operation`, following the OpenTelemetry
//! database conventions. Literal values are replaced before the text is
//! logged so that data does not leak into logs.

/// Span names.
pub mod span_names {
    /// Acquiring a connection.
    pub const ACQUIRE: &str = "bindery.acquire";
    /// Running a statement through the executor.
    pub const QUERY: &str = "bindery.query";
    /// Opening a server-side cursor.
    pub const CURSOR: &str = "bindery.cursor";
    /// Beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "bindery.begin_transaction";
    /// Committing a transaction.
    pub const COMMIT: &str = "bindery.commit";
    /// Rolling back a transaction.
    pub const ROLLBACK: &str = "bindery.rollback";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that logs statements verbatim.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Render a statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate(sql, self.max_length);
        }
        truncate(&replace_literals(sql, &self.placeholder), self.max_length)
    }
}

/// Replace quoted strings and numeric literals with `placeholder`.
///
/// Parameter markers (`$1`, `@p1`, `:name`) are kept since they carry no
/// data.
fn replace_literals(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                if chars.peek() == Some(&q) {
                    chars.next();
                    continue;
                }
                quote = None;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' {
            quote = Some(c);
            continue;
        }

        let in_word = result.ends_with(|ch: char| ch.is_alphanumeric() || matches!(ch, '_' | '$' | '@'));
        if c.is_ascii_digit() && !in_word {
            while chars.peek().is_some_and(|ch| ch.is_ascii_digit() || *ch == '.') {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if quote.is_some() {
        result.push_str(placeholder);
    }

    result
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Leading keyword of a statement, upper-cased, or `OTHER`.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    const KEYWORDS: &[&str] = &[
        "SELECT", "INSERT", "UPDATE", "DELETE", "WITH", "BEGIN", "START", "COMMIT", "ROLLBACK",
        "CREATE", "ALTER", "DROP", "DECLARE", "FETCH", "MOVE", "CLOSE",
    ];
    let head = sql.trim_start();
    KEYWORDS
        .iter()
        .find(|keyword| {
            head.len() >= keyword.len()
                && head.is_char_boundary(keyword.len())
                && head[..keyword.len()].eq_ignore_ascii_case(keyword)
        })
        .copied()
        .unwrap_or("OTHER")
}
