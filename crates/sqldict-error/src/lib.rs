use thiserror::Error;

/// Primary error type for SQLDict operations.
///
/// Structured variants for the error kinds a caller can act on; free-form
/// driver messages are wrapped in [`DictError::Sql`]. "Not found" is never an
/// error: lookups return `Ok(None)`, iterations simply end, and commits report
/// it through their outcome enum.
#[derive(Error, Debug, Clone)]
pub enum DictError {
    // === Key / mapping errors ===
    /// No configured map pattern matches the key.
    #[error("invalid/unmapped key: {key}")]
    UnmappedKey { key: String },

    /// The key binds more path segments than the matched pattern has fields.
    #[error("key continues past the matched pattern {pattern}")]
    KeyPastPattern { pattern: String },

    // === Value errors ===
    /// A value failed to parse as the SQL type its column declares.
    #[error("{field} field's value isn't {expected}: {value} (in pattern: {pattern})")]
    ValueType {
        field: String,
        expected: &'static str,
        value: String,
        pattern: String,
    },

    // === Driver errors ===
    /// The SQL driver reported a failure.
    #[error("sql error: {0}")]
    Sql(String),

    /// The driver acknowledged the write ambiguously; the commit may or may
    /// not have been applied.
    #[error("sql commit uncertain: {0}")]
    WriteUncertain(String),

    // === Configuration errors ===
    /// The map configuration is structurally invalid.
    #[error("invalid dict map configuration: {0}")]
    Config(String),
}

impl DictError {
    /// Create an unmapped-key error.
    pub fn unmapped(key: impl Into<String>) -> Self {
        Self::UnmappedKey { key: key.into() }
    }

    /// Create a driver error.
    pub fn sql(msg: impl Into<String>) -> Self {
        Self::Sql(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the operation could change the outcome.
    ///
    /// `WriteUncertain` is the one kind where the caller is expected to decide
    /// between retrying and escalating; everything else is deterministic.
    pub const fn is_uncertain(&self) -> bool {
        matches!(self, Self::WriteUncertain(_))
    }
}

/// Result type alias using `DictError`.
pub type Result<T> = std::result::Result<T, DictError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_unmapped() {
        let err = DictError::unmapped("shared/nope");
        assert_eq!(err.to_string(), "invalid/unmapped key: shared/nope");
    }

    #[test]
    fn error_display_value_type() {
        let err = DictError::ValueType {
            field: "quota".to_owned(),
            expected: "64bit signed integer",
            value: "abc".to_owned(),
            pattern: "shared/q/$/lim".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "quota field's value isn't 64bit signed integer: abc (in pattern: shared/q/$/lim)"
        );
    }

    #[test]
    fn error_display_key_past_pattern() {
        let err = DictError::KeyPastPattern {
            pattern: "shared/q/$/lim".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "key continues past the matched pattern shared/q/$/lim"
        );
    }

    #[test]
    fn uncertainty_classification() {
        assert!(DictError::WriteUncertain("timeout".to_owned()).is_uncertain());
        assert!(!DictError::sql("disconnected").is_uncertain());
        assert!(!DictError::unmapped("x").is_uncertain());
    }
}
