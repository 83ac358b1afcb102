//! Errors raised while loading or querying a worker configuration.

use std::path::PathBuf;

/// Failures of the configuration layer (parsing, macro resolution, lookups).
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Error in config file '{}' line {line_no}: lines must either be empty, comments starting with '#' or of the form key=value (got '{line}')",
        path.display()
    )]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("Macro $({key}) refers to key '{key}' which is not defined (nor is it pre-defined)")]
    MissingKey { key: String },

    #[error("Macro $(...) was not closed in configuration value: {value}")]
    MalformedMacro { value: String },

    #[error("Macro expansion exceeded {limit} substitutions, check for keys that reference each other: {value}")]
    MacroExpansionLimit { value: String, limit: usize },

    #[error("Key '{0}' not found in configuration (nor is it pre-defined)")]
    KeyNotFound(String),

    #[error("Invalid class identifier '{value}': {reason}")]
    InvalidClassId { value: String, reason: String },

    #[error("config cache lock poisoned")]
    LockPoisoned,
}

impl ConfigError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "CONFIG_IO_ERROR",
            Self::MalformedLine { .. } => "MALFORMED_LINE",
            Self::MissingKey { .. } => "MISSING_KEY",
            Self::MalformedMacro { .. } => "MALFORMED_MACRO",
            Self::MacroExpansionLimit { .. } => "MACRO_EXPANSION_LIMIT",
            Self::KeyNotFound(_) => "KEY_NOT_FOUND",
            Self::InvalidClassId { .. } => "INVALID_CLASS_ID",
            Self::LockPoisoned => "LOCK_POISONED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = ConfigError::MalformedLine {
            path: PathBuf::from("/etc/worker.cfg"),
            line_no: 3,
            line: "garbage".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/worker.cfg"));
        assert!(msg.contains("line 3"));
        assert!(msg.contains("garbage"));
        assert_eq!(err.error_code(), "MALFORMED_LINE");

        let err = ConfigError::KeyNotFound("CLSID".into());
        assert!(err.to_string().contains("'CLSID'"));
    }
}
