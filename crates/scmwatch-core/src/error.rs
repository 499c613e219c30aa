//! Error taxonomy for scmwatch connectors and parsers.

/// Errors produced while detecting, retrieving or labelling source changes.
#[derive(Debug, thiserror::Error)]
pub enum ScmError {
    /// A required setting is missing or invalid. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The overall shape of a history log was not recognised.
    #[error("unrecognized {backend} history: {reason}")]
    Parse {
        backend: &'static str,
        reason: String,
        raw: String,
    },

    /// A single record inside an otherwise valid history log was malformed.
    #[error("malformed {backend} record: {reason}")]
    Record {
        backend: &'static str,
        reason: String,
        fragment: String,
    },

    #[error("failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("{command} exited with code {exit_code}: {stderr}")]
    ProcessFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A backend-specific precondition was not met.
    #[error("{backend}: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScmError {
    pub fn parse(backend: &'static str, reason: impl Into<String>, raw: impl Into<String>) -> Self {
        ScmError::Parse {
            backend,
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    pub fn record(
        backend: &'static str,
        reason: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        ScmError::Record {
            backend,
            reason: reason.into(),
            fragment: fragment.into(),
        }
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        ScmError::Backend {
            backend,
            message: message.into(),
        }
    }

    /// Whether the failure came from running an external process rather than
    /// from configuration or parsing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScmError::Launch { .. } | ScmError::Timeout { .. } | ScmError::ProcessFailed { .. }
        )
    }

    /// Raw payload attached to parse errors, for diagnosis.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            ScmError::Parse { raw, .. } => Some(raw),
            ScmError::Record { fragment, .. } => Some(fragment),
            _ => None,
        }
    }
}

/// Result type for scmwatch operations.
pub type Result<T> = std::result::Result<T, ScmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_keeps_raw_payload() {
        let err = ScmError::parse("vault", "no <vault> element", "garbage output");
        assert!(err.to_string().contains("unrecognized vault history"));
        assert_eq!(err.raw_payload(), Some("garbage output"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_process_errors_are_transient() {
        let err = ScmError::ProcessFailed {
            command: "svn log".to_string(),
            exit_code: 1,
            stderr: "connection refused".to_string(),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("connection refused"));

        let err = ScmError::Timeout {
            command: "cvs rlog".to_string(),
            timeout_secs: 600,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_config_error_display() {
        let err = ScmError::Config("cvsroot must be set".to_string());
        assert_eq!(err.to_string(), "configuration error: cvsroot must be set");
        assert!(!err.is_transient());
    }
}
