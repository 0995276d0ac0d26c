//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // Status/info parsing errors (TFLOW-010 to TFLOW-019)
    // ─────────────────────────────────────────────────────────────

    #[error("TFLOW-010: Unknown status code '{code}' for node '{name}'")]
    UnknownStatusCode { code: String, name: String },

    #[error("TFLOW-011: The output's suite name does not match: {found} vs {expected}")]
    SuiteMismatch { found: String, expected: String },

    #[error("TFLOW-012: Cannot work with such a status tree (entry '{entry}')")]
    TreeTooDeep { entry: String },

    #[error("TFLOW-013: Malformed status output at line {line}: {details}")]
    StatusParse { line: usize, details: String },

    // ─────────────────────────────────────────────────────────────
    // Session errors (TFLOW-020 to TFLOW-029)
    // ─────────────────────────────────────────────────────────────

    #[error("TFLOW-020: Unable to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TFLOW-021: Login failed for {user}@{host}: {details}")]
    Login {
        user: String,
        host: String,
        details: String,
    },

    #[error("TFLOW-022: Suite '{suite}' is unknown to the server (known: {known})")]
    UnknownSuite { suite: String, known: String },

    #[error("TFLOW-023: The scheduler client died (exit code {code:?})")]
    SessionDead { code: Option<i32> },

    #[error("TFLOW-024: The scheduler reported an error: {line}")]
    Protocol { line: String, output: String },

    #[error("TFLOW-025: No response from the scheduler client within {seconds}s")]
    Timeout { seconds: u64 },

    // ─────────────────────────────────────────────────────────────
    // Credentials errors (TFLOW-030 to TFLOW-039)
    // ─────────────────────────────────────────────────────────────

    #[error("TFLOW-030: {path} file not found")]
    RcFileNotFound { path: String },

    #[error("TFLOW-031: {path} must be a regular file with permission 0o600")]
    RcPermissions { path: String },

    #[error("TFLOW-032: No credentials found for host={host} and user={user}")]
    NoCredentials { host: String, user: String },

    #[error("TFLOW-033: Credentials must be set before talking to the scheduler")]
    CredentialsNotSet,

    #[error("TFLOW-034: Improper credentials were provided: {details}")]
    InvalidCredentials { details: String },

    // ─────────────────────────────────────────────────────────────
    // Usage errors (TFLOW-040 to TFLOW-049)
    // ─────────────────────────────────────────────────────────────

    #[error("TFLOW-040: suite={suite} does not exist or is empty")]
    EmptySuite { suite: String },

    #[error("TFLOW-041: The path base node '{path}' is not in the tree roots list")]
    UnknownRoot { path: String },

    #[error("TFLOW-042: The '{name}' information is not editable")]
    NotEditable { name: String },

    #[error("TFLOW-043: Saving '{kind}/{name}' information is not implemented")]
    UnsupportedInfoKind { kind: String, name: String },

    #[error("TFLOW-044: Editable information '{name}' needs an initial value")]
    MissingInitialValue { name: String },

    #[error("TFLOW-045: Unknown command '{name}'")]
    UnknownCommand { name: String },

    // ─────────────────────────────────────────────────────────────
    // Logs gateway errors (TFLOW-050 to TFLOW-059)
    // ─────────────────────────────────────────────────────────────

    #[error("TFLOW-050: Log server {host}:{port} failed: {details}")]
    LogServer {
        host: String,
        port: u16,
        details: String,
    },

    #[error("TFLOW-051: No log gateway is available for kind '{kind}'")]
    UnknownLogsGateway { kind: String },
}

impl TflowError {
    /// Session-level failures after which the session must be discarded.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            TflowError::Io(_)
                | TflowError::Spawn { .. }
                | TflowError::Login { .. }
                | TflowError::UnknownSuite { .. }
                | TflowError::SessionDead { .. }
                | TflowError::Timeout { .. }
        )
    }
}

impl FixSuggestion for TflowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TflowError::Io(_) => Some("Check file path and permissions"),
            TflowError::Config(_) => Some("Check the YAML syntax of ~/.tflowclient.yaml"),

            TflowError::UnknownStatusCode { .. } => {
                Some("The scheduler client may be newer than this tool: report the status code")
            }
            TflowError::SuiteMismatch { .. } => Some("Check the --suite argument"),
            TflowError::TreeTooDeep { .. } => {
                Some("Only /suite or /suite/root status requests can be parsed")
            }
            TflowError::StatusParse { .. } => {
                Some("Retry the refresh: the scheduler output was truncated or garbled")
            }

            TflowError::Spawn { .. } => Some("Check the --cdp path (or cdp.path in the configuration)"),
            TflowError::Login { .. } => Some("Check the server name and the password stored in ~/.smsrc"),
            TflowError::UnknownSuite { .. } => Some("Pick one of the suites known to the server"),
            TflowError::SessionDead { .. } => Some("Retry: a new session will be started"),
            TflowError::Protocol { .. } => Some("Check that the targeted nodes exist"),
            TflowError::Timeout { .. } => {
                Some("The server is slow or unreachable: retry or raise session.exchange_timeout_secs")
            }

            TflowError::RcFileNotFound { .. } => Some("Create ~/.smsrc with lines: host user password"),
            TflowError::RcPermissions { .. } => Some("Run: chmod 600 ~/.smsrc"),
            TflowError::NoCredentials { .. } => {
                Some("Add a 'host user password' line for this server to ~/.smsrc")
            }
            TflowError::CredentialsNotSet => Some("Set credentials on the flow interface first"),
            TflowError::InvalidCredentials { .. } => {
                Some("Provide cdp_path, host, user and password")
            }

            TflowError::EmptySuite { .. } => Some("Check that the suite is loaded on the server"),
            TflowError::UnknownRoot { .. } => Some("Use one of the names listed by 'tflow roots'"),
            TflowError::NotEditable { .. } => None,
            TflowError::UnsupportedInfoKind { .. } => None,
            TflowError::MissingInitialValue { .. } => None,
            TflowError::UnknownCommand { .. } => {
                Some("Use one of: rerun, execute, suspend, resume, complete, requeue, cancel")
            }

            TflowError::LogServer { .. } => Some("Check SMSLOGHOST/SMSLOGPORT on the server"),
            TflowError::UnknownLogsGateway { .. } => Some("Use 'demo' or 'sms_log_svr'"),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, TflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_in_messages() {
        let err = TflowError::UnknownRoot { path: "A999".into() };
        assert!(err.to_string().starts_with("TFLOW-041"));
        assert!(err.to_string().contains("A999"));
    }

    #[test]
    fn test_fatal_to_session_classification() {
        assert!(TflowError::SessionDead { code: Some(1) }.is_fatal_to_session());
        assert!(TflowError::Timeout { seconds: 3 }.is_fatal_to_session());
        assert!(!TflowError::Protocol {
            line: "# ERR: no such node".into(),
            output: String::new(),
        }
        .is_fatal_to_session());
        assert!(!TflowError::UnknownRoot { path: "x".into() }.is_fatal_to_session());
    }

    #[test]
    fn test_permissions_suggestion() {
        let err = TflowError::RcPermissions { path: "/tmp/x".into() };
        assert_eq!(err.fix_suggestion(), Some("Run: chmod 600 ~/.smsrc"));
    }
}
