//! Public types consumed by the editor surface.
//!
//! The editor constructs a [`ClientConfig`], drives the
//! [`ProtocolClient`](crate::ProtocolClient), and receives [`Diagnostic`]s
//! through its registered observer.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-request timeout.
///
/// The wire protocol itself imposes none; without one a lost response would
/// leave the pending table growing forever.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for one protocol-client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project root; becomes the `rootUri` of the initialize handshake and
    /// the working directory the bridge gives the language server.
    pub project_root: PathBuf,
    /// Timeout applied to every request, including `initialize`.
    pub request_timeout: Duration,
    /// Whether the language server survives `completionItem/resolve`.
    ///
    /// The Arduino language server faults on it, so the default is off and
    /// [`ProtocolClient::resolve_completion_item`](crate::ProtocolClient::resolve_completion_item)
    /// returns its input unchanged.
    pub supports_completion_resolve: bool,
}

impl ClientConfig {
    #[must_use]
    pub fn new(project_root: PathBuf) -> Self {
        Self {
            project_root,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            supports_completion_resolve: false,
        }
    }
}

/// Errors surfaced by the protocol client.
///
/// Feature queries never return these — they degrade to `None` at the call
/// site. Only session-level operations (`initialize`, document notifications)
/// propagate them.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport could not be opened: {0}")]
    TransportOpen(String),
    #[error("client is not initialized")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("language server error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("serializing JSON-RPC message")]
    Serialize(#[from] serde_json::Error),
}

/// Zero-based line/character position, as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open text range between two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from the wire's numeric severity (1=Error .. 4=Hint).
    ///
    /// Returns `None` for values outside the defined range; boundary code
    /// decides the fallback.
    #[must_use]
    pub fn from_wire(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by the language server for one document.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    range: Range,
    message: String,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        range: Range,
        message: String,
        source: String,
    ) -> Self {
        Self {
            severity,
            range,
            message,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn range(&self) -> Range {
        self.range
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Source of the diagnostic (e.g. "clangd").
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `uri:line:col: severity: message` (1-indexed for display).
    #[must_use]
    pub fn display_with_uri(&self, uri: &str) -> String {
        format!(
            "{uri}:{}:{}: {}: {}",
            self.range.start.line + 1,
            self.range.start.character + 1,
            self.severity.label(),
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_known_values() {
        assert_eq!(
            DiagnosticSeverity::from_wire(1),
            Some(DiagnosticSeverity::Error)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(2),
            Some(DiagnosticSeverity::Warning)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(3),
            Some(DiagnosticSeverity::Information)
        );
        assert_eq!(
            DiagnosticSeverity::from_wire(4),
            Some(DiagnosticSeverity::Hint)
        );
    }

    #[test]
    fn test_from_wire_unknown_returns_none() {
        assert_eq!(DiagnosticSeverity::from_wire(0), None);
        assert_eq!(DiagnosticSeverity::from_wire(9), None);
    }

    #[test]
    fn test_display_with_uri() {
        let diag = Diagnostic::new(
            DiagnosticSeverity::Error,
            Range {
                start: Position {
                    line: 2,
                    character: 4,
                },
                end: Position {
                    line: 2,
                    character: 9,
                },
            },
            "expected `;`".to_string(),
            "clangd".to_string(),
        );
        assert_eq!(
            diag.display_with_uri("file://./sketch.ino"),
            "file://./sketch.ino:3:5: error: expected `;`"
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::new(PathBuf::from("/projects/blink"));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(!config.supports_completion_resolve);
    }
}
