use std::io;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolError>;

/// Failures surfaced by the desktop backend.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The host has no usable desktop automation backend (non-Windows
    /// builds, or a headless session).
    #[error("desktop automation backend unavailable: {0}")]
    Unavailable(String),

    #[error("window not found")]
    WindowNotFound,

    /// The element handle refers to a widget that no longer exists.
    #[error("element no longer exists")]
    StaleElement,

    /// The element does not expose the requested accessibility pattern.
    #[error("pattern not supported: {0}")]
    PatternNotSupported(String),

    #[error("{0}")]
    Os(String),
}

/// Classification carried by every structured tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Unknown tool, missing or invalid parameter, script failing static
    /// validation.
    InvalidInput,
    /// Subprocess failure, HTTP status, socket loss, OS API denial,
    /// missing external dependency.
    External,
    /// A wall-clock cap fired.
    Timeout,
    /// Uncaught fault inside a tool body.
    Internal,
}

/// Structured failure returned by tool bodies. Never escapes the
/// dispatcher as a panic or a raw error; it is rendered into the
/// `{error, hint?}` result shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub hint: Option<String>,
    pub install_options: Option<Vec<String>>,
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::InvalidInput,
            message: message.into(),
            hint: None,
            install_options: None,
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::External,
            message: message.into(),
            hint: None,
            install_options: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ToolErrorKind::Internal,
            message: message.into(),
            hint: None,
            install_options: None,
        }
    }

    pub fn timeout(what: impl Into<String>, limit: Duration) -> Self {
        Self {
            kind: ToolErrorKind::Timeout,
            message: format!("{} timed out after {}s", what.into(), limit.as_secs()),
            hint: Some("Widen the timeout or simplify the request.".to_string()),
            install_options: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_install_options(mut self, options: Vec<String>) -> Self {
        self.install_options = Some(options);
        self
    }

    /// Render into the wire-level result object.
    pub fn to_value(&self) -> JsonValue {
        let mut obj = json!({ "error": self.message });
        if let Some(hint) = &self.hint {
            obj["hint"] = json!(hint);
        }
        if let Some(options) = &self.install_options {
            obj["install_options"] = json!(options);
        }
        obj
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ToolError {}

impl From<PlatformError> for ToolError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Unavailable(_) => ToolError::external(err.to_string())
                .with_hint("This tool requires a Windows desktop session.".to_string()),
            other => ToolError::external(other.to_string()),
        }
    }
}

impl From<io::Error> for ToolError {
    fn from(err: io::Error) -> Self {
        ToolError::external(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::internal(format!("serialization failed: {err}"))
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(err: reqwest::Error) -> Self {
        ToolError::external(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ToolError {
    fn from(err: tokio::task::JoinError) -> Self {
        ToolError::internal(format!("worker task failed: {err}"))
    }
}
