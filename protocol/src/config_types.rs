use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

/// How aggressively the safety engine requires user confirmation. The
/// default is the most restrictive mode that still allows automation.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConfirmationMode {
    /// Every action is surfaced for confirmation.
    #[default]
    All,
    /// Only actions in the sensitive set are surfaced.
    Sensitive,
    /// No confirmation; the gate still applies blocklists and rate limits.
    Autonomous,
    /// Reject everything except kill-switch management.
    Block,
}

/// Classification attached to every audit record and safety rejection.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResultClass {
    Success,
    Confirmed,
    Blocked,
    Killed,
    Denied,
}

/// Shell used for `run_command` and scheduled tasks.
#[derive(Debug, Serialize, Deserialize, Default, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShellKind {
    #[default]
    Powershell,
    Cmd,
    Sh,
}

impl ShellKind {
    /// Argv prefix that runs a single command string under this shell.
    pub fn argv(&self, command: &str) -> Vec<String> {
        match self {
            ShellKind::Powershell => vec![
                "powershell".to_string(),
                "-NoProfile".to_string(),
                "-Command".to_string(),
                command.to_string(),
            ],
            ShellKind::Cmd => vec!["cmd".to_string(), "/c".to_string(), command.to_string()],
            ShellKind::Sh => vec!["sh".to_string(), "-c".to_string(), command.to_string()],
        }
    }
}
