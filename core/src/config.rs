//! Policy snapshot loaded at startup and persisted on change.
//!
//! Defaults are the most restrictive valid combination: confirmation on
//! every action, kill switch armed, and broad deny-lists for financial
//! and security software and destructive shell commands.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use deskpilot_protocol::ConfirmationMode;

const CONFIG_FILE: &str = "config.json";

/// Resolve the per-user configuration directory (`~/.deskpilot`).
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deskpilot")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    pub confirmation_mode: ConfirmationMode,

    pub kill_switch_enabled: bool,
    pub kill_switch_hotkey: String,

    /// Case-insensitive substrings; any match in a window/app/process
    /// parameter blocks the action.
    pub blocked_apps: Vec<String>,

    /// Case-insensitive substrings matched against `command` parameters.
    pub blocked_commands: Vec<String>,

    pub max_actions_per_minute: u32,

    /// Named regexes applied by the output redactor.
    pub sensitive_patterns: BTreeMap<String, String>,

    pub log_retention_days: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            confirmation_mode: ConfirmationMode::All,
            kill_switch_enabled: true,
            kill_switch_hotkey: "ctrl+shift+escape".to_string(),
            blocked_apps: [
                // Banking & finance
                "chase",
                "bankofamerica",
                "wellsfargo",
                "citi",
                "capital one",
                "paypal",
                "venmo",
                "zelle",
                "cashapp",
                "coinbase",
                "robinhood",
                // Password managers
                "1password",
                "lastpass",
                "bitwarden",
                "keepass",
                "dashlane",
                // Security & auth
                "authenticator",
                "authy",
                "yubikey",
                // System security
                "windows security",
                "defender",
                "firewall",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            blocked_commands: [
                "format",
                "del /f",
                "del /s",
                "rmdir /s",
                "rm -rf",
                "shutdown",
                "restart",
                "reg delete",
                "bcdedit",
                "cipher /w",
                "diskpart",
                "sfc",
                "dism",
                "net user",
                "net localgroup",
                "netsh",
                "powershell -encodedcommand",
                "powershell -enc",
                "invoke-webrequest",
                "invoke-restmethod",
                "set-executionpolicy",
                "new-service",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            max_actions_per_minute: 30,
            sensitive_patterns: [
                (
                    "credit_card",
                    r"\b\d{4}[\s\-]?\d{4}[\s\-]?\d{4}[\s\-]?\d{4}\b",
                ),
                ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
                (
                    "email",
                    r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
                ),
                (
                    "phone_us",
                    r"\b(\+1[\s\-]?)?\(?\d{3}\)?[\s\-]?\d{3}[\s\-]?\d{4}\b",
                ),
                (
                    "password_field",
                    r"(?i)(password|passwd|pwd|secret|token|api[_\-]?key)",
                ),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
            log_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutomationConfig {
    /// JPEG quality for captures.
    pub screenshot_quality: u8,

    /// Timeout for UI operations, in seconds.
    pub ui_timeout: f64,

    /// Try accessibility-pattern methods before input synthesis.
    pub prefer_silent_methods: bool,

    /// Auto-redirect opened/moved windows to the agent monitor.
    pub agent_screen_only: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            screenshot_quality: 85,
            ui_timeout: 10.0,
            prefer_silent_methods: true,
            agent_screen_only: true,
        }
    }
}

/// Root configuration. Telemetry is not a field: the engine never emits
/// any, so there is nothing to persist or toggle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub security: SecurityConfig,
    pub automation: AutomationConfig,

    /// Default language for speech tools and user-facing messages:
    /// "en" | "es" | "auto". Tool calls may override it per request.
    pub language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            security: SecurityConfig::default(),
            automation: AutomationConfig::default(),
            language: "auto".to_string(),
        }
    }
}

impl Config {
    /// Load from `dir/config.json`, writing defaults when the file is
    /// missing or unreadable. A corrupted config is replaced, never fatal.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            let config = Self::default();
            if let Err(e) = config.save(dir) {
                warn!("failed to write default config: {e}");
            }
            return config;
        }

        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<Config>(&raw).map_err(|e| e.to_string()))
        {
            Ok(config) => config,
            Err(e) => {
                warn!("config at {} is unreadable ({e}); restoring defaults", path.display());
                let config = Self::default();
                if let Err(e) = config.save(dir) {
                    warn!("failed to restore default config: {e}");
                }
                config
            }
        }
    }

    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        std::fs::write(dir.join(CONFIG_FILE), raw)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_is_most_restrictive() {
        let config = Config::default();
        assert_eq!(config.security.confirmation_mode, ConfirmationMode::All);
        assert!(config.security.kill_switch_enabled);
        assert!(config.security.blocked_apps.len() >= 15);
        assert!(config.security.blocked_commands.len() >= 15);
        assert!(config.security.max_actions_per_minute > 0);
        assert_eq!(config.language, "auto");
    }

    #[test]
    fn load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.json").exists());
    }

    #[test]
    fn corrupted_config_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{not json").unwrap();
        let config = Config::load(dir.path());
        assert_eq!(config, Config::default());
        // The file was repaired on disk.
        let reloaded = Config::load(dir.path());
        assert_eq!(reloaded, config);
    }

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.security.max_actions_per_minute = 5;
        config.automation.agent_screen_only = false;
        config.save(dir.path()).unwrap();
        assert_eq!(Config::load(dir.path()), config);
    }
}
