//! Extension registry: installed extensions declare the capabilities
//! they need in a manifest, a permission sandbox enforces those
//! declarations, and an audit pass flags dangerous grants.

use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value as JsonValue;
use serde_json::json;
use tracing::warn;

use crate::error::Result;
use crate::error::ToolError;
use crate::util::now_iso;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtensionPermissions {
    /// Automation identifiers the extension may script.
    pub com_automation: Vec<String>,
    /// "read" and/or "write".
    pub file_system: Vec<String>,
    pub network: bool,
    pub shell_commands: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: ExtensionPermissions,
}

/// Runtime enforcement of a manifest's declared permissions.
pub struct ExtensionSandbox {
    permissions: ExtensionPermissions,
}

impl ExtensionSandbox {
    pub fn new(permissions: ExtensionPermissions) -> Self {
        Self { permissions }
    }

    pub fn enforce(&self, action: &str, detail: Option<&str>) -> (bool, String) {
        match action {
            "com" => {
                let target = detail.unwrap_or("");
                if self.permissions.com_automation.iter().any(|p| p == target) {
                    (true, "allowed".to_string())
                } else {
                    (
                        false,
                        format!("COM access to '{target}' not declared in manifest"),
                    )
                }
            }
            "filesystem_read" | "filesystem_write" => {
                let op = action.trim_start_matches("filesystem_");
                if self.permissions.file_system.iter().any(|p| p == op) {
                    (true, "allowed".to_string())
                } else {
                    (false, format!("Filesystem {op} not declared in manifest"))
                }
            }
            "network" => {
                if self.permissions.network {
                    (true, "allowed".to_string())
                } else {
                    (false, "Network access not declared in manifest".to_string())
                }
            }
            "shell" => {
                if self.permissions.shell_commands {
                    (true, "allowed".to_string())
                } else {
                    (
                        false,
                        "Shell command access not declared in manifest".to_string(),
                    )
                }
            }
            other => (false, format!("Unknown action type: {other}")),
        }
    }
}

pub struct ExtensionRegistry {
    path: PathBuf,
}

impl ExtensionRegistry {
    pub fn new(extensions_dir: PathBuf) -> Self {
        Self {
            path: extensions_dir.join("installed.json"),
        }
    }

    fn load(&self) -> Vec<JsonValue> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("failed to parse extension registry: {e}");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        }
    }

    fn save(&self, extensions: &[JsonValue]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(extensions)?)?;
        Ok(())
    }

    pub fn list(&self) -> Result<JsonValue> {
        let extensions = self.load();
        Ok(json!({
            "success": true,
            "extensions": extensions,
            "count": extensions.len(),
        }))
    }

    pub fn install(&self, manifest: &JsonValue) -> Result<JsonValue> {
        let manifest: ExtensionManifest = serde_json::from_value(manifest.clone())
            .map_err(|e| ToolError::invalid(format!("Invalid extension manifest: {e}")))?;
        if manifest.name.trim().is_empty() {
            return Err(ToolError::invalid("Extension name cannot be empty"));
        }

        let mut extensions = self.load();
        if extensions
            .iter()
            .any(|e| e["name"] == json!(manifest.name))
        {
            return Err(ToolError::invalid(format!(
                "Extension '{}' is already installed",
                manifest.name,
            )));
        }

        let mut record = serde_json::to_value(&manifest)?;
        record["installed"] = json!(now_iso());
        extensions.push(record);
        self.save(&extensions)?;

        Ok(json!({
            "success": true,
            "installed": manifest.name,
            "permissions": serde_json::to_value(&manifest.permissions)?,
        }))
    }

    pub fn uninstall(&self, name: &str) -> Result<JsonValue> {
        let mut extensions = self.load();
        let before = extensions.len();
        extensions.retain(|e| e["name"] != json!(name));
        if extensions.len() == before {
            return Err(ToolError::invalid(format!(
                "Extension '{name}' is not installed"
            )));
        }
        self.save(&extensions)?;
        Ok(json!({
            "success": true,
            "uninstalled": name,
            "remaining": extensions.len(),
        }))
    }

    /// Report each installed extension's grants and flag the dangerous
    /// ones (shell access, broad automation, write access + network).
    pub fn audit(&self) -> Result<JsonValue> {
        let extensions = self.load();
        let mut reports = Vec::new();
        for extension in &extensions {
            let name = extension["name"].as_str().unwrap_or("unknown");
            let permissions: ExtensionPermissions =
                serde_json::from_value(extension["permissions"].clone()).unwrap_or_default();

            let mut flags: Vec<&str> = Vec::new();
            if permissions.shell_commands {
                flags.push("shell access");
            }
            if permissions.com_automation.len() > 2 {
                flags.push("broad application automation");
            }
            if permissions.network && permissions.file_system.iter().any(|p| p == "write") {
                flags.push("network plus filesystem write");
            }

            reports.push(json!({
                "name": name,
                "permissions": extension["permissions"],
                "flags": flags,
                "risk": if flags.is_empty() { "low" } else { "review" },
            }));
        }
        Ok(json!({
            "success": true,
            "audited": reports.len(),
            "reports": reports,
        }))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry() -> (tempfile::TempDir, ExtensionRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ExtensionRegistry::new(dir.path().to_path_buf());
        (dir, registry)
    }

    fn manifest(name: &str, shell: bool) -> JsonValue {
        json!({
            "name": name,
            "version": "1.0.0",
            "description": "test extension",
            "permissions": {
                "com_automation": ["Excel.Application"],
                "file_system": ["read"],
                "network": false,
                "shell_commands": shell,
            },
        })
    }

    #[test]
    fn install_list_uninstall_round_trip() {
        let (_dir, registry) = registry();
        registry.install(&manifest("report-builder", false)).unwrap();
        assert_eq!(registry.list().unwrap()["count"], json!(1));

        let err = registry.install(&manifest("report-builder", false)).unwrap_err();
        assert!(err.message.contains("already installed"));

        registry.uninstall("report-builder").unwrap();
        assert_eq!(registry.list().unwrap()["count"], json!(0));
        assert!(registry.uninstall("report-builder").is_err());
    }

    #[test]
    fn audit_flags_shell_access() {
        let (_dir, registry) = registry();
        registry.install(&manifest("quiet", false)).unwrap();
        registry.install(&manifest("loud", true)).unwrap();

        let audit = registry.audit().unwrap();
        let reports = audit["reports"].as_array().unwrap();
        let loud = reports.iter().find(|r| r["name"] == json!("loud")).unwrap();
        assert_eq!(loud["risk"], json!("review"));
        let quiet = reports.iter().find(|r| r["name"] == json!("quiet")).unwrap();
        assert_eq!(quiet["risk"], json!("low"));
    }

    #[test]
    fn sandbox_enforces_declared_permissions() {
        let sandbox = ExtensionSandbox::new(ExtensionPermissions {
            com_automation: vec!["Excel.Application".to_string()],
            file_system: vec!["read".to_string()],
            network: false,
            shell_commands: false,
        });

        assert!(sandbox.enforce("com", Some("Excel.Application")).0);
        assert!(!sandbox.enforce("com", Some("Word.Application")).0);
        assert!(sandbox.enforce("filesystem_read", None).0);
        assert!(!sandbox.enforce("filesystem_write", None).0);
        assert!(!sandbox.enforce("network", None).0);
        assert!(!sandbox.enforce("shell", None).0);
        assert!(!sandbox.enforce("teleport", None).0);
    }

    #[test]
    fn invalid_manifest_is_rejected() {
        let (_dir, registry) = registry();
        let err = registry.install(&json!({"version": "1.0"})).unwrap_err();
        assert!(err.message.contains("Invalid extension manifest"));
    }
}
