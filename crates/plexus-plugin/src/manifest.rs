//! Plugin manifests.
//!
//! Each plugin directory carries a `manifest.json` describing the plugin's
//! identity and what it may touch. Unknown fields are ignored so manifests
//! can carry extra metadata for other tooling.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use plexus_core::error::AppError;
use plexus_core::result::AppResult;
use plexus_core::types::namespace::validate_dotted;

/// Identity and capabilities of a plugin, read from its manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PluginManifest {
    /// Dotted plugin name, e.g. `ns.billing.recon`.
    #[validate(length(min = 1, max = 200), custom(function = "validate_plugin_name"))]
    pub name: String,
    /// Plugin version string.
    #[validate(length(min = 1, max = 64))]
    pub version: String,
    /// Static enablement, overridden by runtime feature flags.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Named abilities the plugin may exercise.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Services the plugin is allowed to pull from the service registry.
    #[serde(default)]
    pub required_services: Vec<String>,
    /// Plugin-defined configuration, handed back through the hook API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}

impl PluginManifest {
    /// Parse and validate a manifest from JSON text.
    pub fn from_json(raw: &str) -> AppResult<Self> {
        let manifest: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::validation(format!("Malformed plugin manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read a manifest file, checking it declares the expected plugin name.
    pub async fn read(path: &Path, expected_name: &str) -> AppResult<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AppError::not_found(format!(
                    "No manifest for plugin '{expected_name}' at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = Self::from_json(&raw)?;
        if manifest.name != expected_name {
            return Err(AppError::validation(format!(
                "Manifest at {} declares '{}' but its directory is '{expected_name}'",
                path.display(),
                manifest.name
            )));
        }
        Ok(manifest)
    }

    /// Whether the manifest allows pulling `service` from the registry.
    pub fn allows_service(&self, service: &str) -> bool {
        self.required_services.iter().any(|s| s == service)
    }

    /// Whether the manifest declares `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

fn validate_plugin_name(name: &str) -> Result<(), ValidationError> {
    validate_dotted(name).map_err(|reason| {
        let mut err = ValidationError::new("plugin_name");
        err.message = Some(reason.into());
        err
    })
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::error::ErrorKind;

    #[test]
    fn test_minimal_manifest_gets_defaults() {
        let manifest =
            PluginManifest::from_json(r#"{"name": "ns.billing.recon", "version": "1.0.0"}"#)
                .unwrap();
        assert!(manifest.enabled);
        assert!(manifest.capabilities.is_empty());
        assert!(manifest.required_services.is_empty());
        assert!(manifest.config_schema.is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let manifest = PluginManifest::from_json(
            r#"{
                "name": "ns.billing.recon",
                "version": "1.0.0",
                "required_services": ["ledger"],
                "config_schema": {"cutoff_hour": 2},
                "maintainer": "billing-team"
            }"#,
        )
        .unwrap();
        assert!(manifest.allows_service("ledger"));
        assert!(!manifest.allows_service("unrelated"));
        assert_eq!(manifest.config_schema, Some(serde_json::json!({"cutoff_hour": 2})));
    }

    #[test]
    fn test_missing_version_is_validation_error() {
        let err = PluginManifest::from_json(r#"{"name": "ns.billing.recon"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_malformed_name_is_validation_error() {
        let err = PluginManifest::from_json(r#"{"name": "ns..Recon", "version": "1"}"#)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = PluginManifest::from_json(r#"{"name": "ns.billing", "version": ""}"#)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_read_rejects_name_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, r#"{"name": "ns.billing.other", "version": "1"}"#)
            .await
            .unwrap();

        let err = PluginManifest::read(&path, "ns.billing.recon").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("ns.billing.other"));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = PluginManifest::read(&dir.path().join("manifest.json"), "ns.a.b")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
