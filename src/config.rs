use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, layered from defaults, an optional
/// `registry.toml`, and `MODULE_REGISTRY_*` environment overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    pub auth: AuthSection,
    pub storage: StorageSection,
    pub registration: RegistrationSection,
    pub observability: ObservabilitySection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthSection {
    /// Usernames with admin privileges (review, force-state, delete).
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSection {
    /// Path of the JSON snapshot; unset keeps the store purely in memory.
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistrationSection {
    /// Root under which per-attempt scratch workspaces are created.
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilitySection {
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            auth: AuthSection { admins: vec![] },
            storage: StorageSection {
                snapshot_path: None,
            },
            registration: RegistrationSection {
                scratch_dir: PathBuf::from(".module-registry/scratch"),
            },
            observability: ObservabilitySection {
                log_level: "info".to_string(),
                json_logs: false,
            },
        }
    }
}

impl RegistryConfig {
    pub fn load() -> Result<Self> {
        Self::load_from("registry")
    }

    pub fn load_from(config_name: &str) -> Result<Self> {
        let settings = Config::builder()
            .set_default("auth.admins", Vec::<String>::new())?
            .set_default("storage.snapshot_path", None::<String>)?
            .set_default("registration.scratch_dir", ".module-registry/scratch")?
            .set_default("observability.log_level", "info")?
            .set_default("observability.json_logs", false)?
            .add_source(File::with_name(config_name).required(false))
            .add_source(
                Environment::with_prefix("MODULE_REGISTRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = RegistryConfig::default();
        assert!(cfg.auth.admins.is_empty());
        assert_eq!(cfg.observability.log_level, "info");
        assert!(cfg.storage.snapshot_path.is_none());
    }

    #[test]
    fn loads_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(
            &path,
            r#"
[auth]
admins = ["root", "ops"]

[storage]
snapshot_path = "/var/lib/registry/state.json"

[registration]
scratch_dir = "/tmp/registry-scratch"

[observability]
log_level = "debug"
json_logs = true
"#,
        )
        .unwrap();
        let cfg = RegistryConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.auth.admins, vec!["root", "ops"]);
        assert_eq!(
            cfg.storage.snapshot_path.as_deref(),
            Some(std::path::Path::new("/var/lib/registry/state.json"))
        );
        assert_eq!(cfg.observability.log_level, "debug");
        assert!(cfg.observability.json_logs);
    }
}
