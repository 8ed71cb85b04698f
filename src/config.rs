//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::fire::{FireConfig, HARD_LIMIT_MAX_INSTANCES};

/// Project-level configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "GCPFIRE")]
pub struct GcpFireConfig {
    /// Project identifier instances are created and billed in. Required.
    pub project: String,
    /// Zone instances are created in. Defaults to `us-east1-c`.
    #[ortho_config(default = "us-east1-c".to_owned())]
    pub zone: String,
    /// Project boot images are resolved from. Defaults to the instance
    /// project when unset.
    pub image_project: Option<String>,
    /// Remote user one-time credentials are issued for.
    #[ortho_config(default = "gcpfire".to_owned())]
    pub ssh_username: String,
    /// Directory receiving per-run private key files.
    #[ortho_config(default = "secrets".to_owned())]
    pub secrets_dir: String,
    /// Ceiling on instances per zone before a run refuses to create more.
    #[ortho_config(default = HARD_LIMIT_MAX_INSTANCES)]
    pub instance_cap: usize,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl GcpFireConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in gcpfire.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags
    /// in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge
    /// sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    /// Values still merge defaults, configuration files, and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("gcpfire")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the orchestrator configuration from the loaded values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_fire_config(&self) -> Result<FireConfig, ConfigError> {
        self.validate()?;
        let mut config = FireConfig::new(&self.project, &self.zone, &self.ssh_username);
        config.image_project = self
            .image_project
            .clone()
            .unwrap_or_else(|| self.project.clone());
        config.instance_cap = self.instance_cap;
        Ok(config)
    }

    /// Performs semantic validation on required fields. Error messages
    /// include guidance on how to provide missing values via environment
    /// variables or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is
    /// empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.project,
            &FieldMetadata::new("project ID", "GCPFIRE_PROJECT", "project", "gcpfire"),
        )?;
        Self::require_field(
            &self.zone,
            &FieldMetadata::new("availability zone", "GCPFIRE_ZONE", "zone", "gcpfire"),
        )?;
        Self::require_field(
            &self.ssh_username,
            &FieldMetadata::new(
                "SSH user name",
                "GCPFIRE_SSH_USERNAME",
                "ssh_username",
                "gcpfire",
            ),
        )?;
        Self::require_field(
            &self.secrets_dir,
            &FieldMetadata::new(
                "secrets directory",
                "GCPFIRE_SECRETS_DIR",
                "secrets_dir",
                "gcpfire",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GcpFireConfig {
        GcpFireConfig {
            project: "main-composite".to_owned(),
            zone: "us-east1-c".to_owned(),
            image_project: None,
            ssh_username: "gcpfire".to_owned(),
            secrets_dir: "secrets".to_owned(),
            instance_cap: HARD_LIMIT_MAX_INSTANCES,
        }
    }

    #[test]
    fn validate_accepts_complete_configuration() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_project_names_the_env_var() {
        let config = GcpFireConfig {
            project: String::new(),
            ..base_config()
        };
        let err = config.validate().expect_err("validation should fail");
        assert!(
            matches!(err, ConfigError::MissingField(ref message) if message.contains("GCPFIRE_PROJECT")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn image_project_falls_back_to_project() {
        let fire = base_config()
            .as_fire_config()
            .expect("config should validate");
        assert_eq!(fire.image_project, "main-composite");
    }

    #[test]
    fn explicit_image_project_is_kept() {
        let config = GcpFireConfig {
            image_project: Some("deeplearning-platform-release".to_owned()),
            ..base_config()
        };
        let fire = config.as_fire_config().expect("config should validate");
        assert_eq!(fire.image_project, "deeplearning-platform-release");
    }
}
