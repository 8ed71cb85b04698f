//! Job descriptions accepted by the orchestrator.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::compute::types::MetadataItem;

/// Longest name the provider accepts for an instance.
const MAX_NAME_LEN: usize = 63;

/// Immutable description of one remote job.
///
/// The job name doubles as the instance name, so it must be a valid
/// Compute Engine resource name. All fields are caller-supplied; nothing is
/// derived until the spec is finalized against a project and zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpec {
    /// Job name, used verbatim as the instance name.
    pub name: String,
    /// Path to the local script executed on the instance.
    pub script_path: Utf8PathBuf,
    /// Image family the boot disk is created from.
    pub image_family: String,
    /// Machine type identifier (for example `n1-standard-4`).
    pub machine_type: String,
    /// Accelerator label to count mapping; may be empty.
    pub accelerators: BTreeMap<String, i64>,
    /// Whether the provider may reclaim the instance at any time.
    pub preemptible: bool,
    /// Extra metadata entries passed through to the instance.
    pub additional_metadata: Vec<MetadataItem>,
    /// Optional provider-native startup script, read at spec build time.
    pub startup_script_path: Option<Utf8PathBuf>,
}

impl JobSpec {
    /// Starts a builder for a [`JobSpec`].
    #[must_use]
    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::new()
    }

    /// Validates the job, returning a descriptive error when a required
    /// field is missing or the name is not usable as an instance name.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Validation`] for empty required fields and
    /// [`JobError::InvalidName`] for names the provider would reject.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.name.is_empty() {
            return Err(JobError::Validation("name".to_owned()));
        }
        if !is_valid_resource_name(&self.name) {
            return Err(JobError::InvalidName {
                name: self.name.clone(),
            });
        }
        if self.script_path.as_str().is_empty() {
            return Err(JobError::Validation("script_path".to_owned()));
        }
        if self.image_family.is_empty() {
            return Err(JobError::Validation("image_family".to_owned()));
        }
        if self.machine_type.is_empty() {
            return Err(JobError::Validation("machine_type".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`JobSpec`] that defers trimming and validation to build.
#[derive(Clone, Debug, Default)]
pub struct JobSpecBuilder {
    name: String,
    script_path: Utf8PathBuf,
    image_family: String,
    machine_type: Option<String>,
    accelerators: BTreeMap<String, i64>,
    preemptible: Option<bool>,
    additional_metadata: Vec<MetadataItem>,
    startup_script_path: Option<Utf8PathBuf>,
}

impl JobSpecBuilder {
    /// Creates an empty builder; required fields must be populated before
    /// build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the job name.
    #[must_use]
    pub fn name(mut self, value: impl Into<String>) -> Self {
        self.name = value.into();
        self
    }

    /// Sets the local script path.
    #[must_use]
    pub fn script_path(mut self, value: impl Into<Utf8PathBuf>) -> Self {
        self.script_path = value.into();
        self
    }

    /// Sets the image family.
    #[must_use]
    pub fn image_family(mut self, value: impl Into<String>) -> Self {
        self.image_family = value.into();
        self
    }

    /// Sets the machine type; defaults to `n1-standard-4`.
    #[must_use]
    pub fn machine_type(mut self, value: impl Into<String>) -> Self {
        self.machine_type = Some(value.into());
        self
    }

    /// Adds one accelerator attachment.
    #[must_use]
    pub fn accelerator(mut self, label: impl Into<String>, count: i64) -> Self {
        self.accelerators.insert(label.into(), count);
        self
    }

    /// Replaces the accelerator mapping wholesale.
    #[must_use]
    pub fn accelerators(mut self, value: BTreeMap<String, i64>) -> Self {
        self.accelerators = value;
        self
    }

    /// Sets the preemptible flag; defaults to `true`.
    #[must_use]
    pub const fn preemptible(mut self, value: bool) -> Self {
        self.preemptible = Some(value);
        self
    }

    /// Adds one metadata entry passed through to the instance.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_metadata.push(MetadataItem::new(key, value));
        self
    }

    /// Sets the optional startup script path.
    #[must_use]
    pub fn startup_script_path(mut self, value: Option<Utf8PathBuf>) -> Self {
        self.startup_script_path = value;
        self
    }

    /// Builds and validates the [`JobSpec`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`JobError`] when a required field is empty or the name is
    /// not a valid instance name.
    pub fn build(self) -> Result<JobSpec, JobError> {
        let job = JobSpec {
            name: self.name.trim().to_owned(),
            script_path: trim_path(&self.script_path),
            image_family: self.image_family.trim().to_owned(),
            machine_type: self
                .machine_type
                .map_or_else(|| "n1-standard-4".to_owned(), |value| value.trim().to_owned()),
            accelerators: self.accelerators,
            preemptible: self.preemptible.unwrap_or(true),
            additional_metadata: self.additional_metadata,
            startup_script_path: self.startup_script_path.map(|path| trim_path(&path)),
        };
        job.validate()?;
        Ok(job)
    }
}

fn trim_path(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(path.as_str().trim())
}

/// Checks the RFC 1035 label shape the provider requires of instance names:
/// a lowercase letter, then lowercase letters, digits, or hyphens, not
/// ending with a hyphen, at most 63 characters.
fn is_valid_resource_name(name: &str) -> bool {
    if name.len() > MAX_NAME_LEN || name.ends_with('-') {
        return false;
    }
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
}

/// Errors raised while assembling a job description.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    /// Raised when a required field is missing or empty.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the job name cannot be used as an instance name.
    #[error(
        "job name `{name}` is not a valid instance name (lowercase letter start, \
         lowercase letters, digits, and hyphens only, at most 63 characters)"
    )]
    InvalidName {
        /// Name that failed validation.
        name: String,
    },
}
