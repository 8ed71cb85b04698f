//! Finalizes a job into a location-bound instance creation request.
//!
//! Machine-type and accelerator-type identifiers are zone- and
//! project-qualified paths, so a spec can only be built once the target
//! project and zone are known; there is deliberately no zone-free path.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

use crate::compute::types::{
    AccessConfigSpec, AttachedDisk, GuestAccelerator, InitializeParams, InstanceSpec, Metadata,
    MetadataItem, NetworkInterfaceSpec, Scheduling, ServiceAccount,
};
use crate::job::JobSpec;

/// Boot disk size in gigabytes; the fixed minimum for job images.
pub const BOOT_DISK_SIZE_GB: u32 = 50;

const DEFAULT_NETWORK: &str = "global/networks/default";
const NAT_ACCESS_TYPE: &str = "ONE_TO_ONE_NAT";
const NAT_ACCESS_NAME: &str = "External NAT";

/// Scopes granted to the instance's default service account so jobs can
/// reach storage, logging, and monitoring without extra credentials.
const SERVICE_ACCOUNT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/datastore",
    "https://www.googleapis.com/auth/monitoring.write",
    "https://www.googleapis.com/auth/service.management.readonly",
    "https://www.googleapis.com/auth/servicecontrol",
    "https://www.googleapis.com/auth/trace.append",
];

/// Errors raised while finalizing an instance spec.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when the configured startup script cannot be read. This is a
    /// configuration error and is never retried.
    #[error("failed to read startup script `{path}`: {message}")]
    StartupScript {
        /// Startup script path from the job.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Builds the finalized creation request for `job` in `project`/`zone`.
///
/// Two synthetic metadata entries (`serial-port-enable`, `enable-oslogin`)
/// always precede caller-supplied entries; a `startup-script` entry holding
/// the script file's full contents is appended when the job names one.
///
/// # Errors
///
/// Returns [`SpecError::StartupScript`] when the startup script file cannot
/// be read.
pub fn build_instance_spec(
    job: &JobSpec,
    image_link: &str,
    project: &str,
    zone: &str,
) -> Result<InstanceSpec, SpecError> {
    debug!(
        name = %job.name,
        machine_type = %job.machine_type,
        preemptible = job.preemptible,
        accelerators = job.accelerators.len(),
        "finalizing instance spec"
    );
    if job.preemptible {
        debug!("instance is preemptible and will live for no longer than 24 hours");
    }

    let guest_accelerators = job
        .accelerators
        .iter()
        .map(|(label, count)| GuestAccelerator {
            accelerator_count: *count,
            accelerator_type: format!("projects/{project}/zones/{zone}/acceleratorTypes/{label}"),
        })
        .collect();

    let mut items = vec![
        MetadataItem::new("serial-port-enable", "false"),
        MetadataItem::new("enable-oslogin", "false"),
    ];
    items.extend(job.additional_metadata.iter().cloned());
    if let Some(path) = &job.startup_script_path {
        let contents = read_to_string_ambient(path).map_err(|message| SpecError::StartupScript {
            path: path.clone(),
            message,
        })?;
        items.push(MetadataItem::new("startup-script", contents));
    }

    Ok(InstanceSpec {
        name: job.name.clone(),
        machine_type: format!("zones/{zone}/machineTypes/{}", job.machine_type),
        scheduling: Scheduling {
            preemptible: job.preemptible,
            on_host_maintenance: "TERMINATE".to_owned(),
            automatic_restart: false,
        },
        disks: vec![AttachedDisk {
            boot: true,
            auto_delete: true,
            disk_size_gb: BOOT_DISK_SIZE_GB.to_string(),
            initialize_params: InitializeParams {
                source_image: image_link.to_owned(),
            },
        }],
        network_interfaces: vec![NetworkInterfaceSpec {
            network: DEFAULT_NETWORK.to_owned(),
            access_configs: vec![AccessConfigSpec {
                kind: NAT_ACCESS_TYPE.to_owned(),
                name: NAT_ACCESS_NAME.to_owned(),
            }],
        }],
        guest_accelerators,
        service_accounts: vec![ServiceAccount {
            email: "default".to_owned(),
            scopes: SERVICE_ACCOUNT_SCOPES
                .iter()
                .map(|scope| (*scope).to_owned())
                .collect(),
        }],
        metadata: Metadata {
            fingerprint: None,
            items,
        },
    })
}

fn read_to_string_ambient(path: &Utf8Path) -> Result<String, String> {
    let (dir_path, file_path) = if path.is_absolute() {
        let parent = path
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path}"))?;
        let file_name = path
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_path).map_err(|err| err.to_string())
}
