//! Wire types for the Compute Engine v1 API surface the crate touches.
//!
//! Request bodies are serialized and responses deserialized with serde's
//! camelCase renaming, mirroring the provider's JSON field names. Unknown
//! response fields are ignored so the types only model what the workflow
//! reads.

use serde::{Deserialize, Serialize};

/// Terminal status string reported for finished operations.
pub const OPERATION_DONE: &str = "DONE";

/// Provider-side handle to an asynchronous mutation, polled until `DONE`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation name used for subsequent polls.
    pub name: String,
    /// Current status (`PENDING`, `RUNNING`, or `DONE`).
    pub status: String,
    /// Structured errors attached once the operation is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationErrorList>,
}

impl Operation {
    /// Returns `true` once the operation has reached its terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == OPERATION_DONE
    }
}

/// Wrapper object the provider uses for operation errors.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationErrorList {
    /// Individual errors, usually exactly one.
    #[serde(default)]
    pub errors: Vec<OperationErrorDetail>,
}

/// Single structured error carried by a failed operation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationErrorDetail {
    /// Provider error code, for example `ZONE_RESOURCE_POOL_EXHAUSTED`.
    #[serde(default)]
    pub code: String,
    /// Human-readable message attached to the error.
    #[serde(default)]
    pub message: String,
}

/// Instance description returned by an instance get.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance name.
    pub name: String,
    /// Instance metadata including the concurrency-guard fingerprint.
    #[serde(default)]
    pub metadata: Metadata,
    /// Attached network interfaces; the first carries the NAT address.
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

impl Instance {
    /// Returns the first interface's first access-config NAT address.
    #[must_use]
    pub fn external_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .and_then(|interface| interface.access_configs.first())
            .and_then(|config| config.nat_ip.as_deref())
    }
}

/// Instance metadata: an opaque version fingerprint plus key/value items.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Version token required for metadata writes; absent on insert bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Metadata entries in provider order.
    #[serde(default)]
    pub items: Vec<MetadataItem>,
}

/// Single metadata key/value entry.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataItem {
    /// Entry key.
    pub key: String,
    /// Entry value; for `ssh-keys` a newline-joined `user:public-key` list.
    #[serde(default)]
    pub value: String,
}

impl MetadataItem {
    /// Convenience constructor for owned key/value pairs.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Network interface attached to an instance.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    /// NAT access configurations for the interface.
    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

/// Access configuration holding the external NAT address.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct AccessConfig {
    /// External IPv4 address, absent until the provider assigns one.
    #[serde(default, rename = "natIP")]
    pub nat_ip: Option<String>,
}

/// Response body of an instance list call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceList {
    /// Listed instances; the provider omits the field entirely when the
    /// zone holds none.
    #[serde(default)]
    pub items: Option<Vec<InstanceSummary>>,
}

/// Minimal per-instance entry from a list call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct InstanceSummary {
    /// Instance name.
    pub name: String,
}

/// Image description returned by a get-from-family call.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Fully qualified link used as a boot disk source.
    pub self_link: String,
}

/// Finalized, location-bound instance creation request body.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Instance name.
    pub name: String,
    /// Zone-qualified machine type path.
    pub machine_type: String,
    /// Scheduling policy; always terminates on host maintenance.
    pub scheduling: Scheduling,
    /// Attached disks; exactly one boot disk in this design.
    pub disks: Vec<AttachedDisk>,
    /// Network interfaces; one NAT-enabled default-network interface.
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
    /// Requested accelerators; empty when the job asks for none.
    pub guest_accelerators: Vec<GuestAccelerator>,
    /// Service accounts granted to the instance.
    pub service_accounts: Vec<ServiceAccount>,
    /// Initial metadata items.
    pub metadata: Metadata,
}

/// Scheduling options of an instance spec.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    /// Whether the provider may reclaim the instance at any time.
    pub preemptible: bool,
    /// Maintenance policy; `TERMINATE` is required for preemptible shapes.
    pub on_host_maintenance: String,
    /// Automatic restart flag; disabled for one-shot jobs.
    pub automatic_restart: bool,
}

/// Boot disk attachment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Marks the disk the instance boots from.
    pub boot: bool,
    /// Deletes the disk together with the instance.
    pub auto_delete: bool,
    /// Disk size in gigabytes, as the API's decimal string.
    pub disk_size_gb: String,
    /// Source image parameters.
    pub initialize_params: InitializeParams,
}

/// Creation parameters of a boot disk.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Image link the disk is created from.
    pub source_image: String,
}

/// Network interface request entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceSpec {
    /// Network path, for example `global/networks/default`.
    pub network: String,
    /// NAT access configurations granting a public address.
    pub access_configs: Vec<AccessConfigSpec>,
}

/// Access configuration request entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessConfigSpec {
    /// Access config type, `ONE_TO_ONE_NAT` for an external address.
    #[serde(rename = "type")]
    pub kind: String,
    /// Display name of the access config.
    pub name: String,
}

/// Accelerator attachment request entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestAccelerator {
    /// Number of accelerators of this type.
    pub accelerator_count: i64,
    /// Project- and zone-qualified accelerator type path.
    pub accelerator_type: String,
}

/// Service account granted to the instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    /// Account email, or `default` for the project default account.
    pub email: String,
    /// OAuth scopes granted through the account.
    pub scopes: Vec<String>,
}
