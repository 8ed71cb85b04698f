//! Core library for the gcpfire one-shot job runner.
//!
//! The crate provisions a single ephemeral Compute Engine instance,
//! injects a one-time SSH credential into its metadata, runs a
//! caller-supplied script over SSH, and guarantees the instance and the
//! credential are destroyed afterwards regardless of the outcome.

pub mod compute;
pub mod config;
pub mod credentials;
pub mod executor;
pub mod fire;
pub mod job;
pub mod keys;
pub mod ssh;
pub mod test_support;

pub use compute::gcp::{GcpApiError, GcpComputePlane};
pub use compute::poll::{DEFAULT_POLL_INTERVAL, OperationPoller, PollError};
pub use compute::spec::{SpecError, build_instance_spec};
pub use compute::{ComputePlane, PlaneFuture};
pub use config::{ConfigError, GcpFireConfig};
pub use credentials::{CredentialInjector, InjectError, InjectedCredential};
pub use executor::{ExecError, RemoteExecutor};
pub use fire::{
    ConfirmTeardown, FireConfig, FireError, FireOptions, FireOrchestrator, HARD_LIMIT_MAX_INSTANCES,
    InstanceHandle, StdinConfirmation,
};
pub use job::{JobError, JobSpec, JobSpecBuilder};
pub use keys::{KeyError, KeyStore, Keypair};
pub use ssh::{
    CommandOutput, CommandRunner, ProcessCommandRunner, SshClient, SshConfig, SshError,
};
