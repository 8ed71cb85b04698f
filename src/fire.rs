//! End-to-end orchestration of one ephemeral job instance.
//!
//! The workflow resolves the boot image, creates the instance, injects a
//! one-time SSH credential, executes the job script, and always tears the
//! instance and the local credential down afterwards, whatever happened in
//! between. Cleanup never masks the failure that preceded it; a cleanup
//! failure after another failure is attached as a secondary error.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::ComputePlane;
use crate::compute::poll::{DEFAULT_POLL_INTERVAL, OperationPoller, PollError};
use crate::compute::spec::{SpecError, build_instance_spec};
use crate::credentials::{CredentialInjector, InjectError};
use crate::executor::{ExecError, RemoteExecutor};
use crate::job::JobSpec;
use crate::keys::{KeyError, KeyStore};
use crate::ssh::{CommandRunner, SshClient};

/// Default ceiling on instances per zone before a run refuses to create
/// more. A guard rail against runaway creation, not a quota: the check is
/// read-then-act and inherently racy under concurrent orchestrators.
pub const HARD_LIMIT_MAX_INSTANCES: usize = 10;

/// Errors surfaced by the fire workflow.
#[derive(Debug, Error)]
pub enum FireError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the zone already holds more instances than the cap
    /// allows; nothing has been created or mutated.
    #[error("{count} instances already running in zone {zone} (hard cap {cap})")]
    TooManyInstances {
        /// Instances currently listed.
        count: usize,
        /// Configured hard cap.
        cap: usize,
        /// Zone that was checked.
        zone: String,
    },
    /// Raised when creation completed but the provider reports no
    /// instances at all. A fatal consistency violation, never retried.
    #[error("instance created but the provider lists no instances in zone {zone}")]
    NoInstancesReported {
        /// Zone whose listing disagreed with the creation.
        zone: String,
    },
    /// Raised when finalizing the instance spec fails.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Raised when waiting on a provider operation fails; capacity
    /// exhaustion surfaces here as a distinguishable kind.
    #[error("operation wait failed: {0}")]
    Wait(#[source] PollError<E>),
    /// Raised when credential injection fails.
    #[error("credential injection failed: {0}")]
    Inject(#[source] InjectError<E>),
    /// Raised when remote execution fails.
    #[error("remote execution failed: {0}")]
    Exec(#[source] ExecError),
    /// Raised when erasing the local credential fails.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Raised when a control-plane call fails.
    #[error("control plane request failed: {0}")]
    Plane(#[source] E),
    /// Raised when the workflow succeeded but cleanup did not.
    #[error("cleanup failed: {0}")]
    Cleanup(#[source] Box<Self>),
    /// Raised when cleanup failed after an earlier failure; the primary
    /// error is preserved and the cleanup error attached.
    #[error("{primary} (cleanup also failed: {cleanup})")]
    CleanupAfterFailure {
        /// Failure that aborted the workflow.
        primary: Box<Self>,
        /// Failure raised by the subsequent cleanup.
        cleanup: Box<Self>,
    },
}

/// Options of one `fire` invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FireOptions {
    /// Pause for confirmation before the instance is deleted.
    pub wait_for_confirmation: bool,
    /// Delay between SSH connection probes.
    pub retry_wait: Duration,
    /// Maximum number of SSH connection probes.
    pub max_retry: u32,
}

impl Default for FireOptions {
    fn default() -> Self {
        Self {
            wait_for_confirmation: false,
            retry_wait: Duration::from_secs(5),
            max_retry: 5,
        }
    }
}

/// Static configuration of the orchestrator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FireConfig {
    /// Project instances are created in.
    pub project: String,
    /// Zone instances are created in.
    pub zone: String,
    /// Project boot images are resolved from.
    pub image_project: String,
    /// Remote user the credential is issued for.
    pub ssh_username: String,
    /// Ceiling on instances per zone before a run refuses to create more.
    pub instance_cap: usize,
    /// Interval between provider operation polls.
    pub poll_interval: Duration,
}

impl FireConfig {
    /// Creates a configuration with the default cap and poll cadence.
    #[must_use]
    pub fn new(
        project: impl Into<String>,
        zone: impl Into<String>,
        ssh_username: impl Into<String>,
    ) -> Self {
        let project = project.into();
        Self {
            image_project: project.clone(),
            project,
            zone: zone.into(),
            ssh_username: ssh_username.into(),
            instance_cap: HARD_LIMIT_MAX_INSTANCES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Runtime handle to the one instance a `fire` invocation owns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceHandle {
    /// Instance name (the job name).
    pub name: String,
    /// Project the instance lives in.
    pub project: String,
    /// Zone the instance lives in.
    pub zone: String,
    /// External address, populated once a credential has been injected.
    pub external_ip: Option<String>,
    /// Local private key path, populated once a credential has been
    /// injected.
    pub private_key_file: Option<Utf8PathBuf>,
}

impl InstanceHandle {
    fn new(name: &str, project: &str, zone: &str) -> Self {
        Self {
            name: name.to_owned(),
            project: project.to_owned(),
            zone: zone.to_owned(),
            external_ip: None,
            private_key_file: None,
        }
    }
}

/// Hook invoked before instance deletion when a run asks for an
/// interactive pause.
pub trait ConfirmTeardown {
    /// Blocks until the caller confirms deletion of `instance_name`.
    fn confirm(&self, instance_name: &str);
}

/// Confirmation hook reading a line from standard input.
#[derive(Clone, Debug, Default)]
pub struct StdinConfirmation;

impl ConfirmTeardown for StdinConfirmation {
    fn confirm(&self, instance_name: &str) {
        write!(io::stderr(), "DELETE instance {instance_name}? [Enter] ").ok();
        io::stderr().flush().ok();
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok();
    }
}

/// Executes the fire workflow against a control plane and SSH transport.
#[derive(Debug)]
pub struct FireOrchestrator<C, R, P = StdinConfirmation>
where
    C: ComputePlane,
    R: CommandRunner,
    P: ConfirmTeardown,
{
    plane: C,
    ssh: SshClient<R>,
    keys: KeyStore,
    config: FireConfig,
    prompt: P,
}

impl<C, R> FireOrchestrator<C, R, StdinConfirmation>
where
    C: ComputePlane,
    R: CommandRunner,
{
    /// Creates an orchestrator with the stdin confirmation hook.
    #[must_use]
    pub fn new(plane: C, ssh: SshClient<R>, keys: KeyStore, config: FireConfig) -> Self {
        Self {
            plane,
            ssh,
            keys,
            config,
            prompt: StdinConfirmation,
        }
    }
}

impl<C, R, P> FireOrchestrator<C, R, P>
where
    C: ComputePlane,
    R: CommandRunner,
    P: ConfirmTeardown,
{
    /// Replaces the teardown confirmation hook.
    #[must_use]
    pub fn with_prompt<Q: ConfirmTeardown>(self, prompt: Q) -> FireOrchestrator<C, R, Q> {
        FireOrchestrator {
            plane: self.plane,
            ssh: self.ssh,
            keys: self.keys,
            config: self.config,
            prompt,
        }
    }

    /// Runs `job` on a freshly created instance and returns the script's
    /// captured stdout.
    ///
    /// Once the creation operation has completed, teardown is guaranteed:
    /// whatever the later stages do, the instance is deleted and the local
    /// key erased before this method returns.
    ///
    /// # Errors
    ///
    /// Returns [`FireError`]; see the variants for the failure taxonomy.
    pub async fn fire(
        &self,
        job: &JobSpec,
        options: &FireOptions,
    ) -> Result<String, FireError<C::Error>> {
        let image_link = self
            .plane
            .resolve_image(&self.config.image_project, &job.image_family)
            .await
            .map_err(FireError::Plane)?;
        debug!(image = %image_link, "resolved image family");

        let listed = self
            .plane
            .list_instances(&self.config.project, &self.config.zone)
            .await
            .map_err(FireError::Plane)?;
        let count = listed.map_or(0, |items| items.len());
        if count > self.config.instance_cap {
            return Err(FireError::TooManyInstances {
                count,
                cap: self.config.instance_cap,
                zone: self.config.zone.clone(),
            });
        }

        let spec = build_instance_spec(job, &image_link, &self.config.project, &self.config.zone)?;
        info!(instance = %job.name, "creating instance");
        let operation = self
            .plane
            .create_instance(&self.config.project, &self.config.zone, &spec)
            .await
            .map_err(FireError::Plane)?;
        self.poller().wait(&operation.name).await.map_err(FireError::Wait)?;

        // From here on the instance exists; every exit path runs cleanup.
        let mut handle = InstanceHandle::new(&job.name, &self.config.project, &self.config.zone);
        let outcome = self.run_on_instance(&mut handle, job, options).await;
        let cleanup = self.cleanup(&handle, options).await;

        match (outcome, cleanup) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(_), Err(err)) => Err(FireError::Cleanup(Box::new(err))),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(err)) => Err(FireError::CleanupAfterFailure {
                primary: Box::new(primary),
                cleanup: Box::new(err),
            }),
        }
    }

    async fn run_on_instance(
        &self,
        handle: &mut InstanceHandle,
        job: &JobSpec,
        options: &FireOptions,
    ) -> Result<String, FireError<C::Error>> {
        match self
            .plane
            .list_instances(&self.config.project, &self.config.zone)
            .await
            .map_err(FireError::Plane)?
        {
            Some(items) => {
                info!(
                    project = %self.config.project,
                    zone = %self.config.zone,
                    "instances in zone:"
                );
                for item in &items {
                    info!(" - {}", item.name);
                }
            }
            None => {
                return Err(FireError::NoInstancesReported {
                    zone: self.config.zone.clone(),
                });
            }
        }

        let credential = CredentialInjector::new(
            &self.plane,
            &self.keys,
            &self.config.project,
            &self.config.zone,
        )
        .with_poll_interval(self.config.poll_interval)
        .inject(&handle.name, &self.config.ssh_username)
        .await
        .map_err(FireError::Inject)?;
        handle.external_ip = Some(credential.external_ip.clone());
        handle.private_key_file = Some(credential.private_key_path.clone());

        let executor = RemoteExecutor::new(&self.ssh, options.retry_wait, options.max_retry);
        executor
            .run(
                &credential.external_ip,
                &credential.private_key_path,
                &job.script_path,
            )
            .await
            .map_err(FireError::Exec)
    }

    /// Deletes the instance and erases the local key. Both halves are
    /// always attempted; the first failure wins.
    async fn cleanup(
        &self,
        handle: &InstanceHandle,
        options: &FireOptions,
    ) -> Result<(), FireError<C::Error>> {
        if options.wait_for_confirmation {
            self.prompt.confirm(&handle.name);
        }

        info!(instance = %handle.name, "deleting instance");
        let deletion: Result<(), FireError<C::Error>> = match self
            .plane
            .delete_instance(&handle.project, &handle.zone, &handle.name)
            .await
        {
            Ok(operation) => self
                .poller()
                .wait(&operation.name)
                .await
                .map(|_| ())
                .map_err(FireError::Wait),
            Err(err) => Err(FireError::Plane(err)),
        };
        if deletion.is_err() {
            warn!(instance = %handle.name, "instance deletion failed");
        }

        let key_removal = match &handle.private_key_file {
            Some(path) => self.keys.remove(path).map_err(FireError::Key),
            None => Ok(()),
        };

        deletion.and(key_removal)
    }

    fn poller(&self) -> OperationPoller<'_, C> {
        OperationPoller::new(&self.plane, &self.config.project, &self.config.zone)
            .with_interval(self.config.poll_interval)
    }
}
