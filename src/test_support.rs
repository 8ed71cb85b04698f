//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::sync::Mutex;

use thiserror::Error;

use crate::compute::types::{
    AccessConfig, Instance, InstanceSpec, InstanceSummary, Metadata, MetadataItem,
    NetworkInterface, Operation, OperationErrorDetail, OperationErrorList,
};
use crate::compute::{ComputePlane, PlaneFuture};
use crate::fire::ConfirmTeardown;
use crate::ssh::{CommandOutput, CommandRunner, SshError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SshError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| SshError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Error type returned by [`FakePlane`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake plane error: {0}")]
pub struct FakePlaneError(
    /// Message describing the scripted failure.
    pub String,
);

/// Records one call made through [`FakePlane`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlaneCall {
    /// `resolve_image` was invoked.
    ResolveImage {
        /// Project passed by the caller.
        project: String,
        /// Image family passed by the caller.
        family: String,
    },
    /// `create_instance` was invoked.
    Create {
        /// Name from the submitted spec.
        name: String,
    },
    /// `get_instance` was invoked.
    GetInstance {
        /// Requested instance name.
        name: String,
    },
    /// `set_instance_metadata` was invoked.
    SetMetadata {
        /// Target instance name.
        name: String,
    },
    /// `delete_instance` was invoked.
    Delete {
        /// Target instance name.
        name: String,
    },
    /// `list_instances` was invoked.
    List,
    /// `get_operation` was invoked.
    GetOperation {
        /// Polled operation name.
        name: String,
    },
}

/// Scripted control-plane double returning pre-seeded responses in FIFO
/// order per endpoint.
#[derive(Debug, Default)]
pub struct FakePlane {
    image: Mutex<String>,
    operations: Mutex<VecDeque<Operation>>,
    instances: Mutex<VecDeque<Option<Instance>>>,
    lists: Mutex<VecDeque<Option<Vec<InstanceSummary>>>>,
    metadata_bodies: Mutex<Vec<Metadata>>,
    created_specs: Mutex<Vec<InstanceSpec>>,
    calls: Mutex<Vec<PlaneCall>>,
    fail_delete: Mutex<bool>,
    mutation_counter: Mutex<u32>,
}

impl FakePlane {
    /// Creates a fake with an `image-1` default image link.
    #[must_use]
    pub fn new() -> Self {
        let plane = Self::default();
        if let Ok(mut image) = plane.image.lock() {
            *image = String::from("projects/p/global/images/image-1");
        }
        plane
    }

    /// Queues a `get_operation` response.
    pub fn push_operation(&self, operation: Operation) {
        lock(&self.operations).push_back(operation);
    }

    /// Queues a `get_instance` response.
    pub fn push_instance(&self, instance: Option<Instance>) {
        lock(&self.instances).push_back(instance);
    }

    /// Queues a `list_instances` response.
    pub fn push_list(&self, list: Option<Vec<InstanceSummary>>) {
        lock(&self.lists).push_back(list);
    }

    /// Makes `delete_instance` fail with a provider error.
    pub fn fail_delete(&self) {
        *lock(&self.fail_delete) = true;
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PlaneCall> {
        lock(&self.calls).clone()
    }

    /// Returns the metadata bodies submitted through
    /// `set_instance_metadata`.
    #[must_use]
    pub fn metadata_bodies(&self) -> Vec<Metadata> {
        lock(&self.metadata_bodies).clone()
    }

    /// Returns the instance specs submitted through `create_instance`.
    #[must_use]
    pub fn created_specs(&self) -> Vec<InstanceSpec> {
        lock(&self.created_specs).clone()
    }

    fn record(&self, call: PlaneCall) {
        lock(&self.calls).push(call);
    }

    fn next_mutation_operation(&self, verb: &str) -> Operation {
        let mut counter = lock(&self.mutation_counter);
        *counter += 1;
        Operation {
            name: format!("op-{verb}-{}", *counter),
            status: String::from("PENDING"),
            error: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn ready<T>(result: Result<T, FakePlaneError>) -> PlaneFuture<'static, T, FakePlaneError>
where
    T: Send + 'static,
{
    Box::pin(async move { result })
}

fn missing<T>(endpoint: &str) -> Result<T, FakePlaneError> {
    Err(FakePlaneError(format!(
        "no scripted response for {endpoint}"
    )))
}

impl ComputePlane for FakePlane {
    type Error = FakePlaneError;

    fn resolve_image<'a>(
        &'a self,
        project: &'a str,
        family: &'a str,
    ) -> PlaneFuture<'a, String, Self::Error> {
        self.record(PlaneCall::ResolveImage {
            project: project.to_owned(),
            family: family.to_owned(),
        });
        ready(Ok(lock(&self.image).clone()))
    }

    fn create_instance<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
        spec: &'a InstanceSpec,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        self.record(PlaneCall::Create {
            name: spec.name.clone(),
        });
        lock(&self.created_specs).push(spec.clone());
        ready(Ok(self.next_mutation_operation("create")))
    }

    fn get_instance<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Option<Instance>, Self::Error> {
        self.record(PlaneCall::GetInstance {
            name: name.to_owned(),
        });
        let next = lock(&self.instances).pop_front();
        ready(next.map_or_else(|| missing("get_instance"), Ok))
    }

    fn set_instance_metadata<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
        name: &'a str,
        metadata: &'a Metadata,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        self.record(PlaneCall::SetMetadata {
            name: name.to_owned(),
        });
        lock(&self.metadata_bodies).push(metadata.clone());
        ready(Ok(self.next_mutation_operation("set-metadata")))
    }

    fn delete_instance<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        self.record(PlaneCall::Delete {
            name: name.to_owned(),
        });
        if *lock(&self.fail_delete) {
            return ready(Err(FakePlaneError(String::from("delete refused"))));
        }
        ready(Ok(self.next_mutation_operation("delete")))
    }

    fn list_instances<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
    ) -> PlaneFuture<'a, Option<Vec<InstanceSummary>>, Self::Error> {
        self.record(PlaneCall::List);
        let next = lock(&self.lists).pop_front();
        ready(next.map_or_else(|| missing("list_instances"), Ok))
    }

    fn get_operation<'a>(
        &'a self,
        _project: &'a str,
        _zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        self.record(PlaneCall::GetOperation {
            name: name.to_owned(),
        });
        let next = lock(&self.operations).pop_front();
        ready(next.map_or_else(|| missing("get_operation"), Ok))
    }
}

/// Confirmation hook that records the instances it was asked about.
#[derive(Debug, Default)]
pub struct RecordingConfirmation {
    confirmed: Mutex<Vec<String>>,
}

impl RecordingConfirmation {
    /// Returns the instances confirmation was requested for.
    #[must_use]
    pub fn confirmed(&self) -> Vec<String> {
        lock(&self.confirmed).clone()
    }
}

impl ConfirmTeardown for &RecordingConfirmation {
    fn confirm(&self, instance_name: &str) {
        lock(&self.confirmed).push(instance_name.to_owned());
    }
}

/// Builds a terminal operation without errors.
#[must_use]
pub fn done_operation(name: &str) -> Operation {
    Operation {
        name: name.to_owned(),
        status: String::from("DONE"),
        error: None,
    }
}

/// Builds a terminal operation carrying a single structured error.
#[must_use]
pub fn failed_operation(name: &str, code: &str, message: &str) -> Operation {
    Operation {
        name: name.to_owned(),
        status: String::from("DONE"),
        error: Some(OperationErrorList {
            errors: vec![OperationErrorDetail {
                code: code.to_owned(),
                message: message.to_owned(),
            }],
        }),
    }
}

/// Builds an instance description with the given metadata items and NAT
/// address.
#[must_use]
pub fn instance_with(
    name: &str,
    fingerprint: Option<&str>,
    items: &[(&str, &str)],
    nat_ip: Option<&str>,
) -> Instance {
    Instance {
        name: name.to_owned(),
        metadata: Metadata {
            fingerprint: fingerprint.map(str::to_owned),
            items: items
                .iter()
                .map(|(key, value)| MetadataItem::new(*key, *value))
                .collect(),
        },
        network_interfaces: vec![NetworkInterface {
            access_configs: vec![AccessConfig {
                nat_ip: nat_ip.map(str::to_owned),
            }],
        }],
    }
}

/// Builds a list entry for `list_instances` responses.
#[must_use]
pub fn summary(name: &str) -> InstanceSummary {
    InstanceSummary {
        name: name.to_owned(),
    }
}
