//! Blocking wait for provider operations to reach their terminal state.
//!
//! The poller issues one `get_operation` call per interval until the
//! operation reports `DONE`, then classifies any attached errors. This is
//! the only place provider error codes are interpreted; callers see a typed
//! reason and treat everything else as opaque pass/fail.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::compute::ComputePlane;
use crate::compute::types::Operation;

/// Fixed cadence between operation polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Error code the provider reports when a zone has no capacity left for
/// the requested shape.
const POOL_EXHAUSTED_CODE: &str = "ZONE_RESOURCE_POOL_EXHAUSTED";

/// Errors raised while waiting on an operation.
#[derive(Debug, Error)]
pub enum PollError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider has no capacity for the requested shape. Surfaced as a
    /// distinct kind so callers can decide to retry at a higher level.
    #[error("zone resource pool exhausted: {message}")]
    ResourceExhausted {
        /// Message attached to the capacity error.
        message: String,
    },
    /// The operation reached `DONE` carrying one or more errors.
    #[error("operation {operation} failed: {}", .messages.join("; "))]
    OperationFailed {
        /// Operation name that failed.
        operation: String,
        /// One entry per structured error.
        messages: Vec<String>,
    },
    /// The underlying control-plane call failed.
    #[error("control plane request failed: {0}")]
    Plane(#[source] E),
}

/// Waits for zone operations on behalf of one project/zone pair.
#[derive(Debug)]
pub struct OperationPoller<'a, C: ComputePlane> {
    plane: &'a C,
    project: &'a str,
    zone: &'a str,
    interval: Duration,
}

impl<'a, C: ComputePlane> OperationPoller<'a, C> {
    /// Creates a poller with the default 1 second cadence.
    #[must_use]
    pub const fn new(plane: &'a C, project: &'a str, zone: &'a str) -> Self {
        Self {
            plane,
            project,
            zone,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the polling interval.
    ///
    /// This is primarily used by tests to keep polling scenarios fast.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Polls `operation` until it is terminal and classifies the outcome.
    ///
    /// There is no upper bound on the wait: a wedged provider-side
    /// operation stalls the caller indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::ResourceExhausted`] for a single capacity
    /// error, [`PollError::OperationFailed`] for any other terminal error,
    /// and [`PollError::Plane`] when polling itself fails.
    pub async fn wait(&self, operation: &str) -> Result<Operation, PollError<C::Error>> {
        info!(operation, "waiting for operation to finish");
        loop {
            let result = self
                .plane
                .get_operation(self.project, self.zone, operation)
                .await
                .map_err(PollError::Plane)?;

            if result.is_done() {
                info!(operation, "done");
                classify(operation, &result)?;
                return Ok(result);
            }

            debug!(operation, status = %result.status, "operation still running");
            sleep(self.interval).await;
        }
    }
}

fn classify<E>(operation: &str, result: &Operation) -> Result<(), PollError<E>>
where
    E: std::error::Error + 'static,
{
    let Some(error) = &result.error else {
        return Ok(());
    };

    match error.errors.as_slice() {
        [] => Ok(()),
        [only] if only.code == POOL_EXHAUSTED_CODE => Err(PollError::ResourceExhausted {
            message: only.message.clone(),
        }),
        [only] => Err(PollError::OperationFailed {
            operation: operation.to_owned(),
            messages: vec![only.message.clone()],
        }),
        many => Err(PollError::OperationFailed {
            operation: operation.to_owned(),
            messages: many
                .iter()
                .map(|detail| format!("{}: {}", detail.code, detail.message))
                .collect(),
        }),
    }
}
