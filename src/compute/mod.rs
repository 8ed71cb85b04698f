//! Compute control-plane abstraction and the Compute Engine implementation.
//!
//! The [`ComputePlane`] trait is the seam between the orchestration workflow
//! and the provider: production code talks to Compute Engine through
//! [`gcp::GcpComputePlane`], while tests drive the same workflow against a
//! scripted fake.

pub mod gcp;
pub mod poll;
pub mod spec;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use types::{Instance, InstanceSpec, InstanceSummary, Metadata, Operation};

/// Future returned by control-plane operations.
pub type PlaneFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface to the provider's compute control plane.
///
/// Every mutation returns the [`Operation`] the provider created for it;
/// callers decide whether to wait on it via [`poll::OperationPoller`].
pub trait ComputePlane {
    /// Provider specific error type returned by the control plane.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves the latest image of `family` in `project` to its link.
    fn resolve_image<'a>(
        &'a self,
        project: &'a str,
        family: &'a str,
    ) -> PlaneFuture<'a, String, Self::Error>;

    /// Submits an instance creation request.
    fn create_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        spec: &'a InstanceSpec,
    ) -> PlaneFuture<'a, Operation, Self::Error>;

    /// Fetches an instance description, or `None` when the provider reports
    /// no such instance.
    fn get_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Option<Instance>, Self::Error>;

    /// Replaces instance metadata; `metadata` must carry the fingerprint
    /// captured by a preceding get.
    fn set_instance_metadata<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
        metadata: &'a Metadata,
    ) -> PlaneFuture<'a, Operation, Self::Error>;

    /// Submits an instance deletion request.
    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error>;

    /// Lists instances in the zone, or `None` when the provider omits the
    /// item list entirely.
    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
    ) -> PlaneFuture<'a, Option<Vec<InstanceSummary>>, Self::Error>;

    /// Fetches the current state of a zone operation.
    fn get_operation<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error>;
}

impl<'p, C: ComputePlane> ComputePlane for &'p C {
    type Error = C::Error;

    fn resolve_image<'a>(
        &'a self,
        project: &'a str,
        family: &'a str,
    ) -> PlaneFuture<'a, String, Self::Error> {
        (**self).resolve_image(project, family)
    }

    fn create_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        spec: &'a InstanceSpec,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        (**self).create_instance(project, zone, spec)
    }

    fn get_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Option<Instance>, Self::Error> {
        (**self).get_instance(project, zone, name)
    }

    fn set_instance_metadata<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
        metadata: &'a Metadata,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        (**self).set_instance_metadata(project, zone, name, metadata)
    }

    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        (**self).delete_instance(project, zone, name)
    }

    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
    ) -> PlaneFuture<'a, Option<Vec<InstanceSummary>>, Self::Error> {
        (**self).list_instances(project, zone)
    }

    fn get_operation<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        (**self).get_operation(project, zone, name)
    }
}
