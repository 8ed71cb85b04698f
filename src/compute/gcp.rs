//! Compute Engine v1 implementation of the control-plane trait.
//!
//! Requests go straight to the REST surface over rustls; token acquisition
//! is delegated to `gcp_auth`, which resolves application-default
//! credentials or a service-account file the same way the provider's own
//! client libraries do.

use std::sync::Arc;

use gcp_auth::{Token, TokenProvider};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::compute::types::{
    Image, Instance, InstanceList, InstanceSpec, InstanceSummary, Metadata, Operation,
};
use crate::compute::{ComputePlane, PlaneFuture};

const API_ROOT: &str = "https://compute.googleapis.com/compute/v1";
const COMPUTE_SCOPE: &str = "https://www.googleapis.com/auth/compute";

/// Errors raised by the Compute Engine control-plane client.
#[derive(Debug, Error)]
pub enum GcpApiError {
    /// Raised when token acquisition fails.
    #[error("authentication failed: {0}")]
    Auth(#[from] gcp_auth::Error),
    /// Raised when the HTTP request itself fails.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Raised when the API answers with a non-success status.
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        /// HTTP method of the failed request.
        method: &'static str,
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, useful for the provider's error JSON.
        body: String,
    },
}

/// Control plane backed by the Compute Engine v1 REST API.
#[derive(Clone)]
pub struct GcpComputePlane {
    http: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
}

impl GcpComputePlane {
    /// Builds a client using the environment's default credentials.
    ///
    /// # Errors
    ///
    /// Returns [`GcpApiError::Auth`] when no usable credential source is
    /// found.
    pub async fn new() -> Result<Self, GcpApiError> {
        let tokens = gcp_auth::provider().await?;
        Ok(Self::with_token_provider(tokens))
    }

    /// Builds a client around an explicit token provider.
    #[must_use]
    pub fn with_token_provider(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            tokens,
        }
    }

    async fn bearer(&self) -> Result<Arc<Token>, GcpApiError> {
        Ok(self.tokens.token(&[COMPUTE_SCOPE]).await?)
    }

    async fn checked(
        method: &'static str,
        url: String,
        response: Response,
    ) -> Result<Response, GcpApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GcpApiError::Status {
            method,
            url,
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, GcpApiError> {
        let token = self.bearer().await?;
        debug!(%url, "GET");
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.as_str())
            .send()
            .await?;
        Ok(Self::checked("GET", url, response).await?.json().await?)
    }

    async fn post_json<B, T>(&self, url: String, body: &B) -> Result<T, GcpApiError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let token = self.bearer().await?;
        debug!(%url, "POST");
        let response = self
            .http
            .post(&url)
            .bearer_auth(token.as_str())
            .json(body)
            .send()
            .await?;
        Ok(Self::checked("POST", url, response).await?.json().await?)
    }

    async fn delete_json<T: DeserializeOwned>(&self, url: String) -> Result<T, GcpApiError> {
        let token = self.bearer().await?;
        debug!(%url, "DELETE");
        let response = self
            .http
            .delete(&url)
            .bearer_auth(token.as_str())
            .send()
            .await?;
        Ok(Self::checked("DELETE", url, response).await?.json().await?)
    }

    fn instance_url(project: &str, zone: &str, name: &str) -> String {
        format!("{API_ROOT}/projects/{project}/zones/{zone}/instances/{name}")
    }
}

impl ComputePlane for GcpComputePlane {
    type Error = GcpApiError;

    fn resolve_image<'a>(
        &'a self,
        project: &'a str,
        family: &'a str,
    ) -> PlaneFuture<'a, String, Self::Error> {
        Box::pin(async move {
            let url =
                format!("{API_ROOT}/projects/{project}/global/images/family/{family}");
            let image: Image = self.get_json(url).await?;
            debug!(link = %image.self_link, "resolved image family");
            Ok(image.self_link)
        })
    }

    fn create_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        spec: &'a InstanceSpec,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = format!("{API_ROOT}/projects/{project}/zones/{zone}/instances");
            self.post_json(url, spec).await
        })
    }

    fn get_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Option<Instance>, Self::Error> {
        Box::pin(async move {
            let url = Self::instance_url(project, zone, name);
            let token = self.bearer().await?;
            debug!(%url, "GET");
            let response = self
                .http
                .get(&url)
                .bearer_auth(token.as_str())
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let instance = Self::checked("GET", url, response).await?.json().await?;
            Ok(Some(instance))
        })
    }

    fn set_instance_metadata<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
        metadata: &'a Metadata,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = format!("{}/setMetadata", Self::instance_url(project, zone, name));
            self.post_json(url, metadata).await
        })
    }

    fn delete_instance<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = Self::instance_url(project, zone, name);
            self.delete_json(url).await
        })
    }

    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
    ) -> PlaneFuture<'a, Option<Vec<InstanceSummary>>, Self::Error> {
        Box::pin(async move {
            let url = format!("{API_ROOT}/projects/{project}/zones/{zone}/instances");
            let list: InstanceList = self.get_json(url).await?;
            Ok(list.items)
        })
    }

    fn get_operation<'a>(
        &'a self,
        project: &'a str,
        zone: &'a str,
        name: &'a str,
    ) -> PlaneFuture<'a, Operation, Self::Error> {
        Box::pin(async move {
            let url = format!("{API_ROOT}/projects/{project}/zones/{zone}/operations/{name}");
            self.get_json(url).await
        })
    }
}
