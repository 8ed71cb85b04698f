//! One-time SSH credential injection via instance metadata.
//!
//! The provider authorizes SSH logins through an `ssh-keys` metadata entry
//! holding newline-joined `user:public-key` lines. Injection is a
//! read-modify-write: the current items and the metadata fingerprint are
//! fetched, a fresh public key is merged into the key list without touching
//! unrelated entries, and the update is submitted with the captured
//! fingerprint so a concurrent metadata writer makes the provider reject it
//! instead of losing either write.

use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::compute::ComputePlane;
use crate::compute::poll::{DEFAULT_POLL_INTERVAL, OperationPoller, PollError};
use crate::compute::types::{Metadata, MetadataItem};
use crate::keys::{KeyError, KeyStore, Keypair};

/// Metadata key holding authorized SSH keys.
pub const SSH_KEYS_METADATA_KEY: &str = "ssh-keys";

/// Errors raised while injecting a credential.
#[derive(Debug, Error)]
pub enum InjectError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provider reports no such instance.
    #[error("instance {name} does not exist")]
    InstanceNotFound {
        /// Instance that was expected to exist.
        name: String,
    },
    /// Raised when the instance has no external NAT address.
    #[error("instance {name} has no external address")]
    MissingExternalIp {
        /// Instance missing an address.
        name: String,
    },
    /// Raised when key generation or storage fails.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// Raised when the metadata update operation fails; a stale fingerprint
    /// surfaces here.
    #[error("metadata update failed: {0}")]
    Update(#[source] PollError<E>),
    /// Raised when a control-plane call fails.
    #[error("control plane request failed: {0}")]
    Plane(#[source] E),
}

/// Result of a successful injection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InjectedCredential {
    /// Path of the locally persisted private key.
    pub private_key_path: Utf8PathBuf,
    /// External address of the instance.
    pub external_ip: String,
}

/// Injects one-time SSH credentials into instances of one project/zone.
#[derive(Debug)]
pub struct CredentialInjector<'a, C: ComputePlane> {
    plane: &'a C,
    keys: &'a KeyStore,
    project: &'a str,
    zone: &'a str,
    poll_interval: Duration,
}

impl<'a, C: ComputePlane> CredentialInjector<'a, C> {
    /// Creates an injector writing keys through `keys`.
    #[must_use]
    pub const fn new(plane: &'a C, keys: &'a KeyStore, project: &'a str, zone: &'a str) -> Self {
        Self {
            plane,
            keys,
            project,
            zone,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the interval used while waiting on the update operation.
    ///
    /// This is primarily used by tests to keep polling fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Generates a keypair for `username`, merges its public half into the
    /// instance's `ssh-keys` metadata, and returns the local private key
    /// path together with the instance's external address.
    ///
    /// The private key file is removed again if any later step fails, so a
    /// failed injection leaves no credential behind.
    ///
    /// # Errors
    ///
    /// Returns [`InjectError::InstanceNotFound`] when the instance is
    /// missing, [`InjectError::Update`] when the metadata operation fails
    /// (including stale-fingerprint rejections), and
    /// [`InjectError::MissingExternalIp`] when no NAT address is assigned.
    pub async fn inject(
        &self,
        instance_name: &str,
        username: &str,
    ) -> Result<InjectedCredential, InjectError<C::Error>> {
        debug!(instance = instance_name, "fetching instance metadata");
        let current = self
            .plane
            .get_instance(self.project, self.zone, instance_name)
            .await
            .map_err(InjectError::Plane)?
            .ok_or_else(|| InjectError::InstanceNotFound {
                name: instance_name.to_owned(),
            })?;

        let fingerprint = current.metadata.fingerprint.clone();
        let mut key_lines: Vec<String> = Vec::new();
        let mut other_items: Vec<MetadataItem> = Vec::new();
        for item in current.metadata.items {
            if item.key == SSH_KEYS_METADATA_KEY {
                key_lines.extend(item.value.lines().map(str::to_owned));
            } else {
                other_items.push(item);
            }
        }

        info!("generating keypair");
        let keypair = Keypair::generate(username)?;
        let public_key = keypair.public_openssh()?;
        let key_path = self.keys.write_private_key(instance_name, &keypair)?;
        info!(path = %key_path, "private key file written");

        key_lines.push(format!("{username}:{public_key}"));
        let mut items = vec![MetadataItem::new(
            SSH_KEYS_METADATA_KEY,
            key_lines.join("\n"),
        )];
        items.extend(other_items);
        let metadata = Metadata { fingerprint, items };

        let result = self
            .submit_and_resolve(instance_name, username, &metadata)
            .await;
        if result.is_err() {
            // A failed injection must not leave the one-time key behind.
            self.keys.remove(&key_path).ok();
        }
        let external_ip = result?;

        Ok(InjectedCredential {
            private_key_path: key_path,
            external_ip,
        })
    }

    async fn submit_and_resolve(
        &self,
        instance_name: &str,
        username: &str,
        metadata: &Metadata,
    ) -> Result<String, InjectError<C::Error>> {
        info!(user = username, "adding public key to instance metadata");
        let operation = self
            .plane
            .set_instance_metadata(self.project, self.zone, instance_name, metadata)
            .await
            .map_err(InjectError::Plane)?;
        OperationPoller::new(self.plane, self.project, self.zone)
            .with_interval(self.poll_interval)
            .wait(&operation.name)
            .await
            .map_err(InjectError::Update)?;

        let refreshed = self
            .plane
            .get_instance(self.project, self.zone, instance_name)
            .await
            .map_err(InjectError::Plane)?
            .ok_or_else(|| InjectError::InstanceNotFound {
                name: instance_name.to_owned(),
            })?;
        let external_ip = refreshed
            .external_ip()
            .ok_or_else(|| InjectError::MissingExternalIp {
                name: instance_name.to_owned(),
            })?;
        info!(instance = instance_name, ip = external_ip, "external address assigned");
        Ok(external_ip.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{done_operation, instance_with, FakePlane, PlaneCall};
    use camino::Utf8PathBuf;

    fn key_store() -> (tempfile::TempDir, KeyStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = Utf8PathBuf::from_path_buf(tmp.path().join("secrets")).expect("utf8 path");
        (tmp, KeyStore::new(dir))
    }

    fn injector<'a>(plane: &'a FakePlane, keys: &'a KeyStore) -> CredentialInjector<'a, FakePlane> {
        CredentialInjector::new(plane, keys, "proj", "zone")
            .with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn merge_keeps_unrelated_items_and_fingerprint() {
        let plane = FakePlane::new();
        plane.push_instance(Some(instance_with(
            "t1",
            Some("fp-1"),
            &[
                ("bucket", "test-bucket"),
                (SSH_KEYS_METADATA_KEY, "alice:ssh-ed25519 AAAA alice"),
                ("video", "123test"),
            ],
            Some("203.0.113.5"),
        )));
        plane.push_operation(done_operation("op-meta"));
        plane.push_instance(Some(instance_with("t1", Some("fp-2"), &[], Some("203.0.113.5"))));
        let (_tmp, keys) = key_store();

        let credential = injector(&plane, &keys)
            .inject("t1", "gcpfire")
            .await
            .expect("inject should succeed");

        assert_eq!(credential.external_ip, "203.0.113.5");
        assert!(credential.private_key_path.as_std_path().exists());

        let bodies = plane.metadata_bodies();
        let body = bodies.first().expect("one metadata update");
        assert_eq!(body.fingerprint.as_deref(), Some("fp-1"));

        let keys_entry = body
            .items
            .iter()
            .find(|item| item.key == SSH_KEYS_METADATA_KEY)
            .expect("ssh-keys entry");
        let lines: Vec<&str> = keys_entry.value.lines().collect();
        assert_eq!(lines.first().copied(), Some("alice:ssh-ed25519 AAAA alice"));
        assert_eq!(lines.len(), 2);
        assert!(
            lines.get(1).is_some_and(|line| line.starts_with("gcpfire:ssh-ed25519 ")),
            "unexpected appended line: {lines:?}"
        );

        let other_keys: Vec<&str> = body
            .items
            .iter()
            .filter(|item| item.key != SSH_KEYS_METADATA_KEY)
            .map(|item| item.key.as_str())
            .collect();
        assert_eq!(other_keys, ["bucket", "video"], "unrelated items must survive in order");
    }

    #[tokio::test]
    async fn absent_ssh_keys_entry_starts_a_fresh_list() {
        let plane = FakePlane::new();
        plane.push_instance(Some(instance_with(
            "t1",
            Some("fp-1"),
            &[("bucket", "b")],
            Some("203.0.113.5"),
        )));
        plane.push_operation(done_operation("op-meta"));
        plane.push_instance(Some(instance_with("t1", Some("fp-2"), &[], Some("203.0.113.5"))));
        let (_tmp, keys) = key_store();

        injector(&plane, &keys)
            .inject("t1", "gcpfire")
            .await
            .expect("inject should succeed");

        let bodies = plane.metadata_bodies();
        let keys_entry = bodies
            .first()
            .and_then(|body| body.items.iter().find(|item| item.key == SSH_KEYS_METADATA_KEY))
            .expect("ssh-keys entry");
        assert_eq!(keys_entry.value.lines().count(), 1);
    }

    #[tokio::test]
    async fn missing_instance_is_reported() {
        let plane = FakePlane::new();
        plane.push_instance(None);
        let (_tmp, keys) = key_store();

        let err = injector(&plane, &keys)
            .inject("t1", "gcpfire")
            .await
            .expect_err("inject should fail");

        assert!(matches!(err, InjectError::InstanceNotFound { ref name } if name == "t1"));
        assert!(
            !plane
                .calls()
                .iter()
                .any(|call| matches!(call, PlaneCall::SetMetadata { .. })),
            "no update may be submitted for a missing instance"
        );
    }

    #[tokio::test]
    async fn failed_update_removes_the_written_key() {
        let plane = FakePlane::new();
        plane.push_instance(Some(instance_with("t1", Some("fp-1"), &[], Some("203.0.113.5"))));
        plane.push_operation(crate::test_support::failed_operation(
            "op-meta",
            "CONDITION_NOT_MET",
            "fingerprint mismatch",
        ));
        let (tmp, keys) = key_store();

        let err = injector(&plane, &keys)
            .inject("t1", "gcpfire")
            .await
            .expect_err("inject should fail");

        assert!(matches!(err, InjectError::Update(_)));
        let secrets = tmp.path().join("secrets");
        let leftovers = std::fs::read_dir(&secrets)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0, "failed injection must not leave a key file");
    }

    #[tokio::test]
    async fn missing_external_ip_is_reported() {
        let plane = FakePlane::new();
        plane.push_instance(Some(instance_with("t1", Some("fp-1"), &[], None)));
        plane.push_operation(done_operation("op-meta"));
        plane.push_instance(Some(instance_with("t1", Some("fp-2"), &[], None)));
        let (_tmp, keys) = key_store();

        let err = injector(&plane, &keys)
            .inject("t1", "gcpfire")
            .await
            .expect_err("inject should fail");

        assert!(matches!(err, InjectError::MissingExternalIp { .. }));
    }
}
