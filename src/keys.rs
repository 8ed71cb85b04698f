//! One-time SSH credentials and their on-disk storage.
//!
//! Each orchestration run generates a fresh Ed25519 keypair. The private
//! half is persisted under the secrets directory with owner-only
//! permissions and removed again by the same run's cleanup step.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::{OpenOptions, Permissions};
use cap_std::{ambient_authority, fs_utf8::Dir};
use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey, PublicKey};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Errors raised while generating or storing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Raised when keypair generation or serialization fails.
    #[error("key generation failed: {0}")]
    Generate(#[from] ssh_key::Error),
    /// Raised when the private key file cannot be written.
    #[error("failed to write private key under {dir}: {message}")]
    Write {
        /// Secrets directory that rejected the write.
        dir: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
    /// Raised when a key file cannot be removed.
    #[error("failed to remove key file {path}: {message}")]
    Remove {
        /// Path of the key file.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Freshly generated SSH keypair with the username as its comment.
#[derive(Clone, Debug)]
pub struct Keypair {
    private: PrivateKey,
    public: PublicKey,
}

impl Keypair {
    /// Generates a new Ed25519 keypair commented with `username`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generate`] when the system RNG or key encoding
    /// fails.
    pub fn generate(username: &str) -> Result<Self, KeyError> {
        debug!("generating keypair");
        let private = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
        let mut public = private.public_key().clone();
        public.set_comment(username);
        Ok(Self { private, public })
    }

    /// Serializes the private key in OpenSSH PEM form.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generate`] when encoding fails.
    pub fn private_pem(&self) -> Result<String, KeyError> {
        Ok(self.private.to_openssh(LineEnding::LF)?.to_string())
    }

    /// Serializes the public key in OpenSSH `authorized_keys` form,
    /// including the username comment.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generate`] when encoding fails.
    pub fn public_openssh(&self) -> Result<String, KeyError> {
        Ok(self.public.to_openssh()?)
    }
}

/// Local secret storage for per-run private keys.
#[derive(Clone, Debug)]
pub struct KeyStore {
    dir: Utf8PathBuf,
}

impl KeyStore {
    /// Creates a store rooted at `dir`; the directory is created lazily on
    /// the first write.
    #[must_use]
    pub const fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    /// Writes the private half of `keypair` for `instance` and returns the
    /// file path. The file is created fresh with mode `0o600`; a random
    /// suffix keeps concurrent runs of the same job name apart.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Write`] when the directory or file cannot be
    /// created, and [`KeyError::Generate`] when serialization fails.
    pub fn write_private_key(
        &self,
        instance: &str,
        keypair: &Keypair,
    ) -> Result<Utf8PathBuf, KeyError> {
        let pem = keypair.private_pem()?;
        std::fs::create_dir_all(self.dir.as_std_path()).map_err(|err| KeyError::Write {
            dir: self.dir.clone(),
            message: err.to_string(),
        })?;
        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(|err| {
            KeyError::Write {
                dir: self.dir.clone(),
                message: err.to_string(),
            }
        })?;

        let file_name = format!("{instance}-{}.key", Uuid::new_v4().simple());
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let write_err = |err: std::io::Error| KeyError::Write {
            dir: self.dir.clone(),
            message: err.to_string(),
        };
        let mut file = dir.open_with(&file_name, &options).map_err(write_err)?;
        file.set_permissions(Permissions::from_std(permissions_0600()))
            .map_err(write_err)?;
        file.write_all(pem.as_bytes()).map_err(write_err)?;

        Ok(self.dir.join(file_name))
    }

    /// Removes a previously written key file. Removing a file that is
    /// already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Remove`] when the file exists but cannot be
    /// deleted.
    pub fn remove(&self, path: &Utf8Path) -> Result<(), KeyError> {
        debug!(%path, "deleting local key file");
        let parent = path.parent().unwrap_or_else(|| Utf8Path::new("."));
        let Some(file_name) = path.file_name() else {
            return Ok(());
        };

        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(KeyError::Remove {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                });
            }
        };
        match dir.remove_file(file_name) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KeyError::Remove {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }
}

fn permissions_0600() -> std::fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    std::fs::Permissions::from_mode(0o600)
}
