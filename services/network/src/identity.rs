//! Node identity
//!
//! A long-lived ed25519 keypair persisted at `{data_dir}/peerkey` (raw
//! 32-byte seed, owner-only permissions). Loaded verbatim on restart so the
//! node's peer id is stable across runs.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const KEY_FILENAME: &str = "peerkey";

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("read peerkey {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write peerkey {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("peerkey {path} is malformed: expected 32 bytes, found {len}")]
    Malformed { path: PathBuf, len: usize },
}

/// The node's signing identity.
pub struct NodeKey {
    signing: SigningKey,
}

impl NodeKey {
    /// Load the key from `{data_dir}/peerkey`, generating and persisting a
    /// fresh one on first start.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, IdentityError> {
        let path = data_dir.join(KEY_FILENAME);
        match std::fs::read(&path) {
            Ok(bytes) => {
                let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    IdentityError::Malformed {
                        path: path.clone(),
                        len: bytes.len(),
                    }
                })?;
                Ok(Self {
                    signing: SigningKey::from_bytes(&seed),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let signing = SigningKey::generate(&mut OsRng);
                std::fs::create_dir_all(data_dir).map_err(|source| IdentityError::Write {
                    path: path.clone(),
                    source,
                })?;
                write_owner_only(&path, &signing.to_bytes()).map_err(|source| {
                    IdentityError::Write {
                        path: path.clone(),
                        source,
                    }
                })?;
                info!(path = %path.display(), "generated node key");
                Ok(Self { signing })
            }
            Err(source) => Err(IdentityError::Read { path, source }),
        }
    }

    /// Ephemeral key, never persisted. Test and tooling use.
    pub fn ephemeral() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Stable peer id: hex of the verifying key.
    pub fn peer_id(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// Sign `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> io::Result<()> {
    std::fs::write(path, bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn test_peer_id_stable_across_restarts() {
        let tmp = tempfile::tempdir().unwrap();
        let first = NodeKey::load_or_create(tmp.path()).unwrap();
        let second = NodeKey::load_or_create(tmp.path()).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
        assert_eq!(first.peer_id().len(), 64);
    }

    #[test]
    fn test_distinct_dirs_distinct_identities() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let key_a = NodeKey::load_or_create(a.path()).unwrap();
        let key_b = NodeKey::load_or_create(b.path()).unwrap();
        assert_ne!(key_a.peer_id(), key_b.peer_id());
    }

    #[test]
    fn test_malformed_key_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("peerkey"), b"short").unwrap();
        assert!(matches!(
            NodeKey::load_or_create(tmp.path()),
            Err(IdentityError::Malformed { len: 5, .. })
        ));
    }

    #[test]
    fn test_signature_verifies() {
        let key = NodeKey::ephemeral();
        let sig = key.sign(b"payload");
        let sig = ed25519_dalek::Signature::from_bytes(&sig);
        assert!(key.verifying_key().verify(b"payload", &sig).is_ok());
    }
}
