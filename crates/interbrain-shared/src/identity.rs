use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::types::PeerId;

/// The local user's signing identity based on Ed25519.
/// The public key, rendered as a `did:key`, is the peer identity.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

/// Serializable format for storing the identity on disk
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: String,
    pub peer_id: PeerId,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Load the key file at `path`, generating and persisting one if absent.
    pub fn load_or_generate(path: &Path) -> Result<Self, IdentityError> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| IdentityError::KeyFile(format!("{}: {e}", path.display())))?;
            let export: IdentityExport = serde_json::from_str(&raw)
                .map_err(|e| IdentityError::KeyFile(format!("{}: {e}", path.display())))?;
            let bytes = hex::decode(export.secret_key.trim())
                .map_err(|_| IdentityError::InvalidKeyBytes)?;
            let secret: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::InvalidKeyBytes)?;
            let identity = Self::from_secret_bytes(&secret);
            if identity.peer_id() != export.peer_id {
                return Err(IdentityError::KeyFile(format!(
                    "{}: stored peer id does not match key",
                    path.display()
                )));
            }
            return Ok(identity);
        }

        let identity = Self::generate();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(&identity.to_export())
            .map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| IdentityError::KeyFile(e.to_string()))?;
        Ok(identity)
    }

    /// Get the peer identity (`did:key`)
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key_bytes())
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Export identity for serialization
    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: hex::encode(self.signing_key.as_bytes()),
            peer_id: self.peer_id(),
        }
    }
}

/// Verify a signature made by the holder of `peer`'s key
pub fn verify_signature(
    peer: &PeerId,
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let key = peer
        .public_key()
        .ok_or_else(|| IdentityError::InvalidPeerId(peer.to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidKeyBytes)
}
