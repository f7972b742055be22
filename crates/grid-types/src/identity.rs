//! Twin identity used to sign deployments and authorize ledger calls

use crate::deployment::DeploymentSignature;
use crate::error::{Result, TypesError};
use crate::fingerprint::Fingerprint;
use crate::ids::TwinId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

const SIGNATURE_TYPE: &str = "ed25519";

/// A twin together with its ed25519 signing key
#[derive(Clone)]
pub struct Identity {
    twin_id: TwinId,
    signing_key: SigningKey,
}

impl Identity {
    /// Build an identity from a 32-byte secret seed
    pub fn from_seed(twin_id: TwinId, seed: [u8; 32]) -> Self {
        Self {
            twin_id,
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Build an identity from a hex encoded 32-byte seed
    pub fn from_hex_seed(twin_id: TwinId, seed: &str) -> Result<Self> {
        let bytes = hex::decode(seed.trim()).map_err(|e| TypesError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TypesError::InvalidKey("seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(twin_id, seed))
    }

    pub fn twin_id(&self) -> TwinId {
        self.twin_id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, hash: &Fingerprint) -> DeploymentSignature {
        let signature = self.signing_key.sign(hash.as_bytes());
        DeploymentSignature {
            twin_id: self.twin_id,
            signature: hex::encode(signature.to_bytes()),
            signature_type: SIGNATURE_TYPE.to_string(),
        }
    }

    /// Verify a signature produced by this identity over `hash`
    pub fn verify(&self, hash: &Fingerprint, signature: &DeploymentSignature) -> bool {
        verify_with_key(&self.signing_key.verifying_key(), hash, signature)
    }
}

fn verify_with_key(key: &VerifyingKey, hash: &Fingerprint, sig: &DeploymentSignature) -> bool {
    if sig.signature_type != SIGNATURE_TYPE {
        return false;
    }
    let Ok(bytes) = hex::decode(&sig.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(hash.as_bytes(), &signature).is_ok()
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("twin_id", &self.twin_id)
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}
