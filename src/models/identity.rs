//! The local client identity: a user id and a P-384 keypair.
//!
//! Key material is persisted as DER: the private key in SEC1 form, the
//! public key as a SubjectPublicKeyInfo document.

use crate::{Error, Result};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::Serialize;

/// Raw key material for a freshly generated identity.
pub struct GeneratedKeys {
    pub private_key_bytes: Vec<u8>,
    pub public_key_bytes: Vec<u8>,
}

/// Generate a new P-384 keypair and serialize it.
pub fn generate_keypair() -> Result<GeneratedKeys> {
    let secret = SecretKey::random(&mut OsRng);
    let private_key_bytes = secret
        .to_sec1_der()
        .map_err(|e| Error::Key(format!("encoding (sec1) private key: {}", e)))?
        .to_vec();
    let public_key_bytes = secret
        .public_key()
        .to_public_key_der()
        .map_err(|e| Error::Key(format!("encoding (spki) public key: {}", e)))?
        .as_bytes()
        .to_vec();
    Ok(GeneratedKeys {
        private_key_bytes,
        public_key_bytes,
    })
}

/// The single local user identity.
#[derive(Debug, Clone, Serialize)]
pub struct ClientIdentity {
    #[serde(rename = "userid")]
    pub user_id: String,
    #[serde(rename = "activesessionid")]
    pub active_session_id: String,
    #[serde(skip)]
    pub private_key_bytes: Vec<u8>,
    #[serde(skip)]
    pub public_key_bytes: Vec<u8>,
    #[serde(skip)]
    pub private_key: SecretKey,
    #[serde(skip)]
    pub public_key: PublicKey,
}

impl ClientIdentity {
    /// Parse stored key material; any defect means the store is corrupt.
    pub fn from_stored(
        user_id: String,
        active_session_id: String,
        private_key_bytes: Vec<u8>,
        public_key_bytes: Vec<u8>,
    ) -> Result<Self> {
        if user_id.is_empty() {
            return Err(Error::CorruptStore(
                "invalid client data (no userid)".to_string(),
            ));
        }
        if private_key_bytes.is_empty() || public_key_bytes.is_empty() {
            return Err(Error::CorruptStore(
                "invalid client data (no public/private keypair)".to_string(),
            ));
        }
        let private_key = SecretKey::from_sec1_der(&private_key_bytes).map_err(|e| {
            Error::CorruptStore(format!(
                "invalid client data, cannot parse private key: {}",
                e
            ))
        })?;
        let public_key = PublicKey::from_public_key_der(&public_key_bytes).map_err(|e| {
            Error::CorruptStore(format!(
                "invalid client data, cannot parse public key: {}",
                e
            ))
        })?;
        if private_key.public_key() != public_key {
            return Err(Error::CorruptStore(
                "invalid client data, public key does not match private key".to_string(),
            ));
        }
        Ok(Self {
            user_id,
            active_session_id,
            private_key_bytes,
            public_key_bytes,
            private_key,
            public_key,
        })
    }
}
