//! Classic in-toto metadata envelope: `{"signed": <body>, "signatures": [...]}`.
//!
//! Signatures cover the canonical JSON of `signed` and are hex encoded.

use crate::error::{Error, Result};
use crate::in_toto::canonical;
use crate::keys::{KeyId, PublicKeyRecord};
use crate::signing::signable::Signable;
use crate::signing::{self, SecurePrivateKey};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: KeyId,
    pub sig: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metablock<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Metablock<T> {
    pub fn new(signed: T) -> Self {
        Self {
            signed,
            signatures: Vec::new(),
        }
    }

    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        canonical::to_canonical_bytes(&self.signed)
    }

    /// True if a signature by `key` is present and valid.
    pub fn verify(&self, key: &PublicKeyRecord) -> Result<bool> {
        let data = self.signed_bytes()?;
        for signature in self.signatures.iter().filter(|s| s.keyid == key.keyid) {
            let sig = hex::decode(&signature.sig)?;
            if key.verify(&data, &sig)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl<T: Serialize> Signable for Metablock<T> {
    fn sign(&mut self, key: &SecurePrivateKey) -> Result<()> {
        let keyid = PublicKeyRecord::from_private(key)?.keyid;
        let signature = signing::sign_data(&self.signed_bytes()?, key)?;
        if signature.is_empty() {
            return Err(Error::Signing("Signature cannot be empty".to_string()));
        }

        self.signatures.push(Signature {
            keyid,
            sig: hex::encode(signature),
        });
        Ok(())
    }
}
