//! Dead Simple Signing Envelope.
//!
//! Signatures cover the pre-authentication encoding (PAE) of the payload type
//! and payload, never the raw payload alone.

use crate::error::{Error, Result};
use crate::keys::PublicKeyRecord;
use crate::signing;
use crate::signing::SecurePrivateKey;
use crate::signing::signable::Signable;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

pub const DSSE_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde_as(as = "serde_with::base64::Base64")]
    pub sig: Vec<u8>,
    pub keyid: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde_as(as = "serde_with::base64::Base64")]
    payload: Vec<u8>,
    payload_type: String,
    signatures: Vec<Signature>,
}

/// `"DSSEv1" SP LEN(type) SP type SP LEN(body) SP body`
pub fn pre_auth_encoding(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut encoded = format!(
        "DSSEv1 {} {} {} ",
        payload_type.len(),
        payload_type,
        payload.len()
    )
    .into_bytes();
    encoded.extend_from_slice(payload);
    encoded
}

impl Envelope {
    pub fn new(payload: Vec<u8>, payload_type: impl Into<String>) -> Self {
        Self {
            payload,
            payload_type: payload_type.into(),
            signatures: vec![],
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_type(&self) -> &str {
        &self.payload_type
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn add_signature(&mut self, sig: Vec<u8>, keyid: String) -> Result<()> {
        if sig.is_empty() {
            return Err(Error::Signing("DSSE signature cannot be empty".to_string()));
        }

        self.signatures.push(Signature { sig, keyid });
        Ok(())
    }

    pub fn validate(&self) -> bool {
        !self.payload.is_empty()
            && !self.payload_type.is_empty()
            && !self.signatures.is_empty()
            && self.signatures.iter().all(|s| !s.sig.is_empty())
    }

    /// True if a signature by `key` is present and valid.
    pub fn verify(&self, key: &PublicKeyRecord) -> Result<bool> {
        let pae = pre_auth_encoding(&self.payload_type, &self.payload);
        for signature in self
            .signatures
            .iter()
            .filter(|s| s.keyid == key.keyid.as_str())
        {
            if key.verify(&pae, &signature.sig)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Signable for Envelope {
    fn sign(&mut self, key: &SecurePrivateKey) -> Result<()> {
        let keyid = PublicKeyRecord::from_private(key)?.keyid;
        let pae = pre_auth_encoding(&self.payload_type, &self.payload);
        let signature = signing::sign_data(&pae, key)?;

        self.add_signature(signature, keyid.to_string())
    }
}
