//! # in-toto metadata
//!
//! Models and envelopes for the two documents a supply chain is made of:
//!
//! - **Layouts** ([`layout`]): the signed policy naming steps, functionaries,
//!   thresholds and artifact rules.
//! - **Links** ([`link`]): the signed record of one step execution.
//!
//! Both are wrapped in a [`SignedEnvelope`], either a classic in-toto
//! [`metablock::Metablock`] or a [`dsse::Envelope`]. Signatures are always
//! computed over canonical JSON ([`canonical`]), so a document survives a
//! load/store cycle without invalidating its signatures.
//!
//! ## Examples
//!
//! ```no_run
//! use supply_chain_stress::in_toto::{EnvelopeFormat, SignedEnvelope};
//! use supply_chain_stress::in_toto::link::Link;
//! use supply_chain_stress::signing::SecurePrivateKey;
//! use std::path::Path;
//!
//! let key = SecurePrivateKey::generate_rsa(3072).unwrap();
//! let envelope = SignedEnvelope::seal(Link::new("source"), &key, EnvelopeFormat::Metablock).unwrap();
//! envelope.dump(Path::new("source.link")).unwrap();
//! ```

use crate::error::{Error, Result};
use crate::keys::{KeyId, PublicKeyRecord};
use crate::signing::SecurePrivateKey;
use crate::signing::signable::Signable;
use crate::utils::{safe_open_file, write_new_file};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;

pub mod canonical;
pub mod dsse;
pub mod layout;
pub mod link;
pub mod metablock;
pub mod rules;

use dsse::{DSSE_PAYLOAD_TYPE, Envelope};
use metablock::Metablock;

/// The `_type` tag carried by every in-toto document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Layout,
    Link,
    Step,
}

/// On-disk envelope used for layouts and links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeFormat {
    #[default]
    Metablock,
    Dsse,
}

impl fmt::Display for EnvelopeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeFormat::Metablock => f.write_str("metablock"),
            EnvelopeFormat::Dsse => f.write_str("dsse"),
        }
    }
}

/// A layout or link together with its signatures.
#[derive(Debug, Clone)]
pub enum SignedEnvelope<T> {
    Metablock(Metablock<T>),
    Dsse { envelope: Envelope, body: T },
}

impl<T: Serialize + DeserializeOwned> SignedEnvelope<T> {
    /// Wrap `body` in the requested envelope and sign it once with `key`.
    pub fn seal(body: T, key: &SecurePrivateKey, format: EnvelopeFormat) -> Result<Self> {
        let mut envelope = match format {
            EnvelopeFormat::Metablock => SignedEnvelope::Metablock(Metablock::new(body)),
            EnvelopeFormat::Dsse => {
                // PAE covers the exact bytes, so the payload only needs to be
                // strict JSON; canonical form would leave control characters raw
                let payload = serde_json::to_vec(&serde_json::to_value(&body)?)?;
                SignedEnvelope::Dsse {
                    envelope: Envelope::new(payload, DSSE_PAYLOAD_TYPE),
                    body,
                }
            }
        };
        envelope.sign(key)?;
        Ok(envelope)
    }

    pub fn body(&self) -> &T {
        match self {
            SignedEnvelope::Metablock(block) => &block.signed,
            SignedEnvelope::Dsse { body, .. } => body,
        }
    }

    pub fn into_body(self) -> T {
        match self {
            SignedEnvelope::Metablock(block) => block.signed,
            SignedEnvelope::Dsse { body, .. } => body,
        }
    }

    pub fn format(&self) -> EnvelopeFormat {
        match self {
            SignedEnvelope::Metablock(_) => EnvelopeFormat::Metablock,
            SignedEnvelope::Dsse { .. } => EnvelopeFormat::Dsse,
        }
    }

    /// Keyids of all signatures, in signing order.
    pub fn signer_keyids(&self) -> Vec<String> {
        match self {
            SignedEnvelope::Metablock(block) => block
                .signatures
                .iter()
                .map(|s| s.keyid.to_string())
                .collect(),
            SignedEnvelope::Dsse { envelope, .. } => envelope
                .signatures()
                .iter()
                .map(|s| s.keyid.clone())
                .collect(),
        }
    }

    pub fn is_signed_by(&self, keyid: &KeyId) -> bool {
        self.signer_keyids().iter().any(|k| k == keyid.as_str())
    }

    pub fn verify(&self, key: &PublicKeyRecord) -> Result<bool> {
        match self {
            SignedEnvelope::Metablock(block) => block.verify(key),
            SignedEnvelope::Dsse { envelope, .. } => envelope.verify(key),
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            SignedEnvelope::Metablock(block) => serde_json::to_vec_pretty(block)?,
            SignedEnvelope::Dsse { envelope, .. } => serde_json::to_vec_pretty(envelope)?,
        };
        Ok(bytes)
    }

    /// Write the envelope to a new file. Existing files are never replaced.
    pub fn dump(&self, path: &Path) -> Result<()> {
        write_new_file(path, &self.to_json_bytes()?)
    }

    /// Read an envelope, detecting its format from the JSON shape.
    pub fn load(path: &Path) -> Result<Self> {
        let mut content = String::new();
        safe_open_file(path)?.read_to_string(&mut content)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;

        if value.get("payloadType").is_some() {
            let envelope: Envelope = serde_json::from_value(value)?;
            if !envelope.validate() {
                return Err(Error::Validation(
                    "DSSE envelope has an empty payload or no signatures".to_string(),
                ));
            }
            if envelope.payload_type() != DSSE_PAYLOAD_TYPE {
                return Err(Error::Serialization(format!(
                    "Unexpected DSSE payload type: {}",
                    envelope.payload_type()
                )));
            }
            let body = serde_json::from_slice(envelope.payload())?;
            Ok(SignedEnvelope::Dsse { envelope, body })
        } else if value.get("signed").is_some() {
            Ok(SignedEnvelope::Metablock(serde_json::from_value(value)?))
        } else {
            Err(Error::Serialization(
                "Document is neither a metablock nor a DSSE envelope".to_string(),
            ))
        }
    }
}

impl<T: Serialize> Signable for SignedEnvelope<T> {
    fn sign(&mut self, key: &SecurePrivateKey) -> Result<()> {
        match self {
            SignedEnvelope::Metablock(block) => block.sign(key),
            SignedEnvelope::Dsse { envelope, .. } => envelope.sign(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_toto::link::Link;
    use crate::signing::test_utils::generate_temp_key;
    use tempfile::tempdir;

    #[test]
    fn test_seal_dump_load_both_formats() -> Result<()> {
        let (key, dir) = generate_temp_key()?;
        let record = PublicKeyRecord::from_private(&key)?;

        for format in [EnvelopeFormat::Metablock, EnvelopeFormat::Dsse] {
            let sealed = SignedEnvelope::seal(Link::new("source"), &key, format)?;
            let path = dir.path().join(format!("source.{format}.link"));
            sealed.dump(&path)?;

            let loaded: SignedEnvelope<Link> = SignedEnvelope::load(&path)?;
            assert_eq!(loaded.format(), format);
            assert_eq!(loaded.body().name, "source");
            assert!(loaded.is_signed_by(&record.keyid));
            assert!(loaded.verify(&record)?);
        }
        Ok(())
    }

    #[test]
    fn test_dump_refuses_overwrite() -> Result<()> {
        let (key, _keydir) = generate_temp_key()?;
        let dir = tempdir()?;
        let path = dir.path().join("x.link");

        let sealed = SignedEnvelope::seal(Link::new("x"), &key, EnvelopeFormat::Metablock)?;
        sealed.dump(&path)?;
        assert!(matches!(sealed.dump(&path), Err(Error::AlreadyExists(_))));
        Ok(())
    }

    #[test]
    fn test_second_signature_is_appended() -> Result<()> {
        let (key1, _d1) = generate_temp_key()?;
        let (key2, _d2) = generate_temp_key()?;
        let record2 = PublicKeyRecord::from_private(&key2)?;

        let mut sealed = SignedEnvelope::seal(Link::new("x"), &key1, EnvelopeFormat::Dsse)?;
        sealed.sign(&key2)?;

        assert_eq!(sealed.signer_keyids().len(), 2);
        assert!(sealed.verify(&record2)?);
        Ok(())
    }

    #[test]
    fn test_unsigned_dsse_envelope_is_rejected() -> Result<()> {
        let unsigned = Envelope::new(b"{}".to_vec(), DSSE_PAYLOAD_TYPE);
        let json = serde_json::to_string(&unsigned)?;

        let result = SignedEnvelope::<Link>::from_json_str(&json);
        assert!(matches!(result, Err(Error::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_metablock_is_signed_over_canonical_bytes() -> Result<()> {
        let (key, _dir) = generate_temp_key()?;
        let record = PublicKeyRecord::from_private(&key)?;

        let mut link = Link::new("test");
        link.byproducts.stdout = "abc  artifacts/x.src\n".to_string();
        let sealed = SignedEnvelope::seal(link, &key, EnvelopeFormat::Metablock)?;

        // re-encode the pretty-printed document's `signed` member the way an
        // in-toto verifier does and check the signature against those bytes
        let document: serde_json::Value = serde_json::from_slice(&sealed.to_json_bytes()?)?;
        let signed = canonical::to_canonical_bytes(&document["signed"])?;
        assert!(
            signed
                .windows(b"x.src\n\"".len())
                .any(|w| w == b"x.src\n\"")
        );

        let sig = hex::decode(document["signatures"][0]["sig"].as_str().unwrap_or_default())?;
        assert!(record.verify(&signed, &sig)?);
        Ok(())
    }

    #[test]
    fn test_dsse_payload_is_strict_json() -> Result<()> {
        let (key, _dir) = generate_temp_key()?;
        let mut link = Link::new("test");
        link.byproducts.stdout = "abc  artifacts/x.src\n".to_string();

        let sealed = SignedEnvelope::seal(link.clone(), &key, EnvelopeFormat::Dsse)?;
        let SignedEnvelope::Dsse { envelope, .. } = &sealed else {
            panic!("expected a DSSE envelope");
        };
        assert!(!envelope.payload().contains(&b'\n'));

        let reparsed: Link = serde_json::from_slice(envelope.payload())?;
        assert_eq!(reparsed, link);
        Ok(())
    }

    #[test]
    fn test_unknown_document_shape() {
        let result = SignedEnvelope::<Link>::from_json_str(r#"{"hello": "world"}"#);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
