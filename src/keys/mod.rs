//! # Key provisioning
//!
//! Every role in a supply chain (layout owner, each functionary, each sublayout
//! owner) gets its own RSA keypair. Keys are stored as PKCS#8 PEM files under
//! `keys/<chain>-<role>` with the public half next to it as `<name>.pub`.
//!
//! Public keys are described by a [`PublicKeyRecord`] in the securesystemslib
//! format used by in-toto. The keyid is the SHA-256 of the canonical JSON of
//! the record (without the keyid field itself), so it is stable across loads.
//! The embedded PEM runs from its header through its footer with no trailing
//! newline, which is what securesystemslib hashes when it imports a `.pub`.

use crate::error::{Error, Result};
use crate::in_toto::canonical;
use crate::signing::{self, SecurePrivateKey};
use crate::utils::{safe_open_file, write_new_file};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Number of hex characters of a keyid used in link file names.
pub const KEYID_PREFIX_LEN: usize = 8;

pub const KEY_TYPE_RSA: &str = "rsa";
pub const SCHEME_RSASSA_PSS_SHA256: &str = "rsassa-pss-sha256";

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// Hex encoded SHA-256 identifier of a public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(hex_id: impl Into<String>) -> Result<Self> {
        let hex_id = hex_id.into();
        let decoded = hex::decode(&hex_id)?;
        if decoded.len() != 32 {
            return Err(Error::Validation(format!(
                "keyid must be 32 bytes of hex, got {} bytes",
                decoded.len()
            )));
        }
        Ok(Self(hex_id.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters used in link file names (`<step>.<prefix>.link`).
    pub fn short(&self) -> &str {
        self.0.get(..KEYID_PREFIX_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub public: String,
}

/// Public half of a keypair as embedded in a layout's `keys` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub keyid: KeyId,
    pub keytype: String,
    pub scheme: String,
    pub keyid_hash_algorithms: Vec<String>,
    pub keyval: KeyValue,
}

// The fields a keyid is computed over.
#[derive(Serialize)]
struct KeyIdInput<'a> {
    keytype: &'a str,
    scheme: &'a str,
    keyid_hash_algorithms: &'a [String],
    keyval: &'a KeyValue,
}

/// The public key block of `pem`, header through footer.
pub fn extract_public_pem(pem: &str) -> Result<&str> {
    let start = pem
        .find(PEM_HEADER)
        .ok_or_else(|| Error::Validation("Public key PEM header not found".to_string()))?;
    let end = pem[start..]
        .find(PEM_FOOTER)
        .map(|offset| start + offset + PEM_FOOTER.len())
        .ok_or_else(|| Error::Validation("Public key PEM footer not found".to_string()))?;
    Ok(&pem[start..end])
}

impl PublicKeyRecord {
    /// Build a record from a PEM public key, deriving its keyid.
    pub fn from_public_pem(pem: &str) -> Result<Self> {
        let public_pem = extract_public_pem(pem)?.to_string();
        // reject anything openssl cannot parse before it lands in a layout
        signing::public_key_from_pem(&public_pem)?;

        let keyval = KeyValue { public: public_pem };
        let keyid_hash_algorithms = vec!["sha256".to_string(), "sha512".to_string()];
        let input = KeyIdInput {
            keytype: KEY_TYPE_RSA,
            scheme: SCHEME_RSASSA_PSS_SHA256,
            keyid_hash_algorithms: &keyid_hash_algorithms,
            keyval: &keyval,
        };
        let digest = Sha256::digest(canonical::to_canonical_bytes(&input)?);

        Ok(Self {
            keyid: KeyId(hex::encode(digest)),
            keytype: KEY_TYPE_RSA.to_string(),
            scheme: SCHEME_RSASSA_PSS_SHA256.to_string(),
            keyid_hash_algorithms,
            keyval,
        })
    }

    pub fn from_private(key: &SecurePrivateKey) -> Result<Self> {
        Self::from_public_pem(&key.public_key_pem()?)
    }

    /// Verify `signature` over `data` with this key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let pkey = signing::public_key_from_pem(&self.keyval.public)?;
        signing::verify_signature(data, signature, &pkey)
    }
}

/// A provisioned keypair for one role.
pub struct KeyPair {
    pub id: KeyId,
    pub public: PublicKeyRecord,
    pub private: SecurePrivateKey,
}

impl KeyPair {
    pub fn from_private(private: SecurePrivateKey) -> Result<Self> {
        let public = PublicKeyRecord::from_private(&private)?;
        Ok(Self {
            id: public.keyid.clone(),
            public,
            private,
        })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Produces and loads named keypairs.
pub trait KeyProvisioner: Send + Sync {
    /// Generate a new keypair called `name` and persist it. Fails if it exists.
    fn generate(&self, name: &str) -> Result<KeyPair>;
    fn load_private(&self, name: &str) -> Result<SecurePrivateKey>;
    fn load_public(&self, name: &str) -> Result<PublicKeyRecord>;
    /// Paths a successful `generate(name)` creates.
    fn locations(&self, name: &str) -> Vec<PathBuf>;
}

/// Stores keys as PEM files in one directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
    bits: u32,
}

impl FileKeyStore {
    pub fn new(dir: impl Into<PathBuf>, bits: u32) -> Self {
        Self {
            dir: dir.into(),
            bits,
        }
    }

    pub fn private_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn public_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.pub"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl KeyProvisioner for FileKeyStore {
    fn generate(&self, name: &str) -> Result<KeyPair> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(Error::KeyProvisioning(format!("Invalid key name: {name:?}")));
        }
        let private_path = self.private_path(name);
        let public_path = self.public_path(name);

        let failed =
            |e: Error| Error::KeyProvisioning(format!("Failed to generate key {name}: {e}"));

        let private = SecurePrivateKey::generate_rsa(self.bits).map_err(failed)?;
        let pair = KeyPair::from_private(private).map_err(failed)?;

        write_new_file(&private_path, pair.private.private_key_pem()).map_err(failed)?;
        let public_pem = format!("{}\n", pair.public.keyval.public);
        if let Err(e) = write_new_file(&public_path, public_pem.as_bytes()) {
            // never leave a private key without its public half
            let _ = std::fs::remove_file(&private_path);
            return Err(failed(e));
        }

        debug!("Generated key {name} with keyid {}", pair.id);
        Ok(pair)
    }

    fn load_private(&self, name: &str) -> Result<SecurePrivateKey> {
        signing::load_private_key(&self.private_path(name)).map_err(|e| {
            Error::KeyProvisioning(format!("Failed to load private key {name}: {e}"))
        })
    }

    fn load_public(&self, name: &str) -> Result<PublicKeyRecord> {
        let path = self.public_path(name);
        let mut pem = String::new();
        safe_open_file(&path)
            .and_then(|mut f| Ok(f.read_to_string(&mut pem)?))
            .map_err(|e| Error::KeyProvisioning(format!("Failed to load public key {name}: {e}")))?;
        PublicKeyRecord::from_public_pem(&pem)
    }

    fn locations(&self, name: &str) -> Vec<PathBuf> {
        vec![self.private_path(name), self.public_path(name)]
    }
}
