//! # Hash Module
//!
//! Content digests for link records. Artifacts are hashed with a streaming
//! reader so archives of any size can be snapshotted, and recorded as an in-toto
//! digest set (`{"sha256": "<hex>"}`).
//!
//! ## Examples
//!
//! ```
//! use supply_chain_stress::hash::{HashAlgorithm, calculate_hash_with_algorithm};
//!
//! let hash = calculate_hash_with_algorithm(b"Hello, World!", &HashAlgorithm::Sha256);
//! assert_eq!(hash.len(), 64);
//! ```

use crate::error::Result;
use crate::utils::safe_open_file;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::Path;
use subtle::ConstantTimeEq;

/// Digest algorithm name to hex digest, as recorded in link materials/products.
pub type DigestSet = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Calculate hash of data using the specified algorithm
///
/// Returns a lowercase hex string: 64, 96 or 128 characters.
pub fn calculate_hash_with_algorithm(data: &[u8], algorithm: &HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        HashAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
    }
}

/// Calculate hash of a file using the specified algorithm
///
/// The file is read in chunks, never loaded whole.
pub fn calculate_file_hash_with_algorithm(
    path: impl AsRef<Path>,
    algorithm: &HashAlgorithm,
) -> Result<String> {
    let file = safe_open_file(path.as_ref())?;

    match algorithm {
        HashAlgorithm::Sha256 => hash_reader::<Sha256, _>(file),
        HashAlgorithm::Sha384 => hash_reader::<Sha384, _>(file),
        HashAlgorithm::Sha512 => hash_reader::<Sha512, _>(file),
    }
}

/// Build the single-entry digest set recorded for a file.
pub fn file_digest_set(path: impl AsRef<Path>, algorithm: &HashAlgorithm) -> Result<DigestSet> {
    let digest = calculate_file_hash_with_algorithm(path, algorithm)?;
    Ok(DigestSet::from([(algorithm.as_str().to_string(), digest)]))
}

/// Compare two digest sets.
///
/// Sets are equal when they share at least one algorithm and every shared
/// algorithm carries the same digest. Comparison is constant time per digest.
pub fn digest_sets_match(left: &DigestSet, right: &DigestSet) -> bool {
    let mut shared = 0;
    for (alg, left_hex) in left {
        let Some(right_hex) = right.get(alg) else {
            continue;
        };
        shared += 1;

        let (Ok(left_bytes), Ok(right_bytes)) = (hex::decode(left_hex), hex::decode(right_hex))
        else {
            return false;
        };
        if left_bytes.len() != right_bytes.len() {
            return false;
        }
        if !bool::from(left_bytes.ct_eq(&right_bytes)) {
            return false;
        }
    }
    shared > 0
}

fn hash_reader<D: Digest, R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = D::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
