use crate::error::{Error, Result};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{RsaPssSaltlen, Signer, Verifier};
use std::fs::read;
use std::path::Path;
use zeroize::{ZeroizeOnDrop, Zeroizing};

pub mod signable;

/// Smallest RSA modulus accepted for generated keys.
pub const MIN_RSA_BITS: u32 = 2048;

/// Secure wrapper for private key data that zeroizes on drop
#[derive(ZeroizeOnDrop)]
pub struct SecurePrivateKey {
    #[zeroize(skip)]
    pkey: PKey<Private>,
    // PKCS#8 PEM the key was loaded from or serialized to
    key_data: Zeroizing<Vec<u8>>,
}

impl SecurePrivateKey {
    /// Create a new SecurePrivateKey from raw PEM data
    pub fn from_pem(pem_data: Vec<u8>) -> Result<Self> {
        let zeroizing_pem = Zeroizing::new(pem_data);

        let pkey = PKey::private_key_from_pem(&zeroizing_pem)
            .map_err(|e| Error::Signing(format!("Failed to load private key: {e}")))?;
        if pkey.rsa().is_err() {
            return Err(Error::Signing("Only RSA keys are supported".to_string()));
        }

        Ok(Self {
            pkey,
            key_data: zeroizing_pem,
        })
    }

    /// Generate a fresh RSA key of `bits` bits.
    pub fn generate_rsa(bits: u32) -> Result<Self> {
        if bits < MIN_RSA_BITS {
            return Err(Error::Configuration(format!(
                "RSA keys must be at least {MIN_RSA_BITS} bits, got {bits}"
            )));
        }
        let rsa = Rsa::generate(bits)
            .map_err(|e| Error::Signing(format!("Failed to generate RSA key: {e}")))?;
        let pkey = PKey::from_rsa(rsa)?;
        pkey_to_secure(pkey)
    }

    /// Get a reference to the inner PKey
    pub fn as_pkey(&self) -> &PKey<Private> {
        &self.pkey
    }

    /// PKCS#8 PEM encoding of the private key.
    pub fn private_key_pem(&self) -> &[u8] {
        &self.key_data
    }

    /// SubjectPublicKeyInfo PEM encoding of the matching public key.
    pub fn public_key_pem(&self) -> Result<String> {
        let pem = self
            .pkey
            .public_key_to_pem()
            .map_err(|e| Error::Signing(format!("Failed to export public key: {e}")))?;
        String::from_utf8(pem).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Load a private key from a file path with automatic zeroization
pub fn load_private_key(key_path: &Path) -> Result<SecurePrivateKey> {
    let key_data = read(key_path)?;
    SecurePrivateKey::from_pem(key_data)
}

/// Parse a PEM encoded public key.
pub fn public_key_from_pem(pem: &str) -> Result<PKey<Public>> {
    PKey::public_key_from_pem(pem.as_bytes())
        .map_err(|e| Error::Signing(format!("Failed to load public key: {e}")))
}

/// Sign data with RSASSA-PSS over SHA-256.
///
/// PSS is randomized, so signing the same data twice yields different signatures.
pub fn sign_data(data: &[u8], private_key: &SecurePrivateKey) -> Result<Vec<u8>> {
    let mut signer = Signer::new(MessageDigest::sha256(), private_key.as_pkey())
        .map_err(|e| Error::Signing(format!("Failed to create signer: {e}")))?;
    signer.set_rsa_padding(Padding::PKCS1_PSS)?;
    signer.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;

    signer
        .update(data)
        .map_err(|e| Error::Signing(format!("Failed to update signer: {e}")))?;

    signer
        .sign_to_vec()
        .map_err(|e| Error::Signing(format!("Failed to sign data: {e}")))
}

/// Verify an RSASSA-PSS/SHA-256 signature.
pub fn verify_signature(data: &[u8], signature: &[u8], public_key: &PKey<Public>) -> Result<bool> {
    let mut verifier = Verifier::new(MessageDigest::sha256(), public_key)?;
    verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
    verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    verifier.update(data)?;

    // openssl reports a malformed signature as an error rather than `false`
    Ok(verifier.verify(signature).unwrap_or(false))
}

pub fn pkey_to_secure(pkey: PKey<Private>) -> Result<SecurePrivateKey> {
    let pem_data = pkey
        .private_key_to_pem_pkcs8()
        .map_err(|e| Error::Signing(format!("Failed to export key to PEM: {e}")))?;

    SecurePrivateKey::from_pem(pem_data)
}
