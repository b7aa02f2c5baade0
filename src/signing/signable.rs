//! # Signable Trait
//!
//! Common interface for the envelopes this crate writes. Both the classic
//! in-toto metablock and the DSSE envelope implement it, so the composer can
//! sign layouts and links without caring which wire format was selected.
//!
//! ## Examples
//!
//! ```no_run
//! use supply_chain_stress::in_toto::link::Link;
//! use supply_chain_stress::in_toto::metablock::Metablock;
//! use supply_chain_stress::signing::SecurePrivateKey;
//! use supply_chain_stress::signing::signable::Signable;
//!
//! let key = SecurePrivateKey::generate_rsa(3072).unwrap();
//! let mut envelope = Metablock::new(Link::new("source"));
//! envelope.sign(&key).unwrap();
//! ```

use crate::error::Result;
use crate::signing::SecurePrivateKey;

/// A trait for types that can be cryptographically signed.
///
/// Implementations serialize their payload canonically, sign it with the
/// given key and append the signature, tagged with the key's keyid. Signing
/// twice with different keys yields a multi-signature envelope.
pub trait Signable {
    /// Signs the implementing type with `key` and records the signature.
    ///
    /// ## Errors
    ///
    /// - the payload cannot be canonicalized
    /// - the cryptographic operation fails
    fn sign(&mut self, key: &SecurePrivateKey) -> Result<()>;
}
