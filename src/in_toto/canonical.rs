//! Canonical JSON encoding.
//!
//! Signatures and keyids are computed over OLPC canonical JSON, the encoding
//! in-toto and securesystemslib verify against: sorted object keys, no
//! insignificant whitespace, and strings that escape only `"` and `\`. Control
//! characters such as the newlines of a PEM key are written as raw bytes.
//! Floating point numbers cannot be encoded.

use crate::error::{Error, Result};
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;

pub fn to_canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value
        .serialize(&mut serializer)
        .map_err(|e| Error::Serialization(format!("Failed to canonicalize JSON: {e}")))?;
    Ok(buf)
}
