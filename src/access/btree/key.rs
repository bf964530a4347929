//! Fixed-width, memcomparable index keys.
//!
//! B+ tree pages compare keys as raw bytes, so every supported value is
//! encoded such that byte order equals value order: integers big-endian
//! with the sign bit flipped, booleans as a single byte, strings as their
//! bytes. Composite keys concatenate the encodings; the result is
//! zero-padded to the index's fixed key width.

use crate::access::value::Value;
use anyhow::{Result, bail};

/// Key widths an index may be declared with.
pub const SUPPORTED_KEY_SIZES: [usize; 5] = [4, 8, 16, 32, 64];

pub fn is_supported_key_size(key_size: usize) -> bool {
    SUPPORTED_KEY_SIZES.contains(&key_size)
}

/// Encode index-key values into exactly `key_size` bytes.
pub fn encode_key(values: &[Value], key_size: usize) -> Result<Vec<u8>> {
    let mut encoded = Vec::with_capacity(key_size);
    for value in values {
        match value {
            Value::Null => bail!("NULL cannot appear in an index key"),
            Value::Boolean(b) => encoded.push(u8::from(*b)),
            Value::Int32(i) => {
                encoded.extend_from_slice(&((*i as u32) ^ 0x8000_0000).to_be_bytes())
            }
            Value::String(s) => encoded.extend_from_slice(s.as_bytes()),
        }
    }
    if encoded.len() > key_size {
        bail!(
            "Encoded key is {} bytes but the index key size is {}",
            encoded.len(),
            key_size
        );
    }
    encoded.resize(key_size, 0);
    Ok(encoded)
}
