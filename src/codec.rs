//! # Vector codec
//!
//! Embeddings are stored as a flat little-endian `f32` buffer: four bytes per
//! component, in vector order, with no header or length prefix. The component
//! count is implied by `bytes.len() / 4`.

use crate::error::{LoreError, Result};

/// Width of one encoded component.
pub const BYTES_PER_COMPONENT: usize = std::mem::size_of::<f32>();

/// Encode a vector into its on-disk byte form.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * BYTES_PER_COMPONENT);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a stored byte buffer back into a vector.
///
/// # Errors
/// [`LoreError::CorruptData`] when the length is not a multiple of four. No
/// partial vector is ever returned.
pub fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % BYTES_PER_COMPONENT != 0 {
        return Err(LoreError::CorruptData(format!(
            "vector payload of {} bytes is not a multiple of {}",
            bytes.len(),
            BYTES_PER_COMPONENT
        )));
    }

    Ok(bytes
        .chunks_exact(BYTES_PER_COMPONENT)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
