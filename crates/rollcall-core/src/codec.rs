//! Fixed binary encoding of persisted embeddings.
//!
//! An embedding is stored as 128 IEEE-754 doubles in little-endian order,
//! concatenated without a length prefix.

use crate::types::{EmbeddingError, EmbeddingVector, EMBEDDING_DIM};
use thiserror::Error;

/// Size in bytes of one encoded embedding.
pub const ENCODED_LEN: usize = EMBEDDING_DIM * std::mem::size_of::<f64>();

#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("encoded embedding must be {ENCODED_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("decoded embedding rejected: {0}")]
    Invalid(#[from] EmbeddingError),
}

pub fn encode(embedding: &EmbeddingVector) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ENCODED_LEN);
    for value in embedding.as_slice() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a stored embedding. The result must already be unit length.
pub fn decode(bytes: &[u8]) -> Result<EmbeddingVector, CodecError> {
    if bytes.len() != ENCODED_LEN {
        return Err(CodecError::WrongLength(bytes.len()));
    }
    let values = bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect();
    Ok(EmbeddingVector::from_unit(values)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EmbeddingVector {
        EmbeddingVector::new((0..EMBEDDING_DIM).map(|i| (i as f64 * 0.37).sin()).collect()).unwrap()
    }

    #[test]
    fn test_encoded_length_is_fixed() {
        assert_eq!(encode(&sample()).len(), 1024);
    }

    #[test]
    fn test_decode_restores_exact_values() {
        let e = sample();
        assert_eq!(decode(&encode(&e)).unwrap(), e);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[0] = 1.0;
        let bytes = encode(&EmbeddingVector::new(values).unwrap());
        assert_eq!(&bytes[..8], &1.0f64.to_le_bytes());
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        assert_eq!(decode(&[0u8; 1016]), Err(CodecError::WrongLength(1016)));
    }

    #[test]
    fn test_decode_rejects_zero_vector() {
        assert_eq!(
            decode(&[0u8; ENCODED_LEN]),
            Err(CodecError::Invalid(EmbeddingError::ZeroNorm))
        );
    }
}
