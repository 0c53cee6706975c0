//! Envelope framing: `IV (12 bytes) || ciphertext+tag`, base64-encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::crypto::IV_BYTES;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope is not valid base64: {reason}")]
    Encoding { reason: String },
    #[error("envelope too short: {len} bytes, need at least {IV_BYTES}")]
    TooShort { len: usize },
}

/// Frame an IV and ciphertext into the transport encoding.
pub fn seal(iv: &[u8; IV_BYTES], ciphertext: &[u8]) -> String {
    let mut combined = Vec::with_capacity(IV_BYTES + ciphertext.len());
    combined.extend_from_slice(iv);
    combined.extend_from_slice(ciphertext);
    STANDARD.encode(combined)
}

/// Split an encoded envelope back into its IV and ciphertext.
pub fn open(envelope: &str) -> Result<([u8; IV_BYTES], Vec<u8>), EnvelopeError> {
    let combined = STANDARD
        .decode(envelope)
        .map_err(|e| EnvelopeError::Encoding {
            reason: e.to_string(),
        })?;
    if combined.len() < IV_BYTES {
        return Err(EnvelopeError::TooShort {
            len: combined.len(),
        });
    }
    let mut iv = [0u8; IV_BYTES];
    iv.copy_from_slice(&combined[..IV_BYTES]);
    Ok((iv, combined[IV_BYTES..].to_vec()))
}
