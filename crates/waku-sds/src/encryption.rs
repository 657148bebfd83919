//! Optional payload encryption around the SDS wire bytes.

use crate::error::EncryptionError;

/// Wraps encoded SDS messages before publishing and unwraps them on receipt.
pub trait Encryption: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError>;
}

/// No encryption: bytes pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Encryption for PassThrough {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        Ok(ciphertext.to_vec())
    }
}
