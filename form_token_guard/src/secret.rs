use std::fmt;

use hmac::{Hmac, Mac};
use sha3::Sha3_256;

use crate::util::random_bytes;

type HmacSha3_256 = Hmac<Sha3_256>;

/// Minimum accepted secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Length of a token signature, in bytes.
pub const SIGNATURE_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("signing secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    TooShort(usize),
    #[error("signing secret is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("signing secret was rejected by the MAC")]
    InvalidKey,
    #[error("could not generate a signing secret: {0}")]
    Randomness(#[from] rand::Error),
}

/// The process-wide key tokens are signed with.
///
/// Replacing it invalidates every outstanding token.
#[derive(Clone)]
pub struct SigningSecret {
    mac: HmacSha3_256,
}

impl SigningSecret {
    /// Generates a fresh random secret.
    pub fn generate() -> Result<Self, SecretError> {
        Self::from_bytes(&random_bytes(MIN_SECRET_LEN)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecretError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(SecretError::TooShort(bytes.len()));
        }
        let mac = HmacSha3_256::new_from_slice(bytes).map_err(|_| SecretError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Accepts standard or URL-safe base64, padded or not.
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let trimmed = encoded.trim().trim_end_matches('=');
        let bytes = if trimmed.contains(['+', '/']) {
            base64::decode_config(trimmed, base64::STANDARD_NO_PAD)?
        } else {
            base64::decode_config(trimmed, base64::URL_SAFE_NO_PAD)?
        };
        Self::from_bytes(&bytes)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        let mut mac = self.mac.clone();
        mac.update(message);
        let mut signature = [0; SIGNATURE_LEN];
        signature.copy_from_slice(&mac.finalize().into_bytes());
        signature
    }

    /// Constant-time check of `signature` against `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(message);
        mac.verify_slice(signature).is_ok()
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}
