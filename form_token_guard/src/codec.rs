//! Byte layout and text encoding of form tokens.
//!
//! A token is the base64url (unpadded) encoding of:
//!
//! ```text
//! version:u8 | issued_at:u64be | expires_at:u64be | nonce:[u8; 16]
//!   | form_name_len:u16be | form_name:utf8 | signature:[u8; 32]
//! ```
//!
//! The signature covers every byte before it, followed by the optional
//! context the token was bound to at issue time. The context itself is never
//! transmitted. Decoding checks layout only; authenticity is the verifier's
//! concern.

use std::fmt;

use crate::{clock::Timestamp, secret::SIGNATURE_LEN, util::random_bytes};

pub const TOKEN_VERSION: u8 = 1;
pub const NONCE_LEN: usize = 16;
pub const MAX_FORM_NAME_LEN: usize = 255;
/// Longest encoded string [`decode`] will look at.
pub const MAX_ENCODED_LEN: usize = 1024;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token is empty")]
    Empty,
    #[error("token is longer than {MAX_ENCODED_LEN} characters")]
    TooLong,
    #[error("token is not valid base64url: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("token is not canonically encoded")]
    NonCanonical,
    #[error("token is truncated")]
    Truncated,
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),
    #[error("form name length {0} is out of range")]
    FormNameLength(usize),
    #[error("form name is not valid UTF-8")]
    FormNameEncoding,
    #[error("{0} unexpected bytes after the signature")]
    TrailingBytes(usize),
}

/// Random per-token value. 128 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    pub const fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    pub(crate) fn random() -> Result<Self, rand::Error> {
        let mut nonce = [0; NONCE_LEN];
        nonce.copy_from_slice(&random_bytes(NONCE_LEN)?);
        Ok(Self(nonce))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// The signed fields of a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPayload {
    pub form_name: String,
    pub issued_at: Timestamp,
    pub expires_at: Timestamp,
    pub nonce: Nonce,
}

impl TokenPayload {
    /// Canonical bytes the signature is computed over.
    pub fn signing_bytes(&self, context: Option<&[u8]>) -> Vec<u8> {
        let mut buf = self.layout_bytes();
        match context {
            None => buf.push(0),
            Some(context) => {
                buf.push(1);
                let len = u32::try_from(context.len()).unwrap_or(u32::MAX);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(context);
            }
        }
        buf
    }

    fn layout_bytes(&self) -> Vec<u8> {
        let name = self.form_name.as_bytes();
        let mut buf = Vec::with_capacity(1 + 8 + 8 + NONCE_LEN + 2 + name.len());
        buf.push(TOKEN_VERSION);
        buf.extend_from_slice(&self.issued_at.as_millis().to_be_bytes());
        buf.extend_from_slice(&self.expires_at.as_millis().to_be_bytes());
        buf.extend_from_slice(self.nonce.as_bytes());
        // Names past the limit can't round-trip through `decode` anyway.
        let len = u16::try_from(name.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(name);
        buf
    }
}

/// A payload together with its claimed signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPayload {
    pub payload: TokenPayload,
    pub signature: [u8; SIGNATURE_LEN],
}

pub fn encode(token: &SignedPayload) -> String {
    let mut bytes = token.payload.layout_bytes();
    bytes.extend_from_slice(&token.signature);
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

pub fn decode(encoded: &str) -> Result<SignedPayload, DecodeError> {
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }
    if encoded.len() > MAX_ENCODED_LEN {
        return Err(DecodeError::TooLong);
    }
    let bytes = base64::decode_config(encoded, base64::URL_SAFE_NO_PAD)?;
    // Only one string may name a given token.
    if base64::encode_config(&bytes, base64::URL_SAFE_NO_PAD) != encoded {
        return Err(DecodeError::NonCanonical);
    }

    let mut reader = Reader(&bytes);
    let version = reader.u8()?;
    if version != TOKEN_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let issued_at = Timestamp::from_millis(reader.u64()?);
    let expires_at = Timestamp::from_millis(reader.u64()?);
    let nonce = Nonce(reader.array()?);
    let name_len = usize::from(reader.u16()?);
    if name_len == 0 || name_len > MAX_FORM_NAME_LEN {
        return Err(DecodeError::FormNameLength(name_len));
    }
    let form_name = std::str::from_utf8(reader.take(name_len)?)
        .map_err(|_| DecodeError::FormNameEncoding)?
        .to_owned();
    let signature = reader.array()?;
    if !reader.0.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.0.len()));
    }

    Ok(SignedPayload {
        payload: TokenPayload {
            form_name,
            issued_at,
            expires_at,
            nonce,
        },
        signature,
    })
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.0.len() < len {
            return Err(DecodeError::Truncated);
        }
        let (head, tail) = self.0.split_at(len);
        self.0 = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.take(N)?
            .try_into()
            .map_err(|_| DecodeError::Truncated)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(u8::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.array()?))
    }
}
