use std::{fmt, sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    clock::{Clock, Timestamp},
    codec::{self, Nonce, SignedPayload, TokenPayload, MAX_FORM_NAME_LEN},
    secret::{SigningSecret, SIGNATURE_LEN},
};

#[derive(thiserror::Error, Debug)]
pub enum IssueError {
    #[error("form name must not be empty")]
    EmptyFormName,
    #[error("form name must be at most {MAX_FORM_NAME_LEN} bytes")]
    FormNameTooLong,
    #[error("token lifetime must be at least one millisecond")]
    NonPositiveTtl,
    #[error("could not generate a nonce: {0}")]
    Randomness(#[from] rand::Error),
}

/// A freshly issued token, bound to one form.
#[derive(Clone, PartialEq, Eq)]
pub struct FormToken {
    payload: TokenPayload,
    signature: [u8; SIGNATURE_LEN],
    encoded: String,
}

impl FormToken {
    pub fn form_name(&self) -> &str {
        &self.payload.form_name
    }

    pub const fn issued_at(&self) -> Timestamp {
        self.payload.issued_at
    }

    pub const fn expires_at(&self) -> Timestamp {
        self.payload.expires_at
    }

    pub const fn nonce(&self) -> &Nonce {
        &self.payload.nonce
    }

    pub const fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    /// The string to embed in the rendered form.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    #[allow(clippy::missing_const_for_fn)]
    pub fn into_encoded(self) -> String {
        self.encoded
    }
}

// Keep the encoded value out of logs.
impl fmt::Debug for FormToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormToken")
            .field("form_name", &self.payload.form_name)
            .field("issued_at", &self.payload.issued_at)
            .field("expires_at", &self.payload.expires_at)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for FormToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

pub struct TokenIssuer {
    secret: Arc<SigningSecret>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: Arc<SigningSecret>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            secret,
            clock,
            default_ttl,
        }
    }

    /// Issues a token for `form_name`, valid for `ttl` or the configured default.
    pub fn issue(&self, form_name: &str, ttl: Option<Duration>) -> Result<FormToken, IssueError> {
        self.issue_with_context(form_name, ttl, None)
    }

    /// Like [`Self::issue`], additionally binding the token to `context`
    /// (e.g. a session id). The same context must be supplied on verification.
    pub fn issue_with_context(
        &self,
        form_name: &str,
        ttl: Option<Duration>,
        context: Option<&[u8]>,
    ) -> Result<FormToken, IssueError> {
        if form_name.is_empty() {
            return Err(IssueError::EmptyFormName);
        }
        if form_name.len() > MAX_FORM_NAME_LEN {
            return Err(IssueError::FormNameTooLong);
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        if ttl.as_millis() == 0 {
            return Err(IssueError::NonPositiveTtl);
        }

        let issued_at = self.clock.now();
        let payload = TokenPayload {
            form_name: form_name.to_owned(),
            issued_at,
            expires_at: issued_at.saturating_add(ttl),
            nonce: Nonce::random()?,
        };
        let signature = self.secret.sign(&payload.signing_bytes(context));
        let signed = SignedPayload { payload, signature };
        let encoded = codec::encode(&signed);
        debug!(
            form = form_name,
            expires_at = %signed.payload.expires_at,
            bound = context.is_some(),
            "issued form token"
        );

        Ok(FormToken {
            payload: signed.payload,
            signature: signed.signature,
            encoded,
        })
    }
}
