use std::{sync::Arc, time::Duration};

use rocket::tokio::time::timeout;
use tracing::{debug, error};

use crate::{
    clock::Clock,
    codec,
    proof::FormTokenProof,
    secret::SigningSecret,
    store::NonceStore,
};

type Result<T, E = Rejection> = anyhow::Result<T, E>;

/// Why a presented token was refused.
///
/// For internal diagnostics only; callers should answer every variant with
/// the same generic response.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    // NOTE: None of these messages include the token or what was expected.
    #[error("no form token was presented")]
    Missing,
    #[error("form token could not be decoded")]
    Malformed,
    #[error("form token signature did not match")]
    InvalidSignature,
    #[error("form token was issued for a different form")]
    WrongForm,
    #[error("form token has expired")]
    Expired,
    #[error("form token is not valid yet")]
    NotYetValid,
    #[error("form token was already used")]
    Replayed,
    #[error("nonce store failed or timed out")]
    StoreUnavailable,
}

impl Rejection {
    /// Stable snake_case code, for logs and metrics.
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Malformed => "malformed",
            Self::InvalidSignature => "invalid_signature",
            Self::WrongForm => "wrong_form",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::Replayed => "replayed",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

struct SingleUse {
    store: Arc<dyn NonceStore>,
    timeout: Duration,
}

/// Checks presented tokens, in order: layout, signature, form name, validity
/// window, and (when single-use) that the nonce was not spent before.
///
/// Nothing in a token is looked at before its signature checks out.
pub struct TokenVerifier {
    secret: Arc<SigningSecret>,
    clock: Arc<dyn Clock>,
    single_use: Option<SingleUse>,
}

impl TokenVerifier {
    /// A verifier accepting a token any number of times until it expires.
    pub fn new(secret: Arc<SigningSecret>, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret,
            clock,
            single_use: None,
        }
    }

    /// Spend each token on its first successful verification.
    ///
    /// Store calls exceeding `timeout` reject the token.
    #[must_use]
    pub fn single_use(mut self, store: Arc<dyn NonceStore>, timeout: Duration) -> Self {
        self.single_use = Some(SingleUse { store, timeout });
        self
    }

    pub const fn is_single_use(&self) -> bool {
        self.single_use.is_some()
    }

    pub async fn verify(&self, encoded: &str, expected_form_name: &str) -> Result<FormTokenProof> {
        self.verify_with_context(encoded, expected_form_name, None).await
    }

    /// Verifies a token issued with [`crate::TokenIssuer::issue_with_context`].
    /// A context mismatch is indistinguishable from a forged signature.
    pub async fn verify_with_context(
        &self,
        encoded: &str,
        expected_form_name: &str,
        context: Option<&[u8]>,
    ) -> Result<FormTokenProof> {
        let signed = codec::decode(encoded).map_err(|e| {
            debug!(error = %e, "form token did not decode");
            Rejection::Malformed
        })?;
        let payload = signed.payload;

        if !self
            .secret
            .verify(&payload.signing_bytes(context), &signed.signature)
        {
            return Err(Rejection::InvalidSignature);
        }
        if payload.form_name != expected_form_name {
            return Err(Rejection::WrongForm);
        }

        let now = self.clock.now();
        if now >= payload.expires_at {
            return Err(Rejection::Expired);
        }
        if now < payload.issued_at {
            return Err(Rejection::NotYetValid);
        }

        if let Some(single_use) = &self.single_use {
            let marked = timeout(
                single_use.timeout,
                single_use
                    .store
                    .mark_consumed(&payload.nonce, payload.expires_at),
            )
            .await;
            match marked {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => return Err(Rejection::Replayed),
                Ok(Err(e)) => {
                    error!(error = %e, "nonce store failed, rejecting form token");
                    return Err(Rejection::StoreUnavailable);
                }
                Err(_) => {
                    error!(
                        timeout_ms = single_use.timeout.as_millis(),
                        "nonce store timed out, rejecting form token"
                    );
                    return Err(Rejection::StoreUnavailable);
                }
            }
        }

        Ok(FormTokenProof::new(payload.form_name, payload.nonce))
    }
}
