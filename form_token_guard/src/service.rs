use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{debug, warn};

use crate::{
    clock::{Clock, SystemClock},
    config::FormTokenConfig,
    guard::{GuardState, Guarded, Handler},
    issuer::{FormToken, IssueError, TokenIssuer},
    proof::FormTokenProof,
    secret::SigningSecret,
    store::{InMemoryNonceStore, NonceStore},
    verifier::{Rejection, TokenVerifier},
};

/// Issues and checks form tokens under one secret and policy.
///
/// Cheap to clone; clones share the secret and the nonce registry. This is
/// what [`crate::FormTokenFairing`] puts into Rocket's managed state.
#[derive(Clone)]
pub struct FormTokens {
    inner: Arc<Inner>,
}

struct Inner {
    config: FormTokenConfig,
    issuer: TokenIssuer,
    verifier: TokenVerifier,
    store: Arc<dyn NonceStore>,
}

impl FormTokens {
    /// Loads the secret named by `config`, or generates one if there is none.
    pub fn from_config(config: FormTokenConfig) -> anyhow::Result<Self> {
        let secret = match config.secret.as_deref() {
            Some(encoded) => SigningSecret::from_base64(encoded)
                .context("form_tokens.secret is not a usable signing secret")?,
            None => {
                warn!(
                    "no form_tokens.secret configured, generating one; \
                     form tokens will not survive a restart"
                );
                SigningSecret::generate().context("generating a form token signing secret")?
            }
        };
        Ok(Self::new(secret, config))
    }

    pub fn new(secret: SigningSecret, config: FormTokenConfig) -> Self {
        Self::with_clock(secret, config, Arc::new(SystemClock))
    }

    /// Uses `clock` for issuing, verifying and nonce expiry.
    pub fn with_clock(
        secret: SigningSecret,
        config: FormTokenConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(InMemoryNonceStore::new(
            clock.clone(),
            config.max_tracked_nonces,
        ));
        Self::with_parts(secret, config, clock, store)
    }

    /// Full control over the collaborators, e.g. an external nonce store.
    pub fn with_parts(
        secret: SigningSecret,
        config: FormTokenConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn NonceStore>,
    ) -> Self {
        let secret = Arc::new(secret);
        let issuer = TokenIssuer::new(secret.clone(), clock.clone(), config.default_ttl());
        let mut verifier = TokenVerifier::new(secret, clock);
        if config.single_use {
            verifier = verifier.single_use(store.clone(), config.store_timeout());
        }
        Self {
            inner: Arc::new(Inner {
                config,
                issuer,
                verifier,
                store,
            }),
        }
    }

    pub fn config(&self) -> &FormTokenConfig {
        &self.inner.config
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.inner.issuer
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    pub fn store(&self) -> &Arc<dyn NonceStore> {
        &self.inner.store
    }

    /// Returns an encoded token for `form_name`, ready to embed in a form.
    pub fn issue(&self, form_name: &str, ttl: Option<Duration>) -> Result<String, IssueError> {
        self.issue_token(form_name, ttl).map(FormToken::into_encoded)
    }

    pub fn issue_token(
        &self,
        form_name: &str,
        ttl: Option<Duration>,
    ) -> Result<FormToken, IssueError> {
        self.inner.issuer.issue(form_name, ttl)
    }

    pub async fn verify(
        &self,
        encoded: &str,
        expected_form_name: &str,
    ) -> Result<FormTokenProof, Rejection> {
        self.inner.verifier.verify(encoded, expected_form_name).await
    }

    /// Runs the guard state machine over a possibly absent token.
    ///
    /// Always ends in [`GuardState::Authorized`] or [`GuardState::Rejected`].
    /// Rejections are logged with their reason here and nowhere else.
    pub async fn authorize(
        &self,
        expected_form_name: &str,
        presented: Option<&str>,
    ) -> GuardState {
        let mut state = GuardState::Received;
        loop {
            state = match state {
                GuardState::Received => match presented.filter(|token| !token.is_empty()) {
                    Some(token) => GuardState::ReceivedToken(token.to_owned()),
                    None => GuardState::Rejected(Rejection::Missing),
                },
                GuardState::ReceivedToken(token) => {
                    match self.verify(&token, expected_form_name).await {
                        Ok(proof) => GuardState::Authorized(proof),
                        Err(rejection) => GuardState::Rejected(rejection),
                    }
                }
                GuardState::Authorized(proof) => {
                    debug!(
                        form = expected_form_name,
                        nonce = %proof.nonce(),
                        "form token accepted"
                    );
                    return GuardState::Authorized(proof);
                }
                GuardState::Rejected(rejection) => {
                    warn!(
                        form = expected_form_name,
                        reason = rejection.reason(),
                        "rejected form submission"
                    );
                    return GuardState::Rejected(rejection);
                }
            };
        }
    }

    /// Wraps `handler` so it only runs for submissions carrying a valid token
    /// for `form_name`.
    pub fn guard<H: Handler>(&self, form_name: impl Into<String>, handler: H) -> Guarded<H> {
        Guarded::new(self.clone(), form_name.into(), handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::{ManualClock, Timestamp};

    fn tokens(config: FormTokenConfig) -> (ManualClock, FormTokens) {
        let clock = ManualClock::new(Timestamp::from_millis(5_000_000));
        let tokens = FormTokens::with_clock(
            SigningSecret::from_bytes(&[5; 32]).unwrap(),
            config,
            Arc::new(clock.clone()),
        );
        (clock, tokens)
    }

    #[test]
    fn from_config_loads_or_generates_secrets() {
        let generated = FormTokens::from_config(FormTokenConfig::default()).unwrap();
        assert!(generated.issue("capture", None).is_ok());

        let configured = FormTokenConfig::default().with_secret(base64::encode([9u8; 32]));
        assert!(FormTokens::from_config(configured).is_ok());

        let short = FormTokenConfig::default().with_secret(base64::encode([9u8; 8]));
        assert!(FormTokens::from_config(short).is_err());

        let garbage = FormTokenConfig::default().with_secret("!!not base64!!");
        assert!(FormTokens::from_config(garbage).is_err());
    }

    #[rocket::async_test]
    async fn configured_secret_survives_restart() {
        let config = FormTokenConfig::default().with_secret(base64::encode([9u8; 32]));
        let before = FormTokens::from_config(config.clone()).unwrap();
        let encoded = before.issue("capture", None).unwrap();

        let after = FormTokens::from_config(config).unwrap();
        assert!(after.verify(&encoded, "capture").await.is_ok());

        let rotated = FormTokens::from_config(
            FormTokenConfig::default().with_secret(base64::encode([8u8; 32])),
        )
        .unwrap();
        assert_eq!(
            rotated.verify(&encoded, "capture").await,
            Err(Rejection::InvalidSignature)
        );
    }

    #[rocket::async_test]
    async fn issue_uses_the_configured_ttl() {
        let (clock, tokens) = tokens(FormTokenConfig::default().with_ttl_secs(2));
        let token = tokens.issue_token("capture", None).unwrap();
        assert_eq!(token.expires_at(), Timestamp::from_millis(5_002_000));

        clock.advance(Duration::from_secs(2));
        assert_eq!(
            tokens.verify(token.encoded(), "capture").await,
            Err(Rejection::Expired)
        );
    }

    #[rocket::async_test]
    async fn authorize_walks_to_a_terminal_state() {
        let (_, tokens) = tokens(FormTokenConfig::default());
        let encoded = tokens.issue("capture", None).unwrap();

        assert_eq!(
            tokens.authorize("capture", None).await,
            GuardState::Rejected(Rejection::Missing)
        );
        assert_eq!(
            tokens.authorize("capture", Some("")).await,
            GuardState::Rejected(Rejection::Missing)
        );
        assert_eq!(
            tokens.authorize("other", Some(&encoded)).await,
            GuardState::Rejected(Rejection::WrongForm)
        );
        assert!(matches!(
            tokens.authorize("capture", Some(&encoded)).await,
            GuardState::Authorized(proof) if proof.form_name() == "capture"
        ));
        assert_eq!(
            tokens.authorize("capture", Some(&encoded)).await,
            GuardState::Rejected(Rejection::Replayed)
        );
    }

    #[rocket::async_test]
    async fn single_use_can_be_switched_off() {
        let (_, tokens) = tokens(FormTokenConfig::default().with_single_use(false));
        let encoded = tokens.issue("capture", None).unwrap();
        assert!(tokens.verify(&encoded, "capture").await.is_ok());
        assert!(tokens.verify(&encoded, "capture").await.is_ok());
        assert!(tokens.store().evict_expired().await == 0);
    }
}
