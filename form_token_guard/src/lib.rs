//! Signed, expiring, single-use form tokens for Rocket applications.
//!
//! A page that renders a form asks for a token bound to that form's name
//! ([`FreshFormToken`] or [`FormTokens::issue`]) and embeds it in the reserved
//! `_form_token` field. When the form comes back, [`FormTokenProtected`]
//! (or a [`Guarded`] handler outside of Rocket) verifies it before the handler
//! runs, and answers `403 Forbidden` if anything is off.
//!
//! Tokens are HMAC-SHA3-256 signed, carry their own validity window and a
//! random nonce, and are spent on first use unless configured otherwise.

mod clock;
mod codec;
mod config;
mod fairing;
mod form;
mod fresh;
mod guard;
mod header;
mod issuer;
mod proof;
mod secret;
mod service;
mod store;
mod token;
mod util;
mod verifier;

pub use form_token_guard_derive::with_form_token;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use codec::{
    decode, encode, DecodeError, Nonce, SignedPayload, TokenPayload, MAX_ENCODED_LEN,
    MAX_FORM_NAME_LEN, NONCE_LEN, TOKEN_VERSION,
};
pub use config::{FormTokenConfig, CONFIG_KEY};
pub use fairing::FormTokenFairing;
pub use form::{FormTokenProtected, FormTokenProtectedError};
pub use fresh::{FreshFormToken, FreshFormTokenError};
pub use guard::{
    is_state_changing, GuardState, Guarded, Handler, Reply, Submission, FORBIDDEN_BODY,
};
pub use header::{CheckFormTokenHeader, CheckFormTokenHeaderError};
pub use issuer::{FormToken, IssueError, TokenIssuer};
pub use proof::FormTokenProof;
pub use secret::{SecretError, SigningSecret, MIN_SECRET_LEN, SIGNATURE_LEN};
pub use service::FormTokens;
pub use store::{InMemoryNonceStore, NonceStore, StoreError, DEFAULT_MAX_TRACKED_NONCES};
pub use token::{
    BoundForm, ManuallySourcedFormToken, WithUserProvidedFormToken, FORM_TOKEN_FIELD,
    FORM_TOKEN_HEADER,
};
pub use verifier::{Rejection, TokenVerifier};
