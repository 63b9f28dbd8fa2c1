use rocket::request::{FromRequest, Outcome, Request};

use crate::codec::Nonce;

/// A proof that a request presented a valid form token.
///
/// Only the verifier can construct one, so code that takes a proof as an
/// argument can't be reached without the check having passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormTokenProof {
    form_name: String,
    nonce: Nonce,
}

impl FormTokenProof {
    pub(crate) const fn new(form_name: String, nonce: Nonce) -> Self {
        Self { form_name, nonce }
    }

    /// The form the verified token was issued for.
    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    pub const fn nonce(&self) -> &Nonce {
        &self.nonce
    }
}

/// By default, consider this an unauthorized web request
/// A form token guard must run *before* this one and populate the cache
#[async_trait::async_trait]
impl<'r> FromRequest<'r> for FormTokenProof {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cached: &Option<Self> = request.local_cache(|| None);

        cached
            .as_ref()
            .cloned()
            .map(Outcome::Success)
            .unwrap_or_else(|| Outcome::Forward(rocket::http::Status::InternalServerError))
    }
}
