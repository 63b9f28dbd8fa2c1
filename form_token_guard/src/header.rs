use crate::{
    guard::GuardState,
    service::FormTokens,
    token::{BoundForm, FORM_TOKEN_HEADER},
    util::set_proof_in_cache,
};

use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
    State,
};

// Errors when checking the form token header
#[derive(Debug)]
pub enum CheckFormTokenHeaderError {
    NotConfigured,
    // Missing or invalid, deliberately not told apart
    Rejected,
}

// Verifies that a request carried a valid token for `F` in the `X-Form-Token`
// header, for submissions made by scripts rather than HTML forms
#[derive(Debug)]
pub struct CheckFormTokenHeader<F>(std::marker::PhantomData<fn() -> F>);

#[async_trait::async_trait]
impl<'r, F> FromRequest<'r> for CheckFormTokenHeader<F>
where
    F: BoundForm,
{
    type Error = CheckFormTokenHeaderError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let tokens = match request.guard::<&State<FormTokens>>().await {
            request::Outcome::Success(tokens) => tokens,
            request::Outcome::Error((status, _)) => {
                return request::Outcome::Error((
                    status,
                    CheckFormTokenHeaderError::NotConfigured,
                ))
            }
            request::Outcome::Forward(f) => return request::Outcome::Forward(f),
        };
        let token = request.headers().get_one(FORM_TOKEN_HEADER);
        match tokens.authorize(F::FORM_NAME, token).await {
            GuardState::Authorized(proof) => {
                set_proof_in_cache(request, proof);
                request::Outcome::Success(Self(std::marker::PhantomData))
            }
            _ => request::Outcome::Error((
                Status::Forbidden,
                CheckFormTokenHeaderError::Rejected,
            )),
        }
    }
}
