use crate::{
    issuer::{FormToken, IssueError},
    service::FormTokens,
    token::{BoundForm, FORM_TOKEN_FIELD},
};

use std::{fmt, marker::PhantomData};

use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
    State,
};
use serde::{Serialize, Serializer};

/// Errors when issuing a [`FreshFormToken`]
#[derive(Debug)]
pub enum FreshFormTokenError {
    /// No [`FormTokens`] is managed; attach [`crate::FormTokenFairing`].
    NotConfigured,
    Issue(IssueError),
}

/// A newly issued token for the form `F`, to embed in the page being rendered.
///
/// Use this as a request guard on the route that renders the form. This type
/// implements [`serde::Serialize`] as the encoded token, so it can be handed
/// to a template context directly.
pub struct FreshFormToken<F> {
    token: FormToken,
    _marker: PhantomData<fn() -> F>,
}

impl<F> FreshFormToken<F> {
    pub fn as_str(&self) -> &str {
        self.token.encoded()
    }

    pub const fn token(&self) -> &FormToken {
        &self.token
    }

    /// A hidden `<input>` carrying the token under the reserved field name.
    pub fn hidden_input(&self) -> String {
        // base64url needs no attribute escaping
        format!(
            r#"<input type="hidden" name="{FORM_TOKEN_FIELD}" value="{}">"#,
            self.token.encoded()
        )
    }
}

impl<F> fmt::Debug for FreshFormToken<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FreshFormToken").field(&self.token).finish()
    }
}

impl<F> fmt::Display for FreshFormToken<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<F> Serialize for FreshFormToken<F> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// Issues a token for `F::FORM_NAME` with the configured TTL.
#[async_trait::async_trait]
impl<'r, F> FromRequest<'r> for FreshFormToken<F>
where
    F: BoundForm,
{
    type Error = FreshFormTokenError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let tokens = match request.guard::<&State<FormTokens>>().await {
            request::Outcome::Success(tokens) => tokens,
            request::Outcome::Error((status, _)) => {
                return request::Outcome::Error((status, FreshFormTokenError::NotConfigured))
            }
            request::Outcome::Forward(f) => return request::Outcome::Forward(f),
        };
        match tokens.issue_token(F::FORM_NAME, None) {
            Ok(token) => request::Outcome::Success(Self {
                token,
                _marker: PhantomData,
            }),
            Err(e) => request::Outcome::Error((
                Status::InternalServerError,
                FreshFormTokenError::Issue(e),
            )),
        }
    }
}
