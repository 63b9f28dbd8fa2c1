use crate::{
    guard::{form_token_field, GuardState},
    proof::FormTokenProof,
    service::FormTokens,
    token::{BoundForm, WithUserProvidedFormToken},
    util::set_proof_in_cache,
};

use std::ops::{Deref, DerefMut};

use rocket::{
    data::{self, Data, FromData, Limits},
    form::{Errors, Form, FromForm},
    http::Status,
    request::{self, Request},
    State,
};
use tracing::debug;

/// Errors when validating a [`FormTokenProtected`]
#[derive(Debug)]
pub enum FormTokenProtectedError<T> {
    /// No [`FormTokens`] is managed; attach [`crate::FormTokenFairing`].
    NotConfigured,
    /// The token was missing or failed verification.
    /// Intentionally opaque so responses can't reveal which check failed.
    Rejected,
    /// The body exceeded the `form` limit.
    TooLarge,
    /// The body could not be read.
    Io(std::io::Error),
    /// An error occurred while parsing the form.
    FormParsing(T),
}

/// A wrapper form which checks that the submission carried a valid token for
/// `F::FORM_NAME`, then parses and dereferences to the inner form.
///
/// For urlencoded bodies the token field is checked before any other field is
/// parsed, so a submission without a valid token is always answered with
/// `403 Forbidden`, whatever else it contains. The route's handler is never
/// called when the check fails.
pub struct FormTokenProtected<F> {
    form: F,
    proof: FormTokenProof,
}

impl<F> FormTokenProtected<F> {
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> F {
        self.form
    }

    pub const fn proof(&self) -> &FormTokenProof {
        &self.proof
    }
}

impl<F> FormTokenProtected<Form<F>> {
    /// Extracts the inner form, throwing away the proof.
    pub fn into_innermost(self) -> F {
        self.form.into_inner()
    }

    /// Extracts the inner form and proof.
    pub fn into_parts(self) -> (FormTokenProof, F) {
        (self.proof, self.form.into_inner())
    }
}

// Request-local copy of an urlencoded body, which the parsed form borrows from.
struct BufferedFormBody(String);

#[async_trait::async_trait]
impl<'r, T> FromData<'r> for FormTokenProtected<Form<T>>
where
    T: FromForm<'r> + WithUserProvidedFormToken + BoundForm + Send + Sync,
{
    type Error = FormTokenProtectedError<Errors<'r>>;

    async fn from_data(request: &'r Request<'_>, data: Data<'r>) -> data::Outcome<'r, Self> {
        let tokens = match request.guard::<&State<FormTokens>>().await {
            request::Outcome::Success(tokens) => tokens,
            request::Outcome::Error((status, _)) => {
                return data::Outcome::Error((status, FormTokenProtectedError::NotConfigured))
            }
            request::Outcome::Forward(status) => return data::Outcome::Forward((data, status)),
        };

        if !request.content_type().map_or(false, |ct| ct.is_form()) {
            // Multipart fields can only be reached by parsing the whole form.
            let form = match Form::<T>::from_data(request, data).await {
                data::Outcome::Success(form) => form,
                data::Outcome::Error((status, errors)) => {
                    debug!(%status, %errors, "unparseable form submission");
                    return data::Outcome::Error((
                        Status::Forbidden,
                        FormTokenProtectedError::Rejected,
                    ));
                }
                data::Outcome::Forward(f) => return data::Outcome::Forward(f),
            };
            let state = tokens.authorize(T::FORM_NAME, form.form_token()).await;
            return match state {
                GuardState::Authorized(proof) => {
                    set_proof_in_cache(request, proof.clone());
                    data::Outcome::Success(Self { form, proof })
                }
                _ => data::Outcome::Error((Status::Forbidden, FormTokenProtectedError::Rejected)),
            };
        }

        let limit = request.limits().get("form").unwrap_or(Limits::FORM);
        let body = match data.open(limit).into_string().await {
            Ok(body) if body.is_complete() => body.into_inner(),
            Ok(_) => {
                return data::Outcome::Error((
                    Status::PayloadTooLarge,
                    FormTokenProtectedError::TooLarge,
                ))
            }
            Err(e) => {
                return data::Outcome::Error((Status::BadRequest, FormTokenProtectedError::Io(e)))
            }
        };
        let body: &'r str = &request.local_cache(|| BufferedFormBody(body)).0;

        let presented = form_token_field(body.as_bytes());
        let proof = match tokens.authorize(T::FORM_NAME, presented.as_deref()).await {
            GuardState::Authorized(proof) => proof,
            _ => {
                return data::Outcome::Error((Status::Forbidden, FormTokenProtectedError::Rejected))
            }
        };
        set_proof_in_cache(request, proof.clone());

        match Form::<T>::parse(body) {
            Ok(form) => data::Outcome::Success(Self {
                form: Form::from(form),
                proof,
            }),
            Err(errors) => data::Outcome::Error((
                errors.status(),
                FormTokenProtectedError::FormParsing(errors),
            )),
        }
    }
}

impl<F> Deref for FormTokenProtected<F> {
    type Target = F;

    fn deref(&self) -> &Self::Target {
        &self.form
    }
}

impl<F> DerefMut for FormTokenProtected<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.form
    }
}
