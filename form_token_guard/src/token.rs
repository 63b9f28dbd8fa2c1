use std::ops::Deref;

use rocket::form::Form;

/// Reserved form field carrying the token. Kept apart from user data fields.
pub const FORM_TOKEN_FIELD: &str = "_form_token";

/// Header carrying the token for non-form submissions.
pub const FORM_TOKEN_HEADER: &str = "X-Form-Token";

// A thing that may carry a form token provided from user input
pub trait WithUserProvidedFormToken {
    fn form_token(&self) -> Option<&str>;
}

/// Binds a form type to the logical form name its tokens are issued for.
///
/// Usually implemented through `#[with_form_token("name")]`.
pub trait BoundForm {
    const FORM_NAME: &'static str;
}

impl<T> WithUserProvidedFormToken for Form<T>
where
    T: WithUserProvidedFormToken,
{
    fn form_token(&self) -> Option<&str> {
        self.deref().form_token()
    }
}

impl<T> BoundForm for Form<T>
where
    T: BoundForm,
{
    const FORM_NAME: &'static str = T::FORM_NAME;
}

// For tokens that arrive somewhere other than the reserved field or header,
// e.g. a JSON body. The caller is responsible for where the string came from.
#[derive(Debug)]
pub struct ManuallySourcedFormToken(Option<String>);

impl ManuallySourcedFormToken {
    pub const fn new(form_token: Option<String>) -> Self {
        Self(form_token)
    }
}

impl WithUserProvidedFormToken for ManuallySourcedFormToken {
    fn form_token(&self) -> Option<&str> {
        self.0.as_deref()
    }
}
