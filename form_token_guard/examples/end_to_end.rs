#![deny(missing_docs)]

//! This example shows the library guarding a small Rocket app end to end.
//!
//! Forms opt in by deriving a token field with [`with_form_token`], which also
//! binds the form to a name. The page that renders a form asks for a
//! [`FreshFormToken`] and embeds it as a hidden input ([`show_signup`]). The
//! route that receives the form wraps it in [`FormTokenProtected`], and only
//! runs once the token has been checked against that form's name, its
//! validity window and the set of already spent tokens ([`do_signup`]).
//!
//! Scripts that post JSON or other bodies can send the token in the
//! `X-Form-Token` header instead, checked with [`CheckFormTokenHeader`]
//! ([`api_signup`]). Pages rendered by hand can fetch tokens straight from the
//! managed [`FormTokens`] ([`show_feedback`]).
//!
//! Set `ROCKET_FORM_TOKENS={secret="<base64 of 32+ bytes>"}` to keep tokens
//! valid across restarts.

use rocket::{
    form::{Form, FromForm},
    get, post,
    response::content::RawHtml,
    routes, State,
};

use form_token_guard::{
    with_form_token, CheckFormTokenHeader, FormTokenFairing, FormTokenProof, FormTokenProtected,
    FormTokens, FreshFormToken, FORM_TOKEN_FIELD,
};

/// Sign up for an account.
#[with_form_token("signup")]
#[derive(Debug, FromForm)]
pub struct SignupForm<'r> {
    /// Desired username
    username: &'r str,
}

/// Leave some feedback.
#[with_form_token("feedback")]
#[derive(Debug, FromForm)]
pub struct FeedbackForm {
    /// Free text
    message: String,
}

/// Render the signup form with a fresh token.
#[get("/signup")]
pub fn show_signup(token: FreshFormToken<SignupForm<'_>>) -> RawHtml<String> {
    RawHtml(format!(
        r#"<form method="post" action="/signup">
  {}
  <input name="username">
  <button>Sign up</button>
</form>"#,
        token.hidden_input()
    ))
}

/// Handle the signup form. Never runs without a valid, unspent token.
#[post("/signup", data = "<form>")]
pub fn do_signup(form: FormTokenProtected<Form<SignupForm<'_>>>) -> String {
    format!("welcome, {}", form.username)
}

/// Same as [`do_signup`], with the token in a header.
#[post("/api/signup?<username>")]
pub fn api_signup(
    _check: CheckFormTokenHeader<SignupForm<'_>>,
    proof: FormTokenProof,
    username: &str,
) -> String {
    format!("welcome, {username} (token {})", proof.nonce())
}

/// Render the feedback form, issuing a short-lived token by hand.
#[get("/feedback")]
pub fn show_feedback(tokens: &State<FormTokens>) -> Option<RawHtml<String>> {
    let token = tokens
        .issue("feedback", Some(std::time::Duration::from_secs(300)))
        .ok()?;
    Some(RawHtml(format!(
        r#"<form method="post" action="/feedback">
  <input type="hidden" name="{FORM_TOKEN_FIELD}" value="{token}">
  <textarea name="message"></textarea>
  <button>Send</button>
</form>"#
    )))
}

/// Handle the feedback form.
#[post("/feedback", data = "<form>")]
pub fn do_feedback(form: FormTokenProtected<Form<FeedbackForm>>) -> String {
    format!("thanks for the {} bytes of feedback", form.message.len())
}

#[rocket::launch]
fn rocket() -> _ {
    rocket::build()
        .mount(
            "/",
            routes![show_signup, do_signup, api_signup, show_feedback, do_feedback],
        )
        .attach(FormTokenFairing::new())
}
