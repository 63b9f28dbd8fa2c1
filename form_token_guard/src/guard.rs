//! The pipeline guard: wraps state-changing handlers so they never run for a
//! submission without a valid form token.
//!
//! The types here are deliberately small stand-ins for a request and a
//! response, so the guard can sit in front of any dispatcher. Rocket routes
//! get the same treatment through [`crate::FormTokenProtected`].

use std::{fmt, future::Future};

use rocket::http::{Method, Status};

use crate::{
    proof::FormTokenProof,
    service::FormTokens,
    token::{FORM_TOKEN_FIELD, FORM_TOKEN_HEADER},
    verifier::Rejection,
};

/// Body of every rejection. Says nothing about which check failed.
pub const FORBIDDEN_BODY: &str = "Forbidden";

/// Where a submission is in the guard's state machine.
#[derive(Clone, PartialEq, Eq)]
pub enum GuardState {
    Received,
    ReceivedToken(String),
    Authorized(FormTokenProof),
    Rejected(Rejection),
}

impl fmt::Debug for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("Received"),
            Self::ReceivedToken(_) => f.write_str("ReceivedToken(..)"),
            Self::Authorized(proof) => f.debug_tuple("Authorized").field(proof).finish(),
            Self::Rejected(rejection) => f.debug_tuple("Rejected").field(rejection).finish(),
        }
    }
}

/// Methods that may change state, and so need a token.
pub const fn is_state_changing(method: Method) -> bool {
    !matches!(
        method,
        Method::Get | Method::Head | Method::Options | Method::Trace
    )
}

/// An incoming request, as far as the guard cares.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    method: Method,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Submission {
    /// `body` is expected to be `application/x-www-form-urlencoded`.
    pub fn new(method: Method, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub const fn method(&self) -> Method {
        self.method
    }

    /// First value of the named header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// The presented token: the reserved body field if present, otherwise the
    /// token header.
    /// Empty values count as absent.
    pub fn form_token(&self) -> Option<String> {
        form_token_field(&self.body).or_else(|| {
            self.header(FORM_TOKEN_HEADER)
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        })
    }
}

/// The first non-empty reserved token field of an urlencoded body.
pub(crate) fn form_token_field(body: &[u8]) -> Option<String> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body)
        .ok()?
        .into_iter()
        .find(|(name, value)| name == FORM_TOKEN_FIELD && !value.is_empty())
        .map(|(_, value)| value)
}

/// What a handler answers with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub body: String,
}

impl Reply {
    pub fn new(status: Status, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn forbidden() -> Self {
        Self::new(Status::Forbidden, FORBIDDEN_BODY)
    }
}

#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, submission: Submission) -> Reply;
}

#[async_trait::async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Submission) -> Fut + Send + Sync,
    Fut: Future<Output = Reply> + Send,
{
    async fn handle(&self, submission: Submission) -> Reply {
        (self)(submission).await
    }
}

/// A handler behind the guard. Built by [`FormTokens::guard`].
///
/// Safe methods pass straight through. Any other method has its token
/// extracted and verified first, and on any failure the inner handler is not
/// called and a generic 403 is returned.
pub struct Guarded<H> {
    tokens: FormTokens,
    form_name: String,
    inner: H,
}

impl<H> Guarded<H> {
    pub(crate) const fn new(tokens: FormTokens, form_name: String, inner: H) -> Self {
        Self {
            tokens,
            form_name,
            inner,
        }
    }

    pub fn form_name(&self) -> &str {
        &self.form_name
    }

    pub const fn inner(&self) -> &H {
        &self.inner
    }
}

#[async_trait::async_trait]
impl<H: Handler> Handler for Guarded<H> {
    async fn handle(&self, submission: Submission) -> Reply {
        if !is_state_changing(submission.method()) {
            return self.inner.handle(submission).await;
        }
        let presented = submission.form_token();
        match self
            .tokens
            .authorize(&self.form_name, presented.as_deref())
            .await
        {
            GuardState::Authorized(_) => self.inner.handle(submission).await,
            _ => Reply::forbidden(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use crate::{
        clock::{ManualClock, Timestamp},
        config::FormTokenConfig,
        secret::SigningSecret,
    };

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        last: Mutex<Option<Submission>>,
    }

    #[derive(Clone, Default)]
    struct RecordingHandler(Arc<Recorder>);

    impl RecordingHandler {
        fn calls(&self) -> usize {
            self.0.calls.load(Ordering::SeqCst)
        }

        fn last(&self) -> Option<Submission> {
            self.0.last.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Handler for RecordingHandler {
        async fn handle(&self, submission: Submission) -> Reply {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            *self.0.last.lock().unwrap() = Some(submission);
            Reply::new(Status::Created, "captured")
        }
    }

    fn setup() -> (ManualClock, FormTokens, RecordingHandler, Guarded<RecordingHandler>) {
        let clock = ManualClock::new(Timestamp::from_millis(42_000));
        let tokens = FormTokens::with_clock(
            SigningSecret::from_bytes(&[1; 32]).unwrap(),
            FormTokenConfig::default(),
            Arc::new(clock.clone()),
        );
        let handler = RecordingHandler::default();
        let guarded = tokens.guard("capture", handler.clone());
        (clock, tokens, handler, guarded)
    }

    fn form_body(token: &str) -> String {
        format!("name=Tina&email=tina%40example.com&{FORM_TOKEN_FIELD}={token}")
    }

    #[rocket::async_test]
    async fn valid_submission_reaches_the_handler_unchanged() {
        let (_, tokens, handler, guarded) = setup();
        let token = tokens.issue("capture", None).unwrap();
        let submission = Submission::new(Method::Post, form_body(&token));

        let reply = guarded.handle(submission.clone()).await;

        assert_eq!(reply, Reply::new(Status::Created, "captured"));
        assert_eq!(handler.calls(), 1);
        assert_eq!(handler.last(), Some(submission));
    }

    #[rocket::async_test]
    async fn missing_token_is_forbidden() {
        let (_, _, handler, guarded) = setup();
        let reply = guarded
            .handle(Submission::new(Method::Post, "name=Tina"))
            .await;
        assert_eq!(reply, Reply::forbidden());
        assert_eq!(handler.calls(), 0);

        let reply = guarded
            .handle(Submission::new(
                Method::Post,
                format!("name=Tina&{FORM_TOKEN_FIELD}="),
            ))
            .await;
        assert_eq!(reply, Reply::forbidden());
        assert_eq!(handler.calls(), 0);
    }

    #[rocket::async_test]
    async fn truncated_token_is_forbidden() {
        let (_, tokens, handler, guarded) = setup();
        let token = tokens.issue("capture", None).unwrap();
        let truncated = &token[..token.len() - 1];

        let reply = guarded
            .handle(Submission::new(Method::Post, form_body(truncated)))
            .await;

        assert_eq!(reply.status, Status::Forbidden);
        assert_eq!(handler.calls(), 0);
    }

    #[rocket::async_test]
    async fn every_rejection_looks_the_same() {
        let (clock, tokens, handler, guarded) = setup();
        let other_form = tokens.issue("other", None).unwrap();
        let short_lived = tokens
            .issue("capture", Some(Duration::from_secs(1)))
            .unwrap();
        let spent = tokens.issue("capture", None).unwrap();
        assert_eq!(
            guarded
                .handle(Submission::new(Method::Post, form_body(&spent)))
                .await
                .status,
            Status::Created
        );
        clock.advance(Duration::from_secs(2));

        for body in [
            "name=Tina".to_owned(),
            form_body("garbage"),
            form_body(&other_form),
            form_body(&short_lived),
            form_body(&spent),
        ] {
            let reply = guarded.handle(Submission::new(Method::Post, body)).await;
            assert_eq!(reply, Reply::forbidden());
        }
        assert_eq!(handler.calls(), 1);
    }

    #[rocket::async_test]
    async fn every_state_changing_method_is_checked() {
        let (_, _, handler, guarded) = setup();
        for method in [
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
            Method::Connect,
        ] {
            let reply = guarded.handle(Submission::new(method, "")).await;
            assert_eq!(reply.status, Status::Forbidden, "{method}");
        }
        assert_eq!(handler.calls(), 0);
    }

    #[rocket::async_test]
    async fn safe_methods_pass_through() {
        let (_, _, handler, guarded) = setup();
        for method in [Method::Get, Method::Head, Method::Options, Method::Trace] {
            let reply = guarded.handle(Submission::new(method, "")).await;
            assert_eq!(reply.status, Status::Created);
        }
        assert_eq!(handler.calls(), 4);
    }

    #[rocket::async_test]
    async fn header_transport_is_accepted() {
        let (_, tokens, handler, guarded) = setup();
        let token = tokens.issue("capture", None).unwrap();
        let submission =
            Submission::new(Method::Delete, "").with_header("x-form-token", token.clone());

        assert_eq!(submission.form_token(), Some(token));
        assert_eq!(guarded.handle(submission).await.status, Status::Created);
        assert_eq!(handler.calls(), 1);
    }

    #[rocket::async_test]
    async fn closures_can_be_guarded() {
        let (_, tokens, _, _) = setup();
        let guarded = tokens.guard("capture", |submission: Submission| async move {
            Reply::new(Status::Ok, format!("{} bytes", submission.body().len()))
        });
        assert_eq!(guarded.form_name(), "capture");

        let token = tokens.issue("capture", None).unwrap();
        let body = form_body(&token);
        let expected = format!("{} bytes", body.len());
        assert_eq!(
            guarded.handle(Submission::new(Method::Post, body)).await,
            Reply::new(Status::Ok, expected)
        );
    }

    #[test]
    fn body_field_wins_over_header() {
        let submission = Submission::new(Method::Post, form_body("from-body"))
            .with_header(FORM_TOKEN_HEADER, "from-header");
        assert_eq!(submission.form_token().as_deref(), Some("from-body"));

        let not_a_form = Submission::new(Method::Post, vec![0xff, 0xfe, b'=']);
        assert_eq!(not_a_form.form_token(), None);
    }

    #[rocket::async_test]
    async fn empty_body_field_falls_back_to_header() {
        let (_, tokens, handler, guarded) = setup();
        let token = tokens.issue("capture", None).unwrap();
        let submission = Submission::new(Method::Post, form_body(""))
            .with_header(FORM_TOKEN_HEADER, token.clone());

        assert_eq!(submission.form_token(), Some(token));
        assert_eq!(guarded.handle(submission).await.status, Status::Created);
        assert_eq!(handler.calls(), 1);

        let blank =
            Submission::new(Method::Post, form_body("")).with_header(FORM_TOKEN_HEADER, "");
        assert_eq!(blank.form_token(), None);
    }

    #[test]
    fn state_debug_hides_the_token() {
        let state = GuardState::ReceivedToken("secret-token".to_owned());
        assert!(!format!("{state:?}").contains("secret-token"));
    }
}
