//! Transport wrapper that attaches the bearer token to gated calls.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::HeaderValue;
use tokio::sync::watch;
use tower::Service;
use tracing::warn;

use crate::auth::methods;

/// Methods the laptop service gates behind a token.
pub fn laptop_auth_methods() -> HashSet<String> {
    [
        methods::CREATE_LAPTOP,
        methods::UPLOAD_IMAGE,
        methods::RATE_LAPTOP,
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Adds `authorization: Bearer <token>` to requests for the configured methods.
///
/// The token is read from a watch channel on every call, so refreshes take
/// effect immediately. Calls to other methods pass through untouched.
#[derive(Clone, Debug)]
pub struct AuthChannel<S> {
    inner: S,
    token: watch::Receiver<String>,
    methods: Arc<HashSet<String>>,
}

impl<S> AuthChannel<S> {
    pub fn new(inner: S, token: watch::Receiver<String>, methods: HashSet<String>) -> Self {
        Self {
            inner,
            token,
            methods: Arc::new(methods),
        }
    }

    /// A channel that never attaches a token.
    pub fn unauthenticated(inner: S) -> Self {
        let (_, token) = watch::channel(String::new());
        Self::new(inner, token, HashSet::new())
    }

    fn bearer(&self) -> Option<HeaderValue> {
        let token = self.token.borrow();
        match HeaderValue::from_str(&format!("Bearer {}", *token)) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("access token is not a valid header value: {e}");
                None
            }
        }
    }
}

impl<S, B> Service<http::Request<B>> for AuthChannel<S>
where
    S: Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        if self.methods.contains(req.uri().path()) {
            if let Some(value) = self.bearer() {
                req.headers_mut().insert(http::header::AUTHORIZATION, value);
            }
        }
        self.inner.call(req)
    }
}
