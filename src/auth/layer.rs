//! Tower middleware running the [`AuthorizationGate`] before any handler.
//!
//! tonic interceptors do not see the method being called, so the gate sits one
//! level lower and reads the method from the HTTP/2 request path. Rejected
//! calls are answered with a gRPC status response and never reach the service,
//! which covers unary and streaming methods alike.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{self, Either, Ready};
use metrics::counter;
use tonic::body::BoxBody;
use tonic::Status;
use tower::{Layer, Service};
use tracing::warn;

use super::gate::AuthorizationGate;

/// Installs [`AuthMiddleware`] around every service of a tonic server.
#[derive(Clone)]
pub struct AuthLayer {
    gate: Arc<AuthorizationGate>,
}

impl AuthLayer {
    pub fn new(gate: AuthorizationGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

/// Authorizes each request and stores the verified
/// [`Claims`](super::token::Claims) in the request extensions.
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    gate: Arc<AuthorizationGate>,
}

impl<S, B> Service<http::Request<B>> for AuthMiddleware<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Either<Ready<Result<Self::Response, Self::Error>>, S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        let authorization = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match self.gate.authorize(req.uri().path(), authorization) {
            Ok(Some(claims)) => {
                req.extensions_mut().insert(claims);
                Either::Right(self.inner.call(req))
            }
            Ok(None) => Either::Right(self.inner.call(req)),
            Err(e) => {
                warn!("rejected call to {}: {e}", req.uri().path());
                counter!("auth.gate.rejected").increment(1);
                Either::Left(future::ready(Ok(Status::from(e).to_http())))
            }
        }
    }
}
