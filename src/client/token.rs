//! Access token acquisition and background refresh.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tonic::Status;
use tracing::{debug, info, warn};

use crate::pb::{AuthServiceClient, LoginRequest};

/// Wait before retrying after a failed refresh.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Source of fresh access tokens.
#[tonic::async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn login(&self) -> Result<String, Status>;
}

/// Logs in against the remote `AuthService` with fixed credentials.
#[derive(Clone)]
pub struct AuthClient {
    service: AuthServiceClient<Channel>,
    username: String,
    password: String,
}

impl AuthClient {
    pub fn new(channel: Channel, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            service: AuthServiceClient::new(channel),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[tonic::async_trait]
impl Authenticator for AuthClient {
    async fn login(&self) -> Result<String, Status> {
        let mut service = self.service.clone();
        let response = service
            .login(LoginRequest {
                username: self.username.clone(),
                password: self.password.clone(),
            })
            .await?;

        Ok(response.into_inner().access_token)
    }
}

/// Owns the current access token and keeps it fresh.
///
/// A background task re-authenticates every refresh interval, or one
/// [`RETRY_INTERVAL`] after a failure. Readers always see a complete token,
/// either the previous one or the new one. Dropping the lifecycle stops the
/// refresh task.
pub struct TokenLifecycle {
    token: watch::Receiver<String>,
    shutdown: CancellationToken,
}

impl TokenLifecycle {
    /// Logs in once, then starts refreshing every `refresh_interval`.
    ///
    /// # Errors
    /// Returns the status of the initial login if it fails.
    pub async fn start<A: Authenticator>(
        authenticator: A,
        refresh_interval: Duration,
    ) -> Result<Self, Status> {
        let initial = authenticator.login().await?;
        info!("obtained initial access token");

        let (tx, token) = watch::channel(initial);
        let shutdown = CancellationToken::new();

        tokio::spawn(refresh_loop(
            authenticator,
            tx,
            refresh_interval,
            shutdown.clone(),
        ));

        Ok(Self { token, shutdown })
    }

    /// The most recently obtained token.
    pub fn current(&self) -> String {
        self.token.borrow().clone()
    }

    /// A receiver that always observes the latest token.
    pub fn watcher(&self) -> watch::Receiver<String> {
        self.token.clone()
    }

    /// Stops the background refresh. The last token stays readable.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TokenLifecycle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn refresh_loop<A: Authenticator>(
    authenticator: A,
    tx: watch::Sender<String>,
    refresh_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut wait = refresh_interval;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }

        match authenticator.login().await {
            Ok(token) => {
                tx.send_replace(token);
                debug!("access token refreshed");
                wait = refresh_interval;
            }
            Err(status) => {
                warn!("token refresh failed, retrying: {}", status.message());
                wait = RETRY_INTERVAL;
            }
        }
    }

    debug!("token refresh stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tonic::Code;

    use super::*;

    #[derive(Clone, Default)]
    struct ScriptedAuthenticator {
        script: Arc<Mutex<VecDeque<Result<String, Status>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedAuthenticator {
        fn new(script: Vec<Result<String, Status>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[tonic::async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn login(&self) -> Result<String, Status> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Status::unavailable("script exhausted")))
        }
    }

    const REFRESH: Duration = Duration::from_secs(60);
    const SLACK: Duration = Duration::from_millis(10);

    #[tokio::test(start_paused = true)]
    async fn initial_login_failure_is_fatal() {
        let auth = ScriptedAuthenticator::new(vec![Err(Status::invalid_argument("bad creds"))]);

        let err = TokenLifecycle::start(auth.clone(), REFRESH)
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn token_is_replaced_after_each_interval() {
        let auth = ScriptedAuthenticator::new(vec![Ok("t1".into()), Ok("t2".into())]);
        let lifecycle = TokenLifecycle::start(auth.clone(), REFRESH).await.unwrap();
        assert_eq!(lifecycle.current(), "t1");

        tokio::time::sleep(REFRESH - SLACK).await;
        assert_eq!(lifecycle.current(), "t1");

        tokio::time::sleep(SLACK * 2).await;
        assert_eq!(lifecycle.current(), "t2");
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_retries_after_one_second() {
        let auth = ScriptedAuthenticator::new(vec![
            Ok("t1".into()),
            Err(Status::unavailable("server down")),
            Ok("t2".into()),
        ]);
        let lifecycle = TokenLifecycle::start(auth.clone(), REFRESH).await.unwrap();

        tokio::time::sleep(REFRESH + SLACK).await;
        assert_eq!(auth.calls(), 2);
        assert_eq!(lifecycle.current(), "t1");

        tokio::time::sleep(RETRY_INTERVAL).await;
        assert_eq!(auth.calls(), 3);
        assert_eq!(lifecycle.current(), "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn watcher_observes_refreshes() {
        let auth = ScriptedAuthenticator::new(vec![Ok("t1".into()), Ok("t2".into())]);
        let lifecycle = TokenLifecycle::start(auth, REFRESH).await.unwrap();
        let mut watcher = lifecycle.watcher();

        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow(), "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_refreshing() {
        let auth = ScriptedAuthenticator::new(vec![Ok("t1".into()), Ok("t2".into())]);
        let lifecycle = TokenLifecycle::start(auth.clone(), REFRESH).await.unwrap();

        lifecycle.stop();
        tokio::time::sleep(REFRESH * 3).await;
        assert_eq!(auth.calls(), 1);
        assert_eq!(lifecycle.current(), "t1");
    }
}
