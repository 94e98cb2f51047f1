use std::time::Instant;

use metrics::{counter, histogram};
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::auth::TokenManager;
use crate::pb::auth_service_server::AuthService;
use crate::pb::{LoginRequest, LoginResponse};
use crate::store::UserStore;

/// gRPC service exchanging credentials for access tokens.
pub struct AuthServiceImpl {
    users: UserStore,
    tokens: TokenManager,
}

impl AuthServiceImpl {
    /// Creates a login service over `users`, issuing tokens from `tokens`.
    pub fn new(users: UserStore, tokens: TokenManager) -> Self {
        Self { users, tokens }
    }

    #[allow(clippy::result_large_err)]
    fn validate_username(username: &str) -> Result<(), Status> {
        if username.is_empty() {
            return Err(Status::invalid_argument("username cannot be empty"));
        }

        if username.len() > 256 {
            return Err(Status::invalid_argument("username too long"));
        }

        Ok(())
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<LoginResponse>, Status> {
        let start = Instant::now();
        let LoginRequest { username, password } = request.into_inner();

        Self::validate_username(&username)?;

        let verified = match self.users.find(&username).await {
            Some(user) => tokio::task::spawn_blocking(move || {
                user.is_correct_password(&password).then_some(user)
            })
            .await
            .map_err(|e| Status::internal(format!("password check failed: {e}")))?,
            None => None,
        };

        histogram!("auth.login.duration").record(start.elapsed().as_secs_f64());

        let Some(user) = verified else {
            counter!("auth.login.failure").increment(1);
            warn!("failed login for {username}");
            return Err(Status::invalid_argument("incorrect username or password"));
        };

        let access_token = self.tokens.create_token(&user)?;
        counter!("auth.login.success").increment(1);
        info!(role = %user.role, "issued token for {username}");

        Ok(Response::new(LoginResponse { access_token }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tonic::Code;

    use super::*;
    use crate::auth::Role;
    use crate::store::User;

    async fn service() -> (AuthServiceImpl, TokenManager) {
        let users = UserStore::new();
        users
            .save(&User::new("admin", "secret", Role::Admin).unwrap())
            .await
            .unwrap();
        let tokens = TokenManager::new(b"login-secret", Duration::from_secs(60));
        (AuthServiceImpl::new(users, tokens.clone()), tokens)
    }

    fn login(username: &str, password: &str) -> Request<LoginRequest> {
        Request::new(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn correct_credentials_yield_a_verifiable_token() {
        let (service, tokens) = service().await;
        let token = service
            .login(login("admin", "secret"))
            .await
            .unwrap()
            .into_inner()
            .access_token;

        let claims = tokens.verify_token(&token).unwrap();
        assert_eq!(claims.username, "admin");
        assert_eq!(claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_look_the_same() {
        let (service, _) = service().await;

        let wrong = service.login(login("admin", "nope")).await.unwrap_err();
        let unknown = service.login(login("ghost", "secret")).await.unwrap_err();

        assert_eq!(wrong.code(), Code::InvalidArgument);
        assert_eq!(unknown.code(), Code::InvalidArgument);
        assert_eq!(wrong.message(), unknown.message());
    }

    #[tokio::test]
    async fn empty_username_is_rejected() {
        let (service, _) = service().await;
        let status = service.login(login("", "secret")).await.unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
