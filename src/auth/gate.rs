use std::collections::HashMap;
use std::time::SystemTime;

use tonic::metadata::MetadataMap;
use tracing::debug;

use super::token::{Claims, TokenManager};
use super::{methods, Role, AUTHORIZATION_HEADER};
use crate::error::AuthError;

const BEARER_SCHEME: &str = "bearer";

/// Roles allowed to call each gated method. Methods absent from the table are public.
pub type AccessibleRoles = HashMap<String, Vec<Role>>;

/// Role table for the laptop service.
pub fn laptop_service_roles() -> AccessibleRoles {
    HashMap::from([
        (methods::CREATE_LAPTOP.to_string(), vec![Role::Admin]),
        (methods::UPLOAD_IMAGE.to_string(), vec![Role::Admin]),
        (methods::RATE_LAPTOP.to_string(), vec![Role::Admin, Role::User]),
    ])
}

/// Stateless per-call role check, independent of the transport.
#[derive(Clone)]
pub struct AuthorizationGate {
    tokens: TokenManager,
    accessible_roles: AccessibleRoles,
}

impl AuthorizationGate {
    pub fn new(tokens: TokenManager, accessible_roles: AccessibleRoles) -> Self {
        Self {
            tokens,
            accessible_roles,
        }
    }

    /// Whether `method` needs a token at all.
    pub fn requires_auth(&self, method: &str) -> bool {
        self.accessible_roles.contains_key(method)
    }

    /// Checks a call to `method` carrying the raw `authorization` value.
    ///
    /// Returns `Ok(None)` for public methods and the verified claims otherwise.
    pub fn authorize(
        &self,
        method: &str,
        authorization: Option<&str>,
    ) -> Result<Option<Claims>, AuthError> {
        self.authorize_at(method, authorization, SystemTime::now())
    }

    /// [`authorize`](Self::authorize) with an explicit clock.
    pub fn authorize_at(
        &self,
        method: &str,
        authorization: Option<&str>,
        now: SystemTime,
    ) -> Result<Option<Claims>, AuthError> {
        let Some(roles) = self.accessible_roles.get(method) else {
            return Ok(None);
        };

        let header = authorization.ok_or(AuthError::MissingMetadata)?;
        let token = bearer_token(header)?;
        let claims = self
            .tokens
            .verify_token_at(token, now)
            .map_err(AuthError::InvalidToken)?;

        if !roles.contains(&claims.role) {
            return Err(AuthError::PermissionDenied {
                role: claims.role,
                method: method.to_string(),
            });
        }

        debug!(user = %claims.username, role = %claims.role, "authorized {method}");
        Ok(Some(claims))
    }

    /// [`authorize`](Self::authorize) reading the header from call metadata.
    pub fn authorize_metadata(
        &self,
        method: &str,
        metadata: &MetadataMap,
    ) -> Result<Option<Claims>, AuthError> {
        let header = metadata
            .get(AUTHORIZATION_HEADER)
            .map(|value| value.to_str().map_err(|_| AuthError::MalformedHeader))
            .transpose()?;
        self.authorize(method, header)
    }
}

/// Extracts the token from `Bearer <token>`; the scheme is case-insensitive.
fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let mut fields = header.split_whitespace();

    match (fields.next(), fields.next(), fields.next()) {
        (Some(scheme), Some(token), None) => {
            if scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
                Ok(token)
            } else {
                Err(AuthError::UnsupportedScheme(scheme.to_ascii_lowercase()))
            }
        }
        _ => Err(AuthError::MalformedHeader),
    }
}
