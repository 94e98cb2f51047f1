use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pasetors::keys::SymmetricKey;
use pasetors::token::UntrustedToken;
use pasetors::version4::{LocalToken, V4};
use pasetors::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Role;
use crate::error::TokenError;
use crate::store::User;

/// Default lifetime of an access token.
pub const DEFAULT_TOKEN_DURATION: Duration = Duration::from_secs(15 * 60);

/// Identity carried inside an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to.
    pub username: String,
    /// Role of that user at issue time.
    pub role: Role,
    /// Issue time, seconds since the Unix epoch.
    #[serde(rename = "issued_at")]
    pub iat: u64,
    /// Expiry, seconds since the Unix epoch.
    #[serde(rename = "expires_at")]
    pub exp: u64,
}

/// Issues and verifies encrypted, time-bound access tokens.
///
/// Tokens are PASETO `v4.local`: the claims are sealed with authenticated
/// symmetric encryption, so holders can neither read nor alter them. The
/// 32-byte key is the SHA-256 digest of the configured secret. Verifying a
/// token needs only that secret and the current time.
#[derive(Clone)]
pub struct TokenManager {
    key: SymmetricKey<V4>,
    duration: Duration,
}

impl TokenManager {
    /// Creates a manager keyed from `secret`, issuing tokens valid for `duration`.
    pub fn new(secret: &[u8], duration: Duration) -> Self {
        let digest = Sha256::digest(secret);
        let key = SymmetricKey::<V4>::from(digest.as_slice())
            .unwrap_or_else(|_| unreachable!("SHA-256 digests are 32 bytes"));

        Self { key, duration }
    }

    /// Lifetime of newly issued tokens.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Issues a token for `user` that expires one token duration from now.
    pub fn create_token(&self, user: &User) -> Result<String, TokenError> {
        self.create_token_at(user, SystemTime::now())
    }

    /// Issues a token for `user` as if the current time were `now`.
    pub fn create_token_at(&self, user: &User, now: SystemTime) -> Result<String, TokenError> {
        let iat = unix_secs(now);
        let claims = Claims {
            username: user.username.clone(),
            role: user.role,
            iat,
            exp: iat.saturating_add(self.duration.as_secs()),
        };

        let payload =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Encode(e.to_string()))?;
        LocalToken::encrypt(&self.key, &payload, None, None)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verifies `token` against the current time.
    ///
    /// # Errors
    /// [`TokenError::Expired`] for an authentic token past its expiry,
    /// [`TokenError::Invalid`] for anything malformed, tampered with or sealed
    /// under another key.
    pub fn verify_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.verify_token_at(token, SystemTime::now())
    }

    /// Verifies `token` as if the current time were `now`.
    pub fn verify_token_at(&self, token: &str, now: SystemTime) -> Result<Claims, TokenError> {
        let untrusted = UntrustedToken::<Local, V4>::try_from(token)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let trusted = LocalToken::decrypt(&self.key, &untrusted, None, None)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let claims: Claims = serde_json::from_str(trusted.payload())
            .map_err(|e| TokenError::Invalid(e.to_string()))?;

        if unix_secs(now) >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| unreachable!("System time is after UNIX_EPOCH"))
        .as_secs()
}
