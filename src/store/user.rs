use std::collections::HashMap;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use tokio::sync::RwLock;

use crate::auth::Role;
use crate::error::{Error, StoreError};

/// A credential: username, argon2 password hash and role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    /// Unique login name.
    pub username: String,
    /// Role granted to tokens issued for this user.
    pub role: Role,
    hashed_password: String,
}

impl User {
    /// Hashes `password` with a fresh random salt.
    ///
    /// # Errors
    /// Returns [`Error::Password`] if hashing fails.
    pub fn new(username: impl Into<String>, password: &str, role: Role) -> Result<Self, Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Password(e.to_string()))?
            .to_string();

        Ok(Self {
            username: username.into(),
            role,
            hashed_password,
        })
    }

    /// Whether `password` matches the stored hash.
    pub fn is_correct_password(&self, password: &str) -> bool {
        PasswordHash::new(&self.hashed_password)
            .map(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }
}

/// Credentials keyed by username.
#[derive(Default)]
pub struct UserStore {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl Clone for UserStore {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
        }
    }
}

impl UserStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a copy of `user`; fails if the username is taken.
    pub async fn save(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;

        if users.contains_key(&user.username) {
            return Err(StoreError::AlreadyExists(user.username.clone()));
        }

        users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    /// Returns a copy of the credential for `username`.
    pub async fn find(&self, username: &str) -> Option<User> {
        self.users.read().await.get(username).cloned()
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}
