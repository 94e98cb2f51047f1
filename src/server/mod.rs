//! Server side of the catalog: RPC handlers, login and configuration.

/// Login service.
pub mod auth_service;

/// Server configuration.
pub mod config;

/// Laptop catalog service.
pub mod service;

pub use auth_service::AuthServiceImpl;
pub use config::ServerConfig;
pub use service::{LaptopServiceImpl, MAX_IMAGE_SIZE};

use crate::auth::{laptop_service_roles, AuthLayer, AuthorizationGate, TokenManager};
use crate::error::Result;
use crate::store::{User, UserStore};

/// Authorization layer enforcing the laptop service role table.
pub fn auth_layer(tokens: TokenManager) -> AuthLayer {
    AuthLayer::new(AuthorizationGate::new(tokens, laptop_service_roles()))
}

/// Saves every bootstrap credential into `store`.
pub async fn seed_users(store: &UserStore, users: &[User]) -> Result<()> {
    for user in users {
        store.save(user).await?;
    }
    Ok(())
}
