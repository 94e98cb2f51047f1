//! Laptop catalog over gRPC.
//!
//! The server exposes `pcbook.LaptopService` (create, search, image upload,
//! rating and telemetry ingestion) behind a role-based token gate, plus
//! `pcbook.AuthService` for logging in. The client side keeps an access token
//! fresh in the background and attaches it to the calls that need it.

/// Token issuing, verification and per-method authorization.
pub mod auth;

/// In-process pub/sub for republished telemetry.
pub mod bus;

/// Client-side token lifecycle, transport and RPC wrappers.
pub mod client;

/// Per-call cancellation and deadlines.
pub mod context;

/// Error types.
pub mod error;

/// Memory size normalization.
pub mod memory;

/// Wire types and generated service stubs.
pub mod pb;

/// RPC handlers and server configuration.
pub mod server;

/// Catalog, rating, image and credential stores.
pub mod store;

#[cfg(test)]
mod fixtures;

pub use error::{AuthError, Error, PublishError, Result, StoreError, TokenError};
