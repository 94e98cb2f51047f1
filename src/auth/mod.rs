//! Token issuing and per-method authorization.

pub mod gate;
pub mod layer;
pub mod token;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use gate::{laptop_service_roles, AccessibleRoles, AuthorizationGate};
pub use layer::{AuthLayer, AuthMiddleware};
pub use token::{Claims, TokenManager};

/// Metadata key carrying the access token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Fully qualified gRPC method names.
pub mod methods {
    pub const CREATE_LAPTOP: &str = "/pcbook.LaptopService/CreateLaptop";
    pub const SEARCH_LAPTOP: &str = "/pcbook.LaptopService/SearchLaptop";
    pub const UPLOAD_IMAGE: &str = "/pcbook.LaptopService/UploadImage";
    pub const RATE_LAPTOP: &str = "/pcbook.LaptopService/RateLaptop";
    pub const SEND_LAPTOP_INFO: &str = "/pcbook.LaptopService/SendLaptopInfo";
    pub const LOGIN: &str = "/pcbook.AuthService/Login";
}

/// Role embedded in a credential and in every token issued for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}
