//! Client side: token lifecycle, authenticated transport, RPC wrappers and
//! local measurements.

pub mod channel;
pub mod laptop;
pub mod measure;
pub mod telemetry;
pub mod token;

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};

pub use channel::{laptop_auth_methods, AuthChannel};
pub use laptop::LaptopClient;
pub use measure::{run_sampler, Sampler};
pub use telemetry::{telemetry_queue, TelemetrySender};
pub use token::{AuthClient, Authenticator, TokenLifecycle};

use crate::error::Result;

/// Transport used by [`LaptopClient`].
pub type AuthenticatedChannel = AuthChannel<Channel>;

/// Connection settings for a client session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server URL, e.g. `http://127.0.0.1:8080`.
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// How often the access token is renewed.
    pub refresh_interval: Duration,
}

/// Opens a channel, logs in and returns a client that attaches the token to
/// gated calls, together with the lifecycle keeping that token fresh.
pub async fn connect(config: &ClientConfig) -> Result<(LaptopClient, TokenLifecycle)> {
    let channel = Endpoint::from_shared(config.server_url.clone())?
        .connect()
        .await?;

    let authenticator = AuthClient::new(
        channel.clone(),
        config.username.clone(),
        config.password.clone(),
    );
    let tokens = TokenLifecycle::start(authenticator, config.refresh_interval).await?;

    let transport = AuthChannel::new(channel, tokens.watcher(), laptop_auth_methods());
    Ok((LaptopClient::new(transport), tokens))
}
