use config::Config;
use log::{info, warn};
use secrecy::SecretString;
use sse::error::{config_error, Error};
use sse::{Broadcaster, HttpTransport, HttpTransportConfig, StaticToken};
use std::sync::Arc;

pub mod config;
pub mod logging;

/// Build the HTTP transport for the configured backend.
///
/// A missing bearer token is only allowed outside of production, where a local
/// backend may accept anonymous streams.
pub fn init_transport(config: &Config) -> Result<HttpTransport, Error> {
    let token = match config.bearer_token() {
        Some(token) => token,
        None if config.is_production() => {
            return Err(config_error("a bearer token is required in production"));
        }
        None => {
            warn!("No bearer token configured; connecting with an empty credential");
            SecretString::new(String::new())
        }
    };

    info!(
        "Event stream config: backend={}, connect_timeout={:?}, backoff={:?}",
        config.backend_base_url(),
        config.connect_timeout(),
        config.backoff(),
    );

    HttpTransport::new(
        config.backend_base_url(),
        Box::new(StaticToken::new(token)),
        HttpTransportConfig {
            connect_timeout: config.connect_timeout(),
            ..HttpTransportConfig::default()
        },
    )
}

// Service-level state holding the process-scoped event stream broadcaster.
// Cloned into every consumer instead of being reached through a global.
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Broadcaster,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, transport: HttpTransport) -> Self {
        let broadcaster = Broadcaster::new(Arc::new(transport), app_config.backoff());
        Self {
            broadcaster,
            config: app_config,
        }
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Close every stream. Call once at application shutdown.
    pub fn shutdown(&self) {
        self.broadcaster.shutdown();
    }
}
