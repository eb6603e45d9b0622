use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used for outbound webhooks.
///
/// Falls back to a default client if the builder rejects the configuration.
pub fn build_client(timeout: Duration) -> Client {
    install_rustls_provider();
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("notify-relay/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using defaults");
            Client::new()
        })
}
