use std::{sync::OnceLock, time::Duration};

use tracing::debug;

use crate::{Error, Result};

/// Default `User-Agent` for outbound requests.
pub const DEFAULT_USER_AGENT: &str = concat!("release-relay/", env!("CARGO_PKG_VERSION"));

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a `reqwest::Client` with the relay's defaults.
///
/// `request_timeout` of zero leaves reqwest's own (unbounded) default in place,
/// so callers should always pass a positive value.
pub fn build_client(request_timeout: Duration, user_agent: Option<&str>) -> Result<reqwest::Client> {
    install_rustls_provider();

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
        .connect_timeout(Duration::from_secs(10));

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))
}
