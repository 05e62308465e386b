use std::time::Duration;

use crate::{Error, Result};

const USER_AGENT: &str = concat!("rust-archiver/", env!("CARGO_PKG_VERSION"));

/// Build the shared `reqwest::Client` handed to feed sources and notifiers.
///
/// A zero `request_timeout` leaves reqwest's default (no timeout).
pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);

    if request_timeout > Duration::ZERO {
        builder = builder.timeout(request_timeout);
    }

    builder
        .build()
        .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))
}
