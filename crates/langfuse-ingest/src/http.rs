// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use std::error::Error;
use std::time::Duration;

/// Creates a reqwest client builder with TLS configuration.
/// When the "rustls-tls" feature is enabled, it uses reqwest's rustls TLS implementation.
#[cfg(feature = "rustls-tls")]
pub fn create_reqwest_client_builder() -> Result<ClientBuilder, Box<dyn Error>> {
    Ok(reqwest::Client::builder().use_rustls_tls())
}

#[cfg(not(feature = "rustls-tls"))]
pub fn create_reqwest_client_builder() -> Result<ClientBuilder, Box<dyn Error>> {
    Ok(reqwest::Client::builder())
}

/// Builds the client used for every ingestion request. `timeout` bounds the
/// whole request, so a stalled read surfaces as a network error.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, Box<dyn Error>> {
    let client = create_reqwest_client_builder()?.timeout(timeout).build()?;
    Ok(client)
}
