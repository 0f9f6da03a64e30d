//! Shared HTTP plumbing for the poll clients

use crate::error::{AgentError, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Build a JSON client with a request timeout
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// GET a URL and decode the JSON body
///
/// Non-success statuses are errors.
pub async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: &str) -> Result<T> {
    debug!(url = %url, "GET");

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(AgentError::Status {
            url: url.to_string(),
            status,
        });
    }

    Ok(response.json().await?)
}
