//! JSON-RPC 2.0 over HTTP, shared by the source and destination chain clients.

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Timeout applied to every JSON-RPC call.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Builds the HTTP client used for chain RPC.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(RPC_TIMEOUT)
        .no_proxy() // Avoid macOS system-configuration issues in tests
        .build()
        .context("Failed to create HTTP client")
}

/// Generic JSON-RPC call helper.
///
/// # Arguments
///
/// * `client` - HTTP client
/// * `rpc_url` - JSON-RPC endpoint
/// * `method` - RPC method name
/// * `params` - Positional (array) or named (object) parameters
///
/// # Returns
///
/// * `Ok(T)` - The deserialized `result` member
/// * `Err(anyhow::Error)` - Transport failure, timeout, JSON-RPC error object, or a missing result
pub async fn json_rpc<T: serde::de::DeserializeOwned>(
    client: &Client,
    rpc_url: &str,
    method: &str,
    params: serde_json::Value,
) -> Result<T> {
    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });

    let rpc_future = async {
        let resp = client
            .post(rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, rpc_url))?;
        resp.json::<serde_json::Value>()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, rpc_url))
    };

    let response: serde_json::Value = tokio::time::timeout(RPC_TIMEOUT, rpc_future)
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Timed out after {}s waiting for {} from {}",
                RPC_TIMEOUT.as_secs(),
                method,
                rpc_url
            )
        })??;

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!(
            "JSON-RPC error from {} ({}): {} (code: {})",
            rpc_url,
            method,
            message,
            code
        );
    }

    let result = response
        .get("result")
        .ok_or_else(|| anyhow::anyhow!("No result in {} response", method))?;

    serde_json::from_value(result.clone())
        .with_context(|| format!("Failed to deserialize {} result", method))
}
