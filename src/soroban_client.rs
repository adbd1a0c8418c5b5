//! Soroban Chain Client
//!
//! Mints on the destination Stellar/Soroban chain. Implements [`MintClient`]:
//!
//! - signer sequence: Horizon `GET /accounts/{source_account}`
//! - build, simulate and sign: `stellar` CLI (`contract invoke --build-only`,
//!   `tx simulate`, `tx sign`), each step passing the envelope over stdin/stdout
//! - submission: Soroban RPC `sendTransaction`
//! - status: Soroban RPC `getTransaction`
//!
//! Contract-level "already minted" failures surface during simulation and are
//! classified as [`MintError::AlreadyMinted`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::DestinationChainConfig;
use crate::minter::{MintClient, MintError, MintRequest, TxStatus};
use crate::rpc::{build_http_client, json_rpc};

/// Contract function invoked for each mint.
pub const MINT_FUNCTION: &str = "mint";

/// Upper bound for a single CLI step.
const CLI_TIMEOUT: Duration = Duration::from_secs(60);

/// Horizon account record (only the fields we read).
#[derive(Debug, Deserialize)]
struct HorizonAccount {
    sequence: String,
}

/// `sendTransaction` result.
#[derive(Debug, Clone, Deserialize)]
pub struct SendTransactionResponse {
    /// `PENDING`, `DUPLICATE`, `TRY_AGAIN_LATER` or `ERROR`
    pub status: String,
    /// Transaction hash (hex)
    pub hash: String,
    /// Base64 `TransactionResult` XDR, set when `status` is `ERROR`
    #[serde(rename = "errorResultXdr", default)]
    pub error_result_xdr: Option<String>,
}

/// `getTransaction` result.
#[derive(Debug, Clone, Deserialize)]
pub struct GetTransactionResponse {
    /// `SUCCESS`, `FAILED` or `NOT_FOUND`
    pub status: String,
    /// Ledger the transaction was included in
    #[serde(default)]
    pub ledger: Option<u64>,
    /// Base64 `TransactionResult` XDR
    #[serde(rename = "resultXdr", default)]
    pub result_xdr: Option<String>,
}

/// Captured output of one CLI step.
struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Client for the destination Soroban chain.
pub struct SorobanClient {
    http_client: Client,
    rpc_url: String,
    horizon_url: String,
    network_passphrase: String,
    contract_id: String,
    source_account: String,
    signing_secret: String,
    cli_path: String,
    already_minted_error_code: Option<u32>,
}

impl SorobanClient {
    /// Creates a new Soroban client, reading the signing secret from the environment.
    ///
    /// # Arguments
    ///
    /// * `config` - Destination chain configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SorobanClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Secret not set or HTTP client creation failed
    pub fn new(config: &DestinationChainConfig) -> Result<Self> {
        let secret = config.get_signing_secret()?;
        Self::with_secret(config, secret)
    }

    /// Creates a new Soroban client with an explicit signing secret.
    pub fn with_secret(config: &DestinationChainConfig, signing_secret: String) -> Result<Self> {
        Ok(Self {
            http_client: build_http_client()?,
            rpc_url: config.rpc_url.clone(),
            horizon_url: config.horizon_url.trim_end_matches('/').to_string(),
            network_passphrase: config.network_passphrase.clone(),
            contract_id: config.contract_id.clone(),
            source_account: config.source_account.clone(),
            signing_secret,
            cli_path: config.cli_path.clone(),
            already_minted_error_code: config.already_minted_error_code,
        })
    }

    /// Sends a signed envelope with `sendTransaction`.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Transaction hash (`PENDING`, or `DUPLICATE` of a known envelope)
    /// * `Err(MintError)` - See [`classify_send_response`]
    pub async fn send_transaction(&self, signed_xdr: &str) -> Result<String, MintError> {
        let response: SendTransactionResponse = json_rpc(
            &self.http_client,
            &self.rpc_url,
            "sendTransaction",
            serde_json::json!({ "transaction": signed_xdr }),
        )
        .await?;

        debug!(
            "sendTransaction returned status={} hash={}",
            response.status, response.hash
        );
        classify_send_response(response)
    }

    /// Builds, simulates and signs the mint envelope with the CLI.
    async fn build_signed_envelope(&self, request: &MintRequest) -> Result<String, MintError> {
        let amount = request.amount.to_string();
        let lock_id = request.lock_id.to_string();

        let unsigned = self
            .cli_step(
                "contract invoke",
                &[
                    "contract",
                    "invoke",
                    "--build-only",
                    "--id",
                    &self.contract_id,
                    "--source-account",
                    &self.source_account,
                    "--rpc-url",
                    &self.rpc_url,
                    "--network-passphrase",
                    &self.network_passphrase,
                    "--",
                    MINT_FUNCTION,
                    "--to",
                    &request.destination_address,
                    "--amount",
                    &amount,
                    "--lock_id",
                    &lock_id,
                ],
                None,
            )
            .await?;

        let simulated = self
            .cli_step(
                "tx simulate",
                &[
                    "tx",
                    "simulate",
                    "--source-account",
                    &self.source_account,
                    "--rpc-url",
                    &self.rpc_url,
                    "--network-passphrase",
                    &self.network_passphrase,
                ],
                Some(&unsigned),
            )
            .await?;

        self.cli_step(
            "tx sign",
            &[
                "tx",
                "sign",
                "--sign-with-key",
                &self.signing_secret,
                "--rpc-url",
                &self.rpc_url,
                "--network-passphrase",
                &self.network_passphrase,
            ],
            Some(&simulated),
        )
        .await
    }

    /// Runs one CLI step and returns its trimmed stdout (an envelope XDR).
    async fn cli_step(
        &self,
        step: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String, MintError> {
        let output = self.run_cli(args, stdin).await?;

        if !output.success {
            // Log at debug; the coordinator decides severity
            debug!(
                "stellar {} failed: stderr={}, stdout={}",
                step, output.stderr, output.stdout
            );
            return Err(classify_cli_failure(
                &output.stderr,
                self.already_minted_error_code,
            ));
        }

        let envelope = output.stdout.trim().to_string();
        if envelope.is_empty() {
            return Err(MintError::Transport(anyhow::anyhow!(
                "stellar {} produced no transaction envelope",
                step
            )));
        }
        Ok(envelope)
    }

    async fn run_cli(&self, args: &[&str], stdin: Option<&str>) -> Result<CliOutput> {
        let mut child = Command::new(&self.cli_path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.cli_path))?;

        if let Some(mut pipe) = child.stdin.take() {
            if let Some(input) = stdin {
                pipe.write_all(input.as_bytes())
                    .await
                    .context("Failed to write envelope to CLI stdin")?;
            }
        }

        let output = tokio::time::timeout(CLI_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {}s", self.cli_path, CLI_TIMEOUT.as_secs()))?
            .with_context(|| format!("Failed to wait for {}", self.cli_path))?;

        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl MintClient for SorobanClient {
    async fn load_sequence(&self) -> Result<u64> {
        let url = format!("{}/accounts/{}", self.horizon_url, self.source_account);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to query Horizon account {}", self.source_account))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Horizon returned {} for account {}",
                response.status(),
                self.source_account
            );
        }

        let account: HorizonAccount = response
            .json()
            .await
            .context("Failed to parse Horizon account response")?;
        account
            .sequence
            .parse::<u64>()
            .with_context(|| format!("Invalid account sequence '{}'", account.sequence))
    }

    async fn submit_mint(&self, request: &MintRequest) -> Result<String, MintError> {
        // The CLI loads the signer sequence itself while building the envelope
        debug!(
            "Building mint envelope: lock_id={}, observed_sequence={:?}",
            request.lock_id, request.sequence
        );
        let signed = self.build_signed_envelope(request).await?;
        self.send_transaction(&signed).await
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxStatus> {
        let response: GetTransactionResponse = json_rpc(
            &self.http_client,
            &self.rpc_url,
            "getTransaction",
            serde_json::json!({ "hash": tx_hash }),
        )
        .await
        .with_context(|| format!("getTransaction failed for {}", tx_hash))?;

        match response.status.as_str() {
            "SUCCESS" => Ok(TxStatus::Success),
            "NOT_FOUND" => Ok(TxStatus::NotFound),
            "FAILED" => Ok(TxStatus::Failed {
                reason: format!(
                    "ledger={:?}, result={}",
                    response.ledger,
                    response.result_xdr.as_deref().unwrap_or("unknown")
                ),
            }),
            other => anyhow::bail!("Unexpected getTransaction status '{}' for {}", other, tx_hash),
        }
    }
}

// ============================================================================
// RESPONSE CLASSIFICATION
// ============================================================================

/// Maps a `sendTransaction` response to a hash or a [`MintError`].
///
/// `DUPLICATE` means the identical envelope is already known to the network; its
/// hash is returned so the caller keeps polling the original transaction.
pub fn classify_send_response(response: SendTransactionResponse) -> Result<String, MintError> {
    match response.status.as_str() {
        "PENDING" | "DUPLICATE" => Ok(response.hash),
        "TRY_AGAIN_LATER" => Err(MintError::TryAgainLater(format!(
            "sendTransaction for {}",
            response.hash
        ))),
        "ERROR" => Err(MintError::Rejected(format!(
            "sendTransaction error for {}: {}",
            response.hash,
            response.error_result_xdr.as_deref().unwrap_or("no result")
        ))),
        other => Err(MintError::Transport(anyhow::anyhow!(
            "Unexpected sendTransaction status '{}' for {}",
            other,
            response.hash
        ))),
    }
}

/// Classifies a failed CLI step from its stderr.
///
/// # Arguments
///
/// * `stderr` - CLI standard error
/// * `already_minted_error_code` - Contract error code meaning "lock already minted"
///
/// # Returns
///
/// * `MintError::AlreadyMinted` - Text markers or the configured contract error code
/// * `MintError::Rejected` - Any other contract or host error
/// * `MintError::Transport` - Everything else (network, CLI usage)
pub fn classify_cli_failure(stderr: &str, already_minted_error_code: Option<u32>) -> MintError {
    if stderr.to_lowercase().contains("already minted") || stderr.contains("AlreadyMinted") {
        return MintError::AlreadyMinted;
    }
    if let Some(code) = already_minted_error_code {
        if stderr.contains(&format!("Error(Contract, #{})", code)) {
            return MintError::AlreadyMinted;
        }
    }

    let detail = stderr.trim().to_string();
    if stderr.contains("Error(Contract") || stderr.contains("HostError") {
        return MintError::Rejected(detail);
    }
    MintError::Transport(anyhow::anyhow!("stellar CLI failed: {}", detail))
}
