//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the bridge service.
//! Configuration includes source and destination chain endpoints, watcher timing,
//! mint retry policy, event validation bounds and supervisor timers.
//!
//! Values are layered: the TOML file is read first, then environment variables
//! prefixed with `BRIDGE__` override individual keys (`__` separates sections).
//! Signing secrets are never stored in the file; the file names the environment
//! variable that holds them.

use serde::{Deserialize, Serialize};

use crate::validator::is_valid_stellar_account;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG_PATH";

/// Prefix for per-key environment overrides (e.g. `BRIDGE__WATCHER__CONFIRMATIONS`).
pub const ENV_PREFIX: &str = "BRIDGE";

/// Upper bound for every interval and timeout setting (one day).
pub const MAX_INTERVAL_MS: u64 = 86_400_000;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - Source chain connection details (where assets are locked)
/// - Destination chain connection details (where pegged assets are minted)
/// - Lock watcher cursor and batching settings
/// - Mint coordinator retry and confirmation settings
/// - Event validation bounds and token whitelist
/// - Supervisor health and statistics timers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source chain configuration (EVM, lock events)
    pub source_chain: SourceChainConfig,
    /// Destination chain configuration (Soroban, mint transactions)
    pub destination_chain: DestinationChainConfig,
    /// Lock watcher configuration
    pub watcher: WatcherConfig,
    /// Mint coordinator configuration
    pub minter: MinterConfig,
    /// Event validation configuration
    pub validation: ValidationConfig,
    /// Supervisor timers
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Configuration for the source (lock) chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Address of the lock contract emitting `TokensLocked`
    pub contract_addr: String,
    /// Chain ID (informational, used in logs)
    pub chain_id: u64,
    /// Decimals of the locked asset's base unit
    #[serde(default = "default_source_decimals")]
    pub decimals: u32,
    /// Environment variable holding the source signing key.
    /// The watcher only reads the chain; this is accepted for deployment parity.
    #[serde(default)]
    pub signing_key_env: Option<String>,
}

/// Configuration for the destination (mint) chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// Soroban RPC endpoint URL (sendTransaction / getTransaction)
    pub rpc_url: String,
    /// Horizon endpoint URL (account sequence lookups)
    pub horizon_url: String,
    /// Network passphrase used when signing
    pub network_passphrase: String,
    /// Contract id of the mintable token contract (C..., 56 chars)
    pub contract_id: String,
    /// Public key of the signing account (G..., 56 chars)
    pub source_account: String,
    /// Environment variable holding the signing secret (S..., 56 chars)
    pub signing_secret_env: String,
    /// Decimals of the minted asset's base unit
    #[serde(default = "default_destination_decimals")]
    pub decimals: u32,
    /// Path to the stellar CLI used to build, simulate and sign transactions
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    /// Contract error code the token contract raises when a lock id was already minted
    #[serde(default)]
    pub already_minted_error_code: Option<u32>,
}

/// Lock watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// First block to scan: `"latest"` or an explicit height
    #[serde(default = "default_start_block")]
    pub start_block: String,
    /// Blocks required on top of a block before its events are acted on
    pub confirmations: u64,
    /// Poll interval in milliseconds
    pub polling_interval_ms: u64,
    /// Maximum number of blocks fetched per tick
    pub max_batch_size: u64,
    /// Cross-check each event's transaction receipt before publishing
    #[serde(default)]
    pub verify_receipts: bool,
}

/// Mint coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinterConfig {
    /// Maximum submission attempts per lock before it fails permanently
    pub retry_attempts: u32,
    /// Delay before a failed attempt is retried, in milliseconds
    pub retry_delay_ms: u64,
    /// Upper bound on waiting for a submitted transaction's terminal status
    pub confirmation_timeout_ms: u64,
    /// Interval between status polls while awaiting confirmation
    #[serde(default = "default_confirmation_poll_interval_ms")]
    pub confirmation_poll_interval_ms: u64,
    /// Upper bound on one idle wait for new events when the queue is empty
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Time allowed on stop to finish queued operations; zero abandons them at once
    #[serde(default = "default_shutdown_drain_timeout_ms")]
    pub shutdown_drain_timeout_ms: u64,
    /// Settled operations kept for inspection; lock ids are remembered regardless
    #[serde(default = "default_settled_history_limit")]
    pub settled_history_limit: usize,
}

/// Event validation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Smallest accepted lock amount, source base units (inclusive)
    #[serde(with = "serde_u128")]
    pub min_amount: u128,
    /// Largest accepted lock amount, source base units (inclusive)
    #[serde(with = "serde_u128")]
    pub max_amount: u128,
    /// Whether only whitelisted tokens are accepted
    #[serde(default)]
    pub whitelist_enabled: bool,
    /// Accepted token addresses when whitelisting is enabled
    #[serde(default)]
    pub whitelisted_tokens: Vec<String>,
}

/// Supervisor timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Interval between health probes in milliseconds
    pub health_check_interval_ms: u64,
    /// Interval between statistics log lines in milliseconds
    pub stats_interval_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            stats_interval_ms: 60_000,
        }
    }
}

/// Where the lock watcher starts scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlock {
    /// Start from the chain's safe height at the first tick
    Latest,
    /// Start at this block (inclusive)
    Height(u64),
}

fn default_source_decimals() -> u32 {
    18
}

fn default_destination_decimals() -> u32 {
    7
}

fn default_cli_path() -> String {
    "stellar".to_string()
}

fn default_start_block() -> String {
    "latest".to_string()
}

fn default_confirmation_poll_interval_ms() -> u64 {
    2_000
}

fn default_idle_wait_ms() -> u64 {
    1_000
}

fn default_shutdown_drain_timeout_ms() -> u64 {
    30_000
}

fn default_settled_history_limit() -> usize {
    1_024
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// This function ensures that:
    /// - Amount bounds form a non-empty closed interval
    /// - Batch size, retry attempts and all intervals are non-zero
    /// - Intervals and timeouts do not exceed one day
    /// - Whitelisting is not enabled with an empty token list
    /// - `start_block` is `latest` or a block height
    /// - Endpoint URLs parse and use http(s)
    /// - Contract and account identifiers are well-formed
    /// - Source and destination chains have distinct names
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - The first problem found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.validation.min_amount > self.validation.max_amount {
            anyhow::bail!(
                "Configuration error: min_amount ({}) is greater than max_amount ({})",
                self.validation.min_amount,
                self.validation.max_amount
            );
        }

        if self.validation.whitelist_enabled && self.validation.whitelisted_tokens.is_empty() {
            anyhow::bail!(
                "Configuration error: whitelist_enabled is set but whitelisted_tokens is empty"
            );
        }

        if self.watcher.max_batch_size == 0 {
            anyhow::bail!("Configuration error: watcher.max_batch_size must be at least 1");
        }

        if self.minter.retry_attempts == 0 {
            anyhow::bail!("Configuration error: minter.retry_attempts must be at least 1");
        }

        let intervals = [
            ("watcher.polling_interval_ms", self.watcher.polling_interval_ms),
            ("minter.retry_delay_ms", self.minter.retry_delay_ms),
            ("minter.confirmation_timeout_ms", self.minter.confirmation_timeout_ms),
            (
                "minter.confirmation_poll_interval_ms",
                self.minter.confirmation_poll_interval_ms,
            ),
            ("minter.idle_wait_ms", self.minter.idle_wait_ms),
            (
                "supervisor.health_check_interval_ms",
                self.supervisor.health_check_interval_ms,
            ),
            ("supervisor.stats_interval_ms", self.supervisor.stats_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                anyhow::bail!("Configuration error: {} must be greater than zero", name);
            }
            if value > MAX_INTERVAL_MS {
                anyhow::bail!(
                    "Configuration error: {} ({}) exceeds the maximum of {}ms",
                    name,
                    value,
                    MAX_INTERVAL_MS
                );
            }
        }

        if self.minter.shutdown_drain_timeout_ms > MAX_INTERVAL_MS {
            anyhow::bail!(
                "Configuration error: minter.shutdown_drain_timeout_ms ({}) exceeds the maximum of {}ms",
                self.minter.shutdown_drain_timeout_ms,
                MAX_INTERVAL_MS
            );
        }

        self.watcher.start_block()?;

        for (name, value) in [
            ("source_chain.rpc_url", &self.source_chain.rpc_url),
            ("destination_chain.rpc_url", &self.destination_chain.rpc_url),
            ("destination_chain.horizon_url", &self.destination_chain.horizon_url),
        ] {
            validate_http_url(value)
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", name, e))?;
        }

        validate_hex_address(&self.source_chain.contract_addr, 20)
            .map_err(|e| anyhow::anyhow!("Invalid source_chain.contract_addr: {}", e))?;

        if self.validation.whitelist_enabled {
            for token in &self.validation.whitelisted_tokens {
                validate_hex_address(token, 20)
                    .map_err(|e| anyhow::anyhow!("Invalid whitelisted token {}: {}", token, e))?;
            }
        }

        if !is_valid_stellar_account(&self.destination_chain.source_account) {
            anyhow::bail!(
                "Invalid destination_chain.source_account: expected a 56-character G... account"
            );
        }

        if !is_valid_strkey(&self.destination_chain.contract_id, 'C') {
            anyhow::bail!(
                "Invalid destination_chain.contract_id: expected a 56-character C... contract id"
            );
        }

        if self.source_chain.name == self.destination_chain.name {
            anyhow::bail!(
                "Configuration error: source and destination chains are both named '{}'. Each chain must have a unique name.",
                self.source_chain.name
            );
        }

        Ok(())
    }

    /// Loads configuration from the default location.
    ///
    /// The path is taken from `BRIDGE_CONFIG_PATH` when set, otherwise
    /// `config/bridge.toml`.
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Missing file, parse failure or validation failure
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(&config_path)
    }

    /// Loads configuration from a TOML file, layered with `BRIDGE__*` environment overrides.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Path to the TOML file
    ///
    /// # Returns
    ///
    /// - `Ok(Config)` - Successfully loaded and validated configuration
    /// - `Err(anyhow::Error)` - Missing file, parse failure or validation failure
    pub fn load_from_path(config_path: &str) -> anyhow::Result<Self> {
        if !std::path::Path::new(config_path).exists() {
            // Configuration file doesn't exist - user needs to copy template
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/bridge.template.toml config/bridge.toml\n\
                Then edit config/bridge.toml with your actual values.",
                config_path
            ));
        }

        let layered = config::Config::builder()
            .add_source(config::File::new(config_path, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("validation.whitelisted_tokens"),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to read configuration '{}': {}", config_path, e))?;

        let config: Config = layered
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to parse configuration '{}': {}", config_path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// This configuration is suitable for local development and testing.
    /// For production use, all placeholder values must be replaced with
    /// actual chain URLs, contract addresses and account identifiers.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            source_chain: SourceChainConfig {
                name: "Source Chain".to_string(),
                rpc_url: "http://127.0.0.1:8545".to_string(),
                contract_addr: "0x0000000000000000000000000000000000000001".to_string(),
                chain_id: 31337,
                decimals: default_source_decimals(),
                signing_key_env: None,
            },
            destination_chain: DestinationChainConfig {
                name: "Destination Chain".to_string(),
                rpc_url: "http://127.0.0.1:8000/soroban/rpc".to_string(),
                horizon_url: "http://127.0.0.1:8000".to_string(),
                network_passphrase: "Standalone Network ; February 2017".to_string(),
                contract_id: format!("C{}", "A".repeat(55)),
                source_account: format!("G{}", "A".repeat(55)),
                signing_secret_env: "BRIDGE_DESTINATION_SECRET".to_string(),
                decimals: default_destination_decimals(),
                cli_path: default_cli_path(),
                already_minted_error_code: None,
            },
            watcher: WatcherConfig {
                start_block: default_start_block(),
                confirmations: 12,
                polling_interval_ms: 5_000,
                max_batch_size: 100,
                verify_receipts: false,
            },
            minter: MinterConfig {
                retry_attempts: 3,
                retry_delay_ms: 10_000,
                confirmation_timeout_ms: 60_000,
                confirmation_poll_interval_ms: default_confirmation_poll_interval_ms(),
                idle_wait_ms: default_idle_wait_ms(),
                shutdown_drain_timeout_ms: default_shutdown_drain_timeout_ms(),
                settled_history_limit: default_settled_history_limit(),
            },
            validation: ValidationConfig {
                min_amount: 1_000_000_000_000_000,
                max_amount: 1_000_000_000_000_000_000_000,
                whitelist_enabled: false,
                whitelisted_tokens: Vec::new(),
            },
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Parses `start_block` into a [`StartBlock`].
    ///
    /// # Returns
    ///
    /// - `Ok(StartBlock)` - `latest` (case-insensitive) or an explicit height
    /// - `Err(anyhow::Error)` - Any other value
    pub fn start_block(&self) -> anyhow::Result<StartBlock> {
        let value = self.start_block.trim();
        if value.eq_ignore_ascii_case("latest") {
            return Ok(StartBlock::Latest);
        }
        value
            .parse::<u64>()
            .map(StartBlock::Height)
            .map_err(|_| {
                anyhow::anyhow!(
                    "Configuration error: watcher.start_block must be \"latest\" or a block height, got '{}'",
                    self.start_block
                )
            })
    }
}

impl DestinationChainConfig {
    /// Loads the destination signing secret from the environment variable.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The signing secret
    /// * `Err(anyhow::Error)` - The variable is not set
    pub fn get_signing_secret(&self) -> anyhow::Result<String> {
        std::env::var(&self.signing_secret_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the destination signing secret (S...).",
                self.signing_secret_env
            )
        })
    }
}

/// Validates a `0x`-prefixed hex address with expected byte length.
///
/// # Arguments
///
/// * `addr` - `0x`-prefixed hex string
/// * `expected_len` - Expected byte length
///
/// # Returns
///
/// - `Ok(())` - Address format matches expected length
/// - `Err(anyhow::Error)` - Address format is invalid
pub fn validate_hex_address(addr: &str, expected_len: usize) -> anyhow::Result<()> {
    let stripped = addr
        .strip_prefix("0x")
        .ok_or_else(|| anyhow::anyhow!("Address must be 0x-prefixed hex string"))?;
    let bytes = hex::decode(stripped).map_err(|_| anyhow::anyhow!("Invalid hex address"))?;
    if bytes.len() != expected_len {
        anyhow::bail!("Invalid address length: expected {} bytes", expected_len);
    }
    Ok(())
}

/// Validates an `http` or `https` endpoint URL.
fn validate_http_url(value: &str) -> anyhow::Result<()> {
    let parsed = url::Url::parse(value).map_err(|e| anyhow::anyhow!("'{}' is not a URL: {}", value, e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("'{}' must use http or https", value);
    }
    Ok(())
}

/// Checks the shape of a Stellar strkey: 56 base32 characters with the given version prefix.
fn is_valid_strkey(value: &str, prefix: char) -> bool {
    value.len() == 56
        && value.starts_with(prefix)
        && value
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c))
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// Serializes `u128` amounts as decimal strings.
///
/// TOML integers stop at `i64::MAX`, which is below the amounts an 18-decimal
/// asset reaches, so bounds are accepted either as integers or as strings.
mod serde_u128 {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(U128Visitor)
    }

    struct U128Visitor;

    impl<'de> Visitor<'de> for U128Visitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer or a decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v as u128)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
            u128::try_from(v).map_err(|_| E::custom(format!("amount must be non-negative, got {}", v)))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }

        // Environment overrides of very large integers arrive as floats; digit
        // separators (1_000_000) keep them as strings.
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<u128, E> {
            Err(E::custom(format!(
                "amount {} lost precision; write it with '_' separators",
                v
            )))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            v.trim()
                .replace('_', "")
                .parse::<u128>()
                .map_err(|_| E::custom(format!("invalid amount '{}'", v)))
        }
    }
}
