//! Configuration for the toolkit
//!
//! Settings are loaded from a TOML file (with `.env` support), then
//! overridden from the command line / environment by the binary. The result
//! is resolved once into an immutable [`NodeSettings`] value that every node
//! operation receives at construction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ToolkitError};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Node and CLI access
    #[serde(default)]
    pub node: NodeConfig,

    /// Treasury wallet used for funding
    #[serde(default)]
    pub treasury: TreasuryConfig,

    /// Stake pool used for delegation certificates
    #[serde(default)]
    pub pool: PoolConfig,

    /// Funding and retry knobs
    #[serde(default)]
    pub funding: FundingConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// Keep scratch files and mirror CLI output
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base command vector, e.g. `["cardano-cli"]` or `["ssh", "node", "cardano-cli"]`
    #[serde(default = "default_cli")]
    pub cli: Vec<String>,

    /// Working directory for wallets, scratch files and cached parameters
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Path exported as `CARDANO_NODE_SOCKET_PATH`
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Testnet magic; mainnet when absent
    #[serde(default)]
    pub testnet_magic: Option<u32>,

    /// Era flag passed to `build-raw` (`--<era>-era`)
    #[serde(default = "default_era")]
    pub era: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Treasury address; read from `addr_file` when empty
    #[serde(default)]
    pub addr: String,

    #[serde(default)]
    pub addr_file: Option<PathBuf>,

    #[serde(default)]
    pub signing_key_file: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Cold verification key of the pool wallets delegate to
    #[serde(default)]
    pub cold_vkey_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Total attempts for a funding transfer hit by the transient ledger race
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait after failed attempt `n` is `n * backoff_step_secs`
    #[serde(default = "default_backoff_step")]
    pub backoff_step_secs: u64,

    /// Delay between funding a wallet and re-querying it before a mint
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Lovelace sent to a wallet before stake registration
    #[serde(default = "default_stake_funding")]
    pub stake_funding_lovelace: u64,

    /// Smallest wallet UTXO usable for a delegation transaction
    #[serde(default = "default_delegation_min")]
    pub delegation_min_lovelace: u64,

    /// Lovelace sent to a wallet with too few plain UTXOs to mint from
    #[serde(default = "default_mint_funding")]
    pub mint_funding_lovelace: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default)]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,
}

// Default value functions
fn default_cli() -> Vec<String> { vec!["cardano-cli".to_string()] }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_era() -> String { "alonzo".to_string() }
fn default_max_attempts() -> u32 { 5 }
fn default_backoff_step() -> u64 { 2 }
fn default_settle_delay() -> u64 { 5 }
fn default_stake_funding() -> u64 { 10_000_000_000 }
fn default_delegation_min() -> u64 { 2_000_000 }
fn default_mint_funding() -> u64 { 10_000_000 }
fn default_metrics_port() -> u16 { 9090 }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cli: default_cli(),
            data_dir: default_data_dir(),
            socket_path: None,
            testnet_magic: None,
            era: default_era(),
        }
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_secs: default_backoff_step(),
            settle_delay_secs: default_settle_delay(),
            stake_funding_lovelace: default_stake_funding(),
            delegation_min_lovelace: default_delegation_min(),
            mint_funding_lovelace: default_mint_funding(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: default_metrics_port(),
            json_logs: false,
        }
    }
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            treasury: TreasuryConfig::default(),
            pool: PoolConfig::default(),
            funding: FundingConfig::default(),
            monitoring: MonitoringConfig::default(),
            debug: false,
        }
    }
}

impl ToolkitConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ToolkitError::io(format!("unable to read config, {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| {
            ToolkitError::parse(format!("invalid config, {}: {}", path.display(), e))
        })
    }

    /// Load configuration after applying `.env`
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_file(path)
    }
}

impl FundingConfig {
    pub fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }
}

/// Network selector appended to node-facing commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet(u32),
}

impl Network {
    pub fn from_magic(magic: Option<u32>) -> Self {
        magic.map(Network::Testnet).unwrap_or(Network::Mainnet)
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            Network::Mainnet => vec!["--mainnet".to_string()],
            Network::Testnet(magic) => vec!["--testnet-magic".to_string(), magic.to_string()],
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet(magic) => write!(f, "testnet({})", magic),
        }
    }
}

/// Resolved, immutable settings shared by every node operation
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub cli: Vec<String>,
    pub data_dir: PathBuf,
    pub socket_path: Option<PathBuf>,
    pub network: Network,
    pub era: String,
    pub treasury_addr: String,
    pub treasury_signing_key_file: PathBuf,
    pub pool_cold_vkey_file: Option<PathBuf>,
    pub debug: bool,
}

impl NodeSettings {
    /// Resolve the treasury address and prepare `<data_dir>/tmp`
    pub fn resolve(config: &ToolkitConfig) -> Result<Self> {
        if config.node.cli.is_empty() {
            return Err(ToolkitError::validation("cli command must not be empty"));
        }

        let tmp = config.node.data_dir.join("tmp");
        std::fs::create_dir_all(&tmp).map_err(|e| {
            ToolkitError::io(format!("unable to create directory, {}", tmp.display()), e)
        })?;
        // The CLI runs with the data dir as cwd, so paths handed to it must be absolute
        let data_dir = std::fs::canonicalize(&config.node.data_dir).map_err(|e| {
            ToolkitError::io(
                format!("unable to resolve data dir, {}", config.node.data_dir.display()),
                e,
            )
        })?;

        let mut treasury_addr = config.treasury.addr.trim().to_string();
        if treasury_addr.is_empty() {
            if let Some(file) = &config.treasury.addr_file {
                let content = std::fs::read_to_string(file).map_err(|e| {
                    ToolkitError::io(
                        format!("unable to read treasury addr file, {}", file.display()),
                        e,
                    )
                })?;
                treasury_addr = content.trim().to_string();
            }
        }
        if treasury_addr.is_empty() {
            return Err(ToolkitError::validation(
                "treasury address is empty, set treasury.addr or treasury.addr_file",
            ));
        }

        Ok(Self {
            cli: config.node.cli.clone(),
            data_dir,
            socket_path: config.node.socket_path.clone(),
            network: Network::from_magic(config.node.testnet_magic),
            era: config.node.era.clone(),
            treasury_addr,
            treasury_signing_key_file: config.treasury.signing_key_file.clone(),
            pool_cold_vkey_file: config.pool.cold_vkey_file.clone(),
            debug: config.debug,
        })
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    pub fn wallets_dir(&self) -> PathBuf {
        self.data_dir.join("wallets")
    }

    pub fn protocol_parameters_file(&self) -> PathBuf {
        self.data_dir.join("protocol.parameters")
    }
}
