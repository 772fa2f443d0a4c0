//! Node facade
//!
//! [`CardanoCli`] owns the resolved settings and the command runner, and
//! exposes the node queries (tip, UTXOs, version) plus the small helpers the
//! builder and orchestrator need: address normalization, key hashes, policy
//! ids and per-operation scratch files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::debug;

use crate::config::NodeSettings;
use crate::errors::{Result, ToolkitError};
use crate::invoker::{CommandRunner, ProcessRunner};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::OperationLog;
use crate::utxo::{UtxoFilter, Utxos};

static RE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid regex"));
static RE_GIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(git.*)").expect("valid regex"));
static RE_REVISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(.*ghc\S+)").expect("valid regex"));

/// Chain tip as reported by `query tip`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tip {
    #[serde(default)]
    pub block: u64,
    #[serde(default)]
    pub epoch: u64,
    #[serde(default)]
    pub era: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub slot: u64,
}

/// Build information of the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub git: String,
    pub revision: String,
}

impl Version {
    pub fn parse(text: &str) -> Self {
        Self {
            git: RE_GIT
                .captures(text)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_default(),
            revision: RE_REVISION
                .captures(text)
                .map(|c| c[1].trim().to_string())
                .unwrap_or_default(),
        }
    }
}

/// A file under `<data_dir>/tmp` that is removed when dropped
///
/// In debug mode the file is kept on disk for inspection.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    _guard: Option<TempPath>,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            ToolkitError::io(format!("unable to read file, {}", self.path.display()), e)
        })
    }
}

/// Handle to the ledger CLI and the data directory
#[derive(Clone)]
pub struct CardanoCli {
    runner: Arc<dyn CommandRunner>,
    settings: Arc<NodeSettings>,
}

impl CardanoCli {
    /// Facade backed by the real CLI process
    pub fn new(settings: NodeSettings) -> Self {
        let runner = ProcessRunner::new(settings.cli.clone(), settings.data_dir.clone())
            .with_socket_path(settings.socket_path.clone())
            .with_debug(settings.debug);
        Self::with_runner(settings, Arc::new(runner))
    }

    pub fn with_runner(settings: NodeSettings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn treasury_addr(&self) -> &str {
        &self.settings.treasury_addr
    }

    pub fn network_args(&self) -> Vec<String> {
        self.settings.network.args()
    }

    /// `<data_dir>/wallets/<name><suffix>`
    pub fn wallet_path(&self, name: &str, suffix: &str) -> PathBuf {
        self.settings
            .wallets_dir()
            .join(format!("{}{}", name, suffix))
    }

    /// Run one CLI command, recording metrics
    pub async fn exec(&self, args: Vec<String>) -> Result<String> {
        let label = args.iter().take(2).cloned().collect::<Vec<_>>().join(" ");
        let timer = Timer::new();
        metrics().cli_invocations.with_label_values(&[label.as_str()]).inc();

        let result = self.runner.run(&args).await;

        timer.observe_duration(&metrics().cli_latency);
        match &result {
            Ok(_) => debug!(command = %label, elapsed_ms = timer.elapsed_ms(), "cli ok"),
            Err(e) => {
                metrics()
                    .cli_failures
                    .with_label_values(&[e.category()])
                    .inc();
                debug!(command = %label, error = %e, "cli failed");
            }
        }
        result
    }

    /// Reserve a fresh, uniquely named file in `<data_dir>/tmp`
    pub fn scratch_file(&self, prefix: &str) -> Result<ScratchFile> {
        let tmp = self.settings.tmp_dir();
        let file = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(&tmp)
            .map_err(|e| {
                ToolkitError::io(format!("unable to create scratch file in {}", tmp.display()), e)
            })?;
        let temp_path = file.into_temp_path();

        if self.settings.debug {
            let path = temp_path.keep().map_err(|e| {
                ToolkitError::io("unable to retain scratch file", e.error)
            })?;
            return Ok(ScratchFile { path, _guard: None });
        }

        Ok(ScratchFile {
            path: temp_path.to_path_buf(),
            _guard: Some(temp_path),
        })
    }

    /// Scratch file pre-filled with `contents`
    pub async fn write_scratch(&self, prefix: &str, contents: &[u8]) -> Result<ScratchFile> {
        let file = self.scratch_file(prefix)?;
        tokio::fs::write(file.path(), contents).await.map_err(|e| {
            ToolkitError::io(format!("unable to write file, {}", file.path().display()), e)
        })?;
        Ok(file)
    }

    /// Resolve a wallet name to its address, passing real addresses through
    ///
    /// Only plain alphanumeric names are looked up in `<data_dir>/wallets`.
    pub async fn normalize_address(&self, address: &str) -> Result<String> {
        if !RE_ID.is_match(address) {
            return Ok(address.to_string());
        }

        let filename = self.wallet_path(address, ".addr");
        let data = tokio::fs::read_to_string(&filename).await.map_err(|e| {
            ToolkitError::io(format!("unable to read wallet, {}", filename.display()), e)
        })?;
        Ok(data.trim().to_string())
    }

    pub async fn query_tip(&self) -> Result<Tip> {
        let mut args = vec!["query".to_string(), "tip".to_string()];
        args.extend(self.network_args());

        let out = self
            .exec(args)
            .await
            .map_err(|e| e.context("query tip failed"))?;
        serde_json::from_str(&out)
            .map_err(|e| ToolkitError::parse(format!("query tip failed: {}", e)))
    }

    /// Query the UTXOs at `address` (a wallet name or an address), or the
    /// whole UTxO set when `None`, keeping those that satisfy every filter
    pub async fn utxos(&self, address: Option<&str>, filters: &[UtxoFilter]) -> Result<Utxos> {
        let mut args = vec!["query".to_string(), "utxo".to_string()];
        args.extend(self.network_args());
        match address {
            Some(address) if !address.is_empty() => {
                let address = self.normalize_address(address).await?;
                args.push("--address".to_string());
                args.push(address);
            }
            _ => args.push("--whole-utxo".to_string()),
        }

        let out = self
            .exec(args)
            .await
            .map_err(|e| e.context("query utxo failed"))?;
        Ok(Utxos::parse(&out).filter(filters))
    }

    pub async fn version(&self) -> Result<Version> {
        let out = self
            .exec(vec!["version".to_string()])
            .await
            .map_err(|e| e.context("query version failed"))?;
        Ok(Version::parse(&out))
    }

    /// Payment key hash of a wallet
    pub async fn key_hash(&self, wallet: &str) -> Result<String> {
        let log = OperationLog::start("generated key hash").field("wallet", wallet);
        let filename = self.wallet_path(wallet, ".vkey");
        let args = vec![
            "address".to_string(),
            "key-hash".to_string(),
            "--payment-verification-key-file".to_string(),
            filename.display().to_string(),
        ];

        let result = self.exec(args).await.map(|out| out.trim().to_string()).map_err(|e| {
            e.context(format!("failed to generate key hash for wallet, {}", wallet))
        });
        log.finish(&result);
        result
    }

    /// Policy id of a native script file
    pub async fn policy_id(&self, script_file: &Path) -> Result<String> {
        let log = OperationLog::start("generated policy id")
            .field("script", script_file.display());
        let args = vec![
            "transaction".to_string(),
            "policyid".to_string(),
            "--script-file".to_string(),
            script_file.display().to_string(),
        ];

        let result = self
            .exec(args)
            .await
            .map(|out| out.trim().to_string())
            .map_err(|e| e.context("failed to generate policy id"));
        log.finish(&result);
        result
    }
}
