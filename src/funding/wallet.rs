//! Wallet files under `<data_dir>/wallets`
//!
//! A wallet named `w` is the set of files
//!
//! | file | contents |
//! |---|---|
//! | `w.vkey`, `w.skey` | payment key pair |
//! | `w-stake.vkey`, `w-stake.skey` | stake key pair |
//! | `w.addr` | payment address (with stake part) |
//! | `w-stake.addr` | stake address |
//! | `w-stake.reg.cert` | stake registration certificate |
//! | `w-stake.delegate.cert` | delegation certificate, when a pool is configured |
//!
//! Key material is produced by the CLI; this module only decides file names.

use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::cardano::CardanoCli;
use crate::errors::{Result, ToolkitError};
use crate::metrics::metrics;

static RE_WALLET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9.\-_ ']*$").expect("valid regex"));

/// Reject names that could escape the wallet directory
pub fn validate_wallet_name(name: &str) -> Result<()> {
    if !RE_WALLET_NAME.is_match(name) || name == "." || name == ".." {
        return Err(ToolkitError::validation(format!(
            "invalid wallet name, {:?}: must match ^[a-zA-Z0-9.\\-_ ']*$",
            name
        )));
    }
    Ok(())
}

/// Generated wallet name used when the caller gives none
pub fn generate_wallet_name() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Creates wallet key material through the CLI
#[derive(Clone)]
pub struct WalletStore {
    cli: CardanoCli,
}

impl WalletStore {
    pub fn new(cli: CardanoCli) -> Self {
        Self { cli }
    }

    pub fn path(&self, name: &str, suffix: &str) -> PathBuf {
        self.cli.wallet_path(name, suffix)
    }

    pub fn registration_cert(&self, name: &str) -> PathBuf {
        self.path(name, "-stake.reg.cert")
    }

    pub fn delegation_cert(&self, name: &str) -> PathBuf {
        self.path(name, "-stake.delegate.cert")
    }

    /// Payment address recorded in `<name>.addr`
    pub async fn address(&self, name: &str) -> Result<String> {
        let filename = self.path(name, ".addr");
        let data = tokio::fs::read_to_string(&filename).await.map_err(|e| {
            ToolkitError::io(format!("unable to read wallet, {}", filename.display()), e)
        })?;
        Ok(data.trim().to_string())
    }

    pub async fn exists(&self, name: &str) -> Result<bool> {
        tokio::fs::try_exists(self.path(name, ".skey"))
            .await
            .map_err(|e| ToolkitError::io(format!("unable to check wallet, {}", name), e))
    }

    /// Generate keys, addresses and certificates for a new wallet
    ///
    /// Returns the wallet name (generated when `name` is empty).
    pub async fn create(&self, name: &str) -> Result<String> {
        validate_wallet_name(name)?;
        let name = if name.is_empty() {
            generate_wallet_name()
        } else {
            name.to_string()
        };

        let dir = self.cli.settings().wallets_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ToolkitError::io(format!("unable to create directory, {}", dir.display()), e)
        })?;

        if self.exists(&name).await? {
            return Err(ToolkitError::validation(format!(
                "unable to create wallet, {}: wallet already exists",
                name
            )));
        }

        let p = |suffix: &str| self.path(&name, suffix).display().to_string();
        let network = self.cli.network_args();

        self.step(
            "failed to create payment address keys",
            vec![
                "address", "key-gen",
                "--verification-key-file", &p(".vkey"),
                "--signing-key-file", &p(".skey"),
            ],
            &[],
        )
        .await?;

        self.step(
            "failed to create stake address keys",
            vec![
                "stake-address", "key-gen",
                "--verification-key-file", &p("-stake.vkey"),
                "--signing-key-file", &p("-stake.skey"),
            ],
            &[],
        )
        .await?;

        self.step(
            "failed to create payment address",
            vec![
                "address", "build",
                "--payment-verification-key-file", &p(".vkey"),
                "--stake-verification-key-file", &p("-stake.vkey"),
                "--out-file", &p(".addr"),
            ],
            &network,
        )
        .await?;

        self.step(
            "failed to create stake address",
            vec![
                "stake-address", "build",
                "--stake-verification-key-file", &p("-stake.vkey"),
                "--out-file", &p("-stake.addr"),
            ],
            &network,
        )
        .await?;

        self.step(
            "failed to create stake address registration cert",
            vec![
                "stake-address", "registration-certificate",
                "--stake-verification-key-file", &p("-stake.vkey"),
                "--out-file", &p("-stake.reg.cert"),
            ],
            &[],
        )
        .await?;

        if let Some(cold_vkey) = &self.cli.settings().pool_cold_vkey_file {
            let cold_vkey = cold_vkey.display().to_string();
            self.step(
                "failed to create stake address delegation cert",
                vec![
                    "stake-address", "delegation-certificate",
                    "--stake-verification-key-file", &p("-stake.vkey"),
                    "--cold-verification-key-file", &cold_vkey,
                    "--out-file", &p("-stake.delegate.cert"),
                ],
                &[],
            )
            .await?;
        }

        metrics().wallets_created.inc();
        Ok(name)
    }

    async fn step(&self, what: &str, args: Vec<&str>, network: &[String]) -> Result<()> {
        let mut args: Vec<String> = args.into_iter().map(str::to_string).collect();
        args.extend(network.iter().cloned());
        self.cli
            .exec(args)
            .await
            .map(|_| ())
            .map_err(|e| e.context(format!("failed to create wallet: {}", what)))
    }
}
