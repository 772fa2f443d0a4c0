//! Build, sign and submit through the CLI
//!
//! Each call works on its own scratch files under `<data_dir>/tmp`. Bodies and
//! signed transactions move between steps as in-memory envelope bytes.

use std::path::PathBuf;

use tracing::debug;

use crate::cardano::CardanoCli;
use crate::errors::{Result, ToolkitError};
use crate::metrics::metrics;
use crate::structured_logging::OperationLog;

use super::options::BuildOptions;

/// Key used to witness a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningKey {
    /// The configured treasury signing key
    Treasury,
    /// `<data_dir>/wallets/<name>.skey`
    Wallet(String),
}

impl SigningKey {
    /// An empty wallet name selects the treasury key
    pub fn from_wallet_name(name: &str) -> Self {
        if name.is_empty() {
            SigningKey::Treasury
        } else {
            SigningKey::Wallet(name.to_string())
        }
    }

    /// Payment key of `wallet`
    pub fn payment(wallet: &str) -> Self {
        Self::from_wallet_name(wallet)
    }

    /// Stake key of `wallet`
    pub fn stake(wallet: &str) -> Self {
        SigningKey::Wallet(format!("{}-stake", wallet))
    }

    fn file(&self, cli: &CardanoCli) -> PathBuf {
        match self {
            SigningKey::Treasury => cli.settings().treasury_signing_key_file.clone(),
            SigningKey::Wallet(name) => cli.wallet_path(name, ".skey"),
        }
    }
}

/// Thin wrapper over `transaction build-raw | sign | submit`
#[derive(Clone)]
pub struct TxBuilder {
    cli: CardanoCli,
}

impl TxBuilder {
    pub fn new(cli: CardanoCli) -> Self {
        Self { cli }
    }

    pub fn cli(&self) -> &CardanoCli {
        &self.cli
    }

    /// Build a raw body and return its envelope bytes
    pub async fn build(&self, options: &BuildOptions) -> Result<Vec<u8>> {
        let mut addresses = Vec::with_capacity(options.tx_out.len());
        for output in &options.tx_out {
            let address = self
                .cli
                .normalize_address(&output.address)
                .await
                .map_err(|e| e.context("failed to build tx"))?;
            addresses.push(address);
        }

        let out_file = self.cli.scratch_file("body")?;
        let args = options.to_args(&self.cli.settings().era, out_file.path(), &addresses);
        debug!(args = %args.join(" "), "build-raw");

        self.cli
            .exec(args)
            .await
            .map_err(|e| e.context("failed to build transaction"))?;

        let data = out_file
            .read()
            .await
            .map_err(|e| e.context("failed to build transaction"))?;
        metrics().tx_built.inc();
        Ok(data)
    }

    /// Witness `body` with every key, in order
    pub async fn sign(&self, body: &[u8], keys: &[SigningKey]) -> Result<Vec<u8>> {
        let log = OperationLog::start("signed tx").field("keys", keys.len());
        let result = self.sign_inner(body, keys).await;
        log.finish(&result);
        result
    }

    async fn sign_inner(&self, body: &[u8], keys: &[SigningKey]) -> Result<Vec<u8>> {
        if keys.is_empty() {
            return Err(ToolkitError::validation("failed to sign tx: no signing keys"));
        }

        let body_file = self
            .cli
            .write_scratch("body", body)
            .await
            .map_err(|e| e.context("failed to sign tx"))?;
        let out_file = self.cli.scratch_file("signed")?;

        let mut args = vec![
            "transaction".to_string(),
            "sign".to_string(),
            "--tx-body-file".to_string(),
            body_file.path().display().to_string(),
            "--out-file".to_string(),
            out_file.path().display().to_string(),
        ];
        for key in keys {
            args.push("--signing-key-file".to_string());
            args.push(key.file(&self.cli).display().to_string());
        }

        self.cli
            .exec(args)
            .await
            .map_err(|e| e.context("failed to sign transaction"))?;
        out_file
            .read()
            .await
            .map_err(|e| e.context("failed to sign transaction"))
    }

    /// Hand a signed transaction to the node
    pub async fn submit(&self, signed: &[u8]) -> Result<()> {
        let log = OperationLog::start("submitted tx");
        let result = self.submit_inner(signed).await;
        log.finish(&result);
        result
    }

    async fn submit_inner(&self, signed: &[u8]) -> Result<()> {
        let tx_file = self
            .cli
            .write_scratch("signed", signed)
            .await
            .map_err(|e| e.context("failed to submit tx"))?;

        let mut args = vec!["transaction".to_string(), "submit".to_string()];
        args.extend(self.cli.network_args());
        args.push("--tx-file".to_string());
        args.push(tx_file.path().display().to_string());

        self.cli
            .exec(args)
            .await
            .map_err(|e| e.context("failed to submit tx"))?;
        metrics().tx_submitted.inc();
        Ok(())
    }
}
