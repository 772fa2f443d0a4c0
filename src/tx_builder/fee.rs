//! Minimum fee estimation
//!
//! Fees come from `transaction calculate-min-fee` against a protocol
//! parameter snapshot cached at `<data_dir>/protocol.parameters`. The snapshot
//! is fetched the first time it is missing and never refreshed afterwards.

use std::path::{Path, PathBuf};

use crate::cardano::CardanoCli;
use crate::errors::{Result, ToolkitError};
use crate::structured_logging::OperationLog;
use crate::value::Quantity;

/// Input, output and witness counts the fee depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeShape {
    pub tx_in: usize,
    pub tx_out: usize,
    pub witnesses: u32,
}

impl FeeShape {
    pub fn new(tx_in: usize, tx_out: usize, witnesses: u32) -> Self {
        Self {
            tx_in,
            tx_out,
            witnesses,
        }
    }
}

#[derive(Clone)]
pub struct FeeEstimator {
    cli: CardanoCli,
}

impl FeeEstimator {
    pub fn new(cli: CardanoCli) -> Self {
        Self { cli }
    }

    /// Path of the protocol parameter snapshot, fetching it when absent
    pub async fn protocol_parameters(&self) -> Result<PathBuf> {
        let filename = self.cli.settings().protocol_parameters_file();
        let exists = tokio::fs::try_exists(&filename).await.map_err(|e| {
            ToolkitError::io("unable to read protocol parameters", e)
        })?;
        if exists {
            return Ok(filename);
        }

        let log = OperationLog::start("fetched protocol parameters");
        let mut args = vec!["query".to_string(), "protocol-parameters".to_string()];
        args.extend(self.cli.network_args());
        args.push("--out-file".to_string());
        args.push(filename.display().to_string());

        let result = self
            .cli
            .exec(args)
            .await
            .map(|_| ())
            .map_err(|e| e.context("unable to read protocol parameters"));
        log.finish(&result);
        result.map(|_| filename)
    }

    /// Minimum fee for the body stored in `body_file`
    pub async fn min_fee(&self, body_file: &Path, shape: FeeShape) -> Result<Quantity> {
        let log = OperationLog::start("calculated min fee")
            .field("tx_in", shape.tx_in)
            .field("tx_out", shape.tx_out)
            .field("witnesses", shape.witnesses);
        let result = self.min_fee_inner(body_file, shape).await;
        let log = match &result {
            Ok(fee) => log.field("fee", fee),
            Err(_) => log,
        };
        log.finish(&result);
        result
    }

    async fn min_fee_inner(&self, body_file: &Path, shape: FeeShape) -> Result<Quantity> {
        let protocol = self
            .protocol_parameters()
            .await
            .map_err(|e| e.context("unable to calculate min fee"))?;

        let mut args = vec![
            "transaction".to_string(),
            "calculate-min-fee".to_string(),
            "--tx-body-file".to_string(),
            body_file.display().to_string(),
            "--tx-in-count".to_string(),
            shape.tx_in.to_string(),
            "--tx-out-count".to_string(),
            shape.tx_out.to_string(),
            "--witness-count".to_string(),
            shape.witnesses.to_string(),
        ];
        args.extend(self.cli.network_args());
        args.push("--protocol-params-file".to_string());
        args.push(protocol.display().to_string());

        let out = self
            .cli
            .exec(args)
            .await
            .map_err(|e| e.context("unable to calculate min fee"))?;
        parse_fee(&out)
    }

    /// Minimum fee for an in-memory body
    pub async fn min_fee_for_body(&self, body: &[u8], shape: FeeShape) -> Result<Quantity> {
        let file = self
            .cli
            .write_scratch("fee", body)
            .await
            .map_err(|e| e.context("unable to calculate min fee"))?;
        self.min_fee(file.path(), shape).await
    }

    /// Deposit charged for registering a stake address
    ///
    /// Reads `stakeAddressDeposit` (or the older `keyDeposit`) from the
    /// snapshot; zero when neither is present.
    pub async fn stake_address_deposit(&self) -> Result<Quantity> {
        let filename = self.protocol_parameters().await?;
        let data = tokio::fs::read(&filename).await.map_err(|e| {
            ToolkitError::io(
                format!("unable to read protocol parameters, {}", filename.display()),
                e,
            )
        })?;
        let params: serde_json::Value = serde_json::from_slice(&data).map_err(|e| {
            ToolkitError::parse(format!("invalid protocol parameters: {}", e))
        })?;

        let deposit = params
            .get("stakeAddressDeposit")
            .or_else(|| params.get("keyDeposit"));
        match deposit {
            None | Some(serde_json::Value::Null) => Ok(Quantity::zero()),
            Some(serde_json::Value::Number(n)) => Quantity::parse(&n.to_string()),
            Some(serde_json::Value::String(s)) => Quantity::parse(s),
            Some(other) => Err(ToolkitError::parse(format!(
                "invalid stake address deposit, {}",
                other
            ))),
        }
    }
}

/// `"<n> Lovelace"`: the first whitespace-separated token is the fee
fn parse_fee(out: &str) -> Result<Quantity> {
    let first = out.split_whitespace().next().unwrap_or_default();
    Quantity::parse(first).map_err(|_| {
        ToolkitError::parse(format!("unexpected min fee reply, {:?}", out.trim()))
    })
}
