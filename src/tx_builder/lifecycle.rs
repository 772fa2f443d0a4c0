//! Transaction lifecycle
//!
//! A [`TxLifecycle`] drives one [`TxDraft`] through
//! `Unbuilt -> Built -> FeeCorrected -> Signed -> Submitted`:
//!
//! 1. build the body with a zero fee,
//! 2. estimate the fee from that body, take it out of the change output,
//!    check value conservation and rebuild,
//! 3. sign,
//! 4. submit.
//!
//! The fee is estimated once; the rebuilt body is not re-estimated.

use std::fmt;
use std::path::PathBuf;

use tracing::info;

use crate::errors::{Result, ToolkitError};
use crate::metrics::{metrics, Timer};
use crate::utxo::Utxo;
use crate::value::{verify_conservation, Balance, Quantity, TokenBundle};

use super::builder::{SigningKey, TxBuilder};
use super::fee::{FeeEstimator, FeeShape};
use super::options::BuildOptions;
use super::tx::Tx;

/// Destination of a draft output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub address: String,
    pub lovelace: Quantity,
    pub tokens: TokenBundle,
}

impl Output {
    pub fn new(address: impl Into<String>, lovelace: Quantity) -> Self {
        Self {
            address: address.into(),
            lovelace,
            tokens: TokenBundle::new(),
        }
    }

    pub fn with_tokens(mut self, tokens: TokenBundle) -> Self {
        self.tokens = tokens;
        self
    }
}

/// Tokens created by the transaction and the policy script allowing it
///
/// Quantities are unsigned, so a mint can only create tokens. Burning
/// (a negative `--mint` quantity) is not representable here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintSpec {
    pub tokens: TokenBundle,
    pub script_file: PathBuf,
}

impl MintSpec {
    /// `--mint` expression
    pub fn expression(&self) -> String {
        self.tokens.to_cli_fragments().join("+")
    }
}

/// Everything needed to build a transaction
///
/// Before fee correction the change output holds the pre-fee remainder.
#[derive(Debug, Clone)]
pub struct TxDraft {
    pub inputs: Vec<Utxo>,
    pub outputs: Vec<Output>,
    /// Index into `outputs` that absorbs the fee
    pub change_output: usize,
    pub mint: Option<MintSpec>,
    pub certificates: Vec<PathBuf>,
    /// Lovelace locked by certificates (stake address deposit)
    pub deposit: Quantity,
    pub witness_count: u32,
}

impl TxDraft {
    pub fn new(inputs: Vec<Utxo>, outputs: Vec<Output>) -> Self {
        Self {
            inputs,
            outputs,
            change_output: 0,
            mint: None,
            certificates: Vec::new(),
            deposit: Quantity::zero(),
            witness_count: 1,
        }
    }

    pub fn change_output(mut self, index: usize) -> Self {
        self.change_output = index;
        self
    }

    pub fn mint(mut self, mint: MintSpec) -> Self {
        self.mint = Some(mint);
        self
    }

    pub fn certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificates.push(path.into());
        self
    }

    pub fn deposit(mut self, deposit: Quantity) -> Self {
        self.deposit = deposit;
        self
    }

    pub fn witnesses(mut self, count: u32) -> Self {
        self.witness_count = count;
        self
    }

    fn shape(&self) -> FeeShape {
        FeeShape::new(self.inputs.len(), self.outputs.len(), self.witness_count)
    }

    fn input_balance(&self) -> Balance {
        let mut balance = Balance::default();
        for utxo in &self.inputs {
            balance.add(&utxo.value, &utxo.token_bundle());
        }
        balance
    }

    fn output_balance(&self) -> Balance {
        let mut balance = Balance::default();
        for output in &self.outputs {
            balance.add(&output.lovelace, &output.tokens);
        }
        balance
    }

    fn minted(&self) -> TokenBundle {
        self.mint
            .as_ref()
            .map(|m| m.tokens.clone())
            .unwrap_or_default()
    }

    /// Build options for the given fee
    pub fn to_options(&self, fee: &Quantity) -> Result<BuildOptions> {
        let mut builder = BuildOptions::builder().fee(fee.to_string());
        for utxo in &self.inputs {
            builder = builder.tx_in(utxo.tx_hash.clone(), utxo.index);
        }
        for output in &self.outputs {
            builder = builder.tx_out_bundle(output.address.clone(), output.lovelace.clone(), &output.tokens);
        }
        if let Some(mint) = &self.mint {
            builder = builder
                .mint(mint.expression())
                .mint_script_file(mint.script_file.clone());
        }
        for cert in &self.certificates {
            builder = builder.certificate(cert.clone());
        }
        builder.finalize()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unbuilt,
    Built,
    FeeCorrected,
    Signed,
    Submitted,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unbuilt => "unbuilt",
            LifecycleState::Built => "built",
            LifecycleState::FeeCorrected => "fee-corrected",
            LifecycleState::Signed => "signed",
            LifecycleState::Submitted => "submitted",
        };
        f.write_str(s)
    }
}

/// Drives one draft from build to submission
pub struct TxLifecycle {
    builder: TxBuilder,
    fees: FeeEstimator,
    draft: TxDraft,
    state: LifecycleState,
    fee: Quantity,
    body: Vec<u8>,
    signed: Vec<u8>,
}

impl TxLifecycle {
    pub fn new(builder: TxBuilder, fees: FeeEstimator, draft: TxDraft) -> Result<Self> {
        if draft.inputs.is_empty() {
            return Err(ToolkitError::validation("transaction has no inputs"));
        }
        if draft.change_output >= draft.outputs.len() {
            return Err(ToolkitError::validation(format!(
                "change output {} out of range ({} outputs)",
                draft.change_output,
                draft.outputs.len()
            )));
        }
        Ok(Self {
            builder,
            fees,
            draft,
            state: LifecycleState::Unbuilt,
            fee: Quantity::zero(),
            body: Vec::new(),
            signed: Vec::new(),
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn fee(&self) -> &Quantity {
        &self.fee
    }

    pub fn draft(&self) -> &TxDraft {
        &self.draft
    }

    /// Current body (fee 0 after `build`, final after `fee_correct`)
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn signed(&self) -> &[u8] {
        &self.signed
    }

    fn expect_state(&self, expected: LifecycleState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(ToolkitError::validation(format!(
                "cannot {} a transaction in state {}",
                action, self.state
            )));
        }
        Ok(())
    }

    /// Build with a zero fee
    pub async fn build(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Unbuilt, "build")?;
        let options = self.draft.to_options(&Quantity::zero())?;
        self.body = self.builder.build(&options).await?;
        self.state = LifecycleState::Built;
        Ok(())
    }

    /// Estimate the fee, deduct it from the change output and rebuild
    pub async fn fee_correct(&mut self) -> Result<()> {
        self.expect_state(LifecycleState::Built, "fee-correct")?;

        let fee = self
            .fees
            .min_fee_for_body(&self.body, self.draft.shape())
            .await?;

        // The draft keeps its pre-fee change until the rebuilt body exists
        let mut corrected = self.draft.clone();
        let change = &mut corrected.outputs[corrected.change_output];
        change.lovelace = change.lovelace.checked_sub(&fee).ok_or_else(|| {
            ToolkitError::insufficient_funds(
                format!("unable to cover fee from change output to {}", change.address),
                &change.lovelace,
                &fee,
            )
        })?;

        verify_conservation(
            &corrected.input_balance(),
            &corrected.output_balance(),
            &fee,
            &corrected.deposit,
            &corrected.minted(),
        )?;

        let options = corrected.to_options(&fee)?;
        self.body = self.builder.build(&options).await?;
        self.draft = corrected;
        self.fee = fee;
        self.state = LifecycleState::FeeCorrected;
        Ok(())
    }

    pub async fn sign(&mut self, keys: &[SigningKey]) -> Result<()> {
        self.expect_state(LifecycleState::FeeCorrected, "sign")?;
        self.signed = self.builder.sign(&self.body, keys).await?;
        self.state = LifecycleState::Signed;
        Ok(())
    }

    /// Submit and return the transaction id
    pub async fn submit(&mut self) -> Result<Tx> {
        self.expect_state(LifecycleState::Signed, "submit")?;
        let tx = Tx::from_envelope(&self.signed)?;
        self.builder.submit(&self.signed).await?;
        self.state = LifecycleState::Submitted;
        Ok(tx)
    }

    /// Run every remaining step
    pub async fn execute(mut self, keys: &[SigningKey]) -> Result<Tx> {
        let timer = Timer::new();
        self.build().await?;
        self.fee_correct().await?;
        self.sign(keys).await?;
        let tx = self.submit().await?;
        timer.observe_duration(&metrics().lifecycle_latency);
        info!(
            tx_id = %tx.id,
            fee = %self.fee,
            elapsed_ms = timer.elapsed_ms(),
            "transaction submitted"
        );
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{arg_after, arg_values, TestNode};
    use crate::value::Asset;

    fn q(n: u64) -> Quantity {
        Quantity::from(n)
    }

    fn lifecycle(node: &TestNode, draft: TxDraft) -> TxLifecycle {
        let cli = node.cli();
        TxLifecycle::new(TxBuilder::new(cli.clone()), FeeEstimator::new(cli), draft).unwrap()
    }

    fn transfer_draft() -> TxDraft {
        TxDraft::new(
            vec![Utxo::new("aa", 0, q(100_000_000_000))],
            vec![
                Output::new("addr_test1treasury", q(99_000_000_000)),
                Output::new("addr_test1target", q(1_000_000_000)),
            ],
        )
    }

    #[tokio::test]
    async fn test_execute_deducts_fee_from_change() {
        let node = TestNode::new();
        node.runner.respond("transaction calculate-min-fee", "171573 Lovelace");

        let tx = lifecycle(&node, transfer_draft())
            .execute(&[SigningKey::Treasury])
            .await
            .unwrap();

        let builds = node.runner.calls_for("transaction build-raw");
        assert_eq!(builds.len(), 2);
        assert_eq!(arg_after(&builds[0], "--fee").as_deref(), Some("0"));
        assert_eq!(arg_after(&builds[1], "--fee").as_deref(), Some("171573"));
        assert_eq!(
            arg_values(&builds[1], "--tx-out"),
            vec![
                "addr_test1treasury+98999828427".to_string(),
                "addr_test1target+1000000000".to_string()
            ]
        );

        assert_eq!(tx.id, node.runner.last_signed_tx_id().unwrap());
        assert_eq!(node.runner.count("transaction submit"), 1);
        assert_eq!(node.tmp_file_count(), 0);
    }

    #[tokio::test]
    async fn test_fee_larger_than_change_is_insufficient_funds() {
        let node = TestNode::new();
        node.runner.respond("transaction calculate-min-fee", "171573 Lovelace");

        let draft = TxDraft::new(
            vec![Utxo::new("aa", 0, q(1_100_000))],
            vec![
                Output::new("addr_test1treasury", q(100_000)),
                Output::new("addr_test1target", q(1_000_000)),
            ],
        );
        let err = lifecycle(&node, draft)
            .execute(&[SigningKey::Treasury])
            .await
            .unwrap_err();
        assert_eq!(err.category(), "funds");
        assert_eq!(node.runner.count("transaction sign"), 0);
    }

    #[tokio::test]
    async fn test_unbalanced_draft_is_rejected_before_signing() {
        let node = TestNode::new();
        let mut draft = transfer_draft();
        draft.outputs[1].lovelace = q(2_000_000_000);

        let err = lifecycle(&node, draft)
            .execute(&[SigningKey::Treasury])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("lovelace not conserved"));
        assert_eq!(node.runner.count("transaction sign"), 0);
    }

    #[tokio::test]
    async fn test_mint_and_deposit_balance() {
        let node = TestNode::new();
        node.runner.respond("transaction calculate-min-fee", "200000 Lovelace");

        let asset = Asset::new("policy", "coin");
        let mut minted = TokenBundle::new();
        minted.add(&asset, &q(100));

        let draft = TxDraft::new(
            vec![Utxo::new("aa", 0, q(10_000_000))],
            vec![Output::new("addr_test1w", q(8_000_000)).with_tokens(minted.clone())],
        )
        .mint(MintSpec {
            tokens: minted,
            script_file: PathBuf::from("/tmp/policy.script"),
        })
        .deposit(q(2_000_000))
        .certificate("/w/w-stake.reg.cert");

        let mut lc = lifecycle(&node, draft);
        lc.build().await.unwrap();
        lc.fee_correct().await.unwrap();
        assert_eq!(lc.state(), LifecycleState::FeeCorrected);
        assert_eq!(lc.draft().outputs[0].lovelace, q(7_800_000));

        let build = node.runner.last_call("transaction build-raw").unwrap();
        assert_eq!(arg_after(&build, "--tx-out").as_deref(), Some("addr_test1w+7800000+100 policy.coin"));
        assert!(build.contains(&"--mint=100 policy.coin".to_string()));
        assert!(build.contains(&"--mint-script-file=/tmp/policy.script".to_string()));
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_pre_fee_change() {
        let node = TestNode::new();
        node.runner.respond("transaction calculate-min-fee", "200000 Lovelace");

        let draft = TxDraft::new(
            vec![Utxo::new("aa", 0, q(10_000_000))],
            vec![
                Output::new("addr_test1_change", q(9_000_000)),
                Output::new("addr_test1_target", q(1_000_000)),
            ],
        );
        let mut lc = lifecycle(&node, draft);
        lc.build().await.unwrap();

        node.runner.fail_times("transaction build-raw", "node unreachable", 1);
        assert!(lc.fee_correct().await.is_err());
        assert_eq!(lc.state(), LifecycleState::Built);
        assert_eq!(lc.draft().outputs[0].lovelace, q(9_000_000));

        lc.fee_correct().await.unwrap();
        assert_eq!(lc.state(), LifecycleState::FeeCorrected);
        assert_eq!(lc.draft().outputs[0].lovelace, q(8_800_000));
        assert_eq!(lc.fee(), &q(200_000));
    }

    #[tokio::test]
    async fn test_steps_must_run_in_order() {
        let node = TestNode::new();
        let mut lc = lifecycle(&node, transfer_draft());

        assert!(lc.sign(&[SigningKey::Treasury]).await.is_err());
        assert!(lc.fee_correct().await.is_err());
        lc.build().await.unwrap();
        assert!(lc.build().await.is_err());
        assert!(lc.submit().await.is_err());
        assert_eq!(lc.state(), LifecycleState::Built);
    }

    #[test]
    fn test_draft_validation() {
        let node = TestNode::new();
        let cli = node.cli();
        let draft = TxDraft::new(vec![], vec![Output::new("a", q(1))]);
        assert!(
            TxLifecycle::new(TxBuilder::new(cli.clone()), FeeEstimator::new(cli.clone()), draft)
                .is_err()
        );

        let draft = transfer_draft().change_output(2);
        assert!(TxLifecycle::new(TxBuilder::new(cli.clone()), FeeEstimator::new(cli), draft).is_err());
    }
}
