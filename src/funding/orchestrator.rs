//! Funding and staking flows
//!
//! The [`Orchestrator`] composes the node facade, the transaction lifecycle and
//! the wallet store into the user-facing operations:
//!
//! - **fund_wallet**: treasury to address transfer, retried on the funding race
//! - **register_stake** / **delegate**: stake certificate transactions
//! - **mint**: single-signature policy mint into the wallet
//! - **create_wallet**: keys, addresses, certificates, funding and staking
//! - **send_funds**: sweep named UTXOs into one output
//!
//! Every operation runs inside an `operation` span carrying a fresh
//! correlation id, so the per-command events it triggers can be grouped.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::cardano::CardanoCli;
use crate::config::FundingConfig;
use crate::errors::{Result, ToolkitError};
use crate::observability::operation_span;
use crate::structured_logging::OperationLog;
use crate::tx_builder::{
    FeeEstimator, MintSpec, Output, SigningKey, Tx, TxBuilder, TxDraft, TxIn, TxLifecycle,
};
use crate::utxo::{at_least, exclude_scripts, exclude_tokens, Utxo};
use crate::value::{Asset, Quantity, TokenBundle};

use super::retry::{cancellable_sleep, retry_transient, RetryPolicy};
use super::wallet::WalletStore;

/// Quantities beyond this many digits exceed the total supply
const MAX_QUANTITY_DIGITS: usize = 13;

/// Treasury UTXOs at or below this many digits are not used as a source
const MIN_SOURCE_DIGITS: usize = 10;

static RE_ASSET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]{1,32}$").expect("valid regex"));

/// Staking state a new wallet is brought to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelegationLevel {
    #[default]
    None,
    Registered,
    Delegated,
}

/// Outcome of [`Orchestrator::create_wallet`]
#[derive(Debug, Clone, Serialize)]
pub struct WalletReceipt {
    pub name: String,
    pub address: String,
    pub funding: Option<Tx>,
    pub registration: Option<Tx>,
    pub delegation: Option<Tx>,
}

/// Outcome of [`Orchestrator::mint`]
#[derive(Debug, Clone, Serialize)]
pub struct MintReceipt {
    pub tx: Tx,
    pub policy_id: String,
    pub asset: String,
    pub quantity: Quantity,
}

/// Validate a lovelace quantity
///
/// Returns `None` for an all-zero quantity, which callers treat as nothing to do.
pub fn validate_quantity(quantity: &str) -> Result<Option<Quantity>> {
    if quantity.is_empty() {
        return Err(ToolkitError::validation("invalid quantity: empty"));
    }
    if !quantity.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ToolkitError::validation(format!(
            "invalid quantity, {}: digits only",
            quantity
        )));
    }
    if quantity.len() > MAX_QUANTITY_DIGITS {
        return Err(ToolkitError::validation(format!(
            "invalid quantity, {}: more than {} digits",
            quantity, MAX_QUANTITY_DIGITS
        )));
    }
    let q = Quantity::parse(quantity)?;
    Ok(if q.is_zero() { None } else { Some(q) })
}

/// Runs the funding and staking flows against one node
#[derive(Clone)]
pub struct Orchestrator {
    cli: CardanoCli,
    builder: TxBuilder,
    fees: FeeEstimator,
    wallets: WalletStore,
    policy: RetryPolicy,
    funding: FundingConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(cli: CardanoCli, funding: FundingConfig, cancel: CancellationToken) -> Self {
        Self {
            builder: TxBuilder::new(cli.clone()),
            fees: FeeEstimator::new(cli.clone()),
            wallets: WalletStore::new(cli.clone()),
            policy: RetryPolicy::from_config(&funding),
            funding,
            cancel,
            cli,
        }
    }

    pub fn cli(&self) -> &CardanoCli {
        &self.cli
    }

    pub fn wallets(&self) -> &WalletStore {
        &self.wallets
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn lifecycle(&self, draft: TxDraft) -> Result<TxLifecycle> {
        TxLifecycle::new(self.builder.clone(), self.fees.clone(), draft)
    }

    /// Transfer `quantity` lovelace from the treasury to `address`
    ///
    /// `address` may be a wallet name. Returns `None` when `quantity` is zero.
    pub async fn fund_wallet(&self, address: &str, quantity: &str) -> Result<Option<Tx>> {
        let (span, _id) = operation_span("fund_wallet");
        async {
            let log = OperationLog::start("funded wallet")
                .field("address", address)
                .field("quantity", quantity);
            let result = self.fund_wallet_inner(address, quantity).await;
            let log = match &result {
                Ok(Some(tx)) => log.field("tx", tx),
                _ => log,
            };
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn fund_wallet_inner(&self, address: &str, quantity: &str) -> Result<Option<Tx>> {
        let quantity = validate_quantity(quantity)?;
        let address = self
            .cli
            .normalize_address(address)
            .await
            .map_err(|e| e.context("failed to fund wallet"))?;
        if address == self.cli.treasury_addr() {
            return Err(ToolkitError::validation(format!(
                "unable to fund treasury address, {}",
                address
            )));
        }
        let quantity = match quantity {
            Some(q) => q,
            None => return Ok(None),
        };

        let tx = retry_transient("fund_wallet", &self.policy, &self.cancel, || {
            self.transfer_funds(&address, &quantity)
        })
        .await?;
        Ok(Some(tx))
    }

    /// First plain treasury UTXO whose lovelace value has more than ten digits
    pub async fn select_source(&self) -> Result<Utxo> {
        let treasury = self.cli.treasury_addr().to_string();
        if treasury.is_empty() {
            return Err(ToolkitError::validation(
                "treasury address is not configured, refusing to select from the whole utxo set",
            ));
        }
        let utxos = self
            .cli
            .utxos(Some(&treasury), &[exclude_scripts(), exclude_tokens()])
            .await
            .map_err(|e| e.context("unable to select treasury utxo"))?;

        let available: Quantity = utxos.iter().map(|u| &u.value).sum();
        utxos
            .into_iter()
            .find(|u| u.value.digits() > MIN_SOURCE_DIGITS)
            .ok_or_else(|| {
                ToolkitError::insufficient_funds(
                    format!("no treasury utxo above {} digits at {}", MIN_SOURCE_DIGITS, treasury),
                    available,
                    format!("{} digits", MIN_SOURCE_DIGITS + 1),
                )
            })
    }

    /// One funding attempt: select a source, build, fee-correct, sign, submit
    async fn transfer_funds(&self, address: &str, quantity: &Quantity) -> Result<Tx> {
        let source = self.select_source().await?;
        let change = source.value.checked_sub(quantity).ok_or_else(|| {
            ToolkitError::insufficient_funds(
                format!("unable to fund {} from {}", address, source.tx_in()),
                &source.value,
                quantity,
            )
        })?;

        let draft = TxDraft::new(
            vec![source],
            vec![
                Output::new(self.cli.treasury_addr(), change),
                Output::new(address, quantity.clone()),
            ],
        )
        .change_output(0)
        .witnesses(1);

        self.lifecycle(draft)?
            .execute(&[SigningKey::Treasury])
            .await
            .map_err(|e| e.context("failed to transfer funds"))
    }

    /// Fund `wallet` and register its stake address
    pub async fn register_stake(&self, wallet: &str) -> Result<Tx> {
        let (span, _id) = operation_span("register_stake");
        async {
            let log = OperationLog::start("registered stake address").field("wallet", wallet);
            let result = self.register_stake_inner(wallet).await;
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn register_stake_inner(&self, wallet: &str) -> Result<Tx> {
        let cert = self.wallets.registration_cert(wallet);
        if !self.exists(&cert).await? {
            return Err(ToolkitError::validation(format!(
                "unable to register stake for wallet, {}: missing {}",
                wallet,
                cert.display()
            )));
        }
        let address = self.wallets.address(wallet).await?;

        let amount = Quantity::from(self.funding.stake_funding_lovelace);
        let funding = self
            .fund_wallet(&address, &amount.to_string())
            .await?
            .ok_or_else(|| ToolkitError::validation("stake funding amount is zero"))?;

        let deposit = self.fees.stake_address_deposit().await?;
        let remaining = amount.checked_sub(&deposit).ok_or_else(|| {
            ToolkitError::insufficient_funds(
                format!("unable to cover stake deposit for wallet, {}", wallet),
                &amount,
                &deposit,
            )
        })?;

        let draft = TxDraft::new(
            vec![Utxo::new(funding.id, 1, amount)],
            vec![Output::new(address, remaining)],
        )
        .certificate(cert)
        .deposit(deposit)
        .witnesses(2);

        self.lifecycle(draft)?
            .execute(&[SigningKey::payment(wallet), SigningKey::stake(wallet)])
            .await
            .map_err(|e| e.context(format!("failed to register stake for wallet, {}", wallet)))
    }

    /// Delegate `wallet`'s stake to the configured pool
    pub async fn delegate(&self, wallet: &str) -> Result<Tx> {
        let (span, _id) = operation_span("delegate");
        async {
            let log = OperationLog::start("delegated stake").field("wallet", wallet);
            let result = self.delegate_inner(wallet).await;
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn delegate_inner(&self, wallet: &str) -> Result<Tx> {
        let cert = self.wallets.delegation_cert(wallet);
        if !self.exists(&cert).await? {
            return Err(ToolkitError::validation(format!(
                "unable to delegate wallet, {}: no delegation certificate (is a pool cold key configured?)",
                wallet
            )));
        }
        let address = self.wallets.address(wallet).await?;

        let min = Quantity::from(self.funding.delegation_min_lovelace);
        let utxos = self
            .cli
            .utxos(
                Some(&address),
                &[at_least(min.clone()), exclude_scripts(), exclude_tokens()],
            )
            .await?;

        let input = match utxos.into_iter().next() {
            Some(utxo) => utxo,
            None => {
                let funding = self
                    .fund_wallet(&address, &min.to_string())
                    .await?
                    .ok_or_else(|| ToolkitError::validation("delegation funding amount is zero"))?;
                Utxo::new(funding.id, 1, min)
            }
        };

        let value = input.value.clone();
        let draft = TxDraft::new(vec![input], vec![Output::new(address, value)])
            .certificate(cert)
            .witnesses(2);

        self.lifecycle(draft)?
            .execute(&[SigningKey::payment(wallet), SigningKey::stake(wallet)])
            .await
            .map_err(|e| e.context(format!("failed to delegate wallet, {}", wallet)))
    }

    /// Mint `quantity` of `asset_name` under a policy signed by `wallet`
    pub async fn mint(&self, wallet: &str, asset_name: &str, quantity: &str) -> Result<MintReceipt> {
        let (span, _id) = operation_span("mint");
        async {
            let log = OperationLog::start("minted tokens")
                .field("wallet", wallet)
                .field("asset", asset_name)
                .field("quantity", quantity);
            let result = self.mint_inner(wallet, asset_name, quantity).await;
            let log = match &result {
                Ok(receipt) => log.field("policy_id", &receipt.policy_id),
                Err(_) => log,
            };
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn mint_inner(&self, wallet: &str, asset_name: &str, quantity: &str) -> Result<MintReceipt> {
        if !RE_ASSET_NAME.is_match(asset_name) {
            return Err(ToolkitError::validation(format!(
                "invalid asset name, {:?}: 1-32 alphanumeric characters",
                asset_name
            )));
        }
        let quantity = Quantity::parse(quantity)
            .map_err(|_| ToolkitError::validation(format!("invalid mint quantity, {}", quantity)))?;
        if quantity.is_zero() {
            return Err(ToolkitError::validation("mint quantity must be positive"));
        }

        let address = self.wallets.address(wallet).await?;
        let mut utxos = self
            .cli
            .utxos(Some(&address), &[exclude_scripts(), exclude_tokens()])
            .await?;
        if utxos.len() < 2 {
            let amount = self.funding.mint_funding_lovelace.to_string();
            self.fund_wallet(&address, &amount).await?;
            cancellable_sleep(self.funding.settle_delay(), &self.cancel, "mint").await?;
            utxos = self
                .cli
                .utxos(Some(&address), &[exclude_scripts(), exclude_tokens()])
                .await?;
        }
        let input = utxos.first().cloned().ok_or_else(|| {
            ToolkitError::insufficient_funds(
                format!("no spendable utxo for wallet, {}", wallet),
                0,
                self.funding.mint_funding_lovelace,
            )
        })?;

        let key_hash = self.cli.key_hash(wallet).await?;
        let script = json!({ "type": "sig", "keyHash": key_hash });
        let script_file = self
            .cli
            .write_scratch("policy", script.to_string().as_bytes())
            .await?;
        let policy_id = self.cli.policy_id(script_file.path()).await?;

        let asset = Asset::new(policy_id.clone(), asset_name);
        let mut minted = TokenBundle::new();
        minted.add(&asset, &quantity);

        let value = input.value.clone();
        let draft = TxDraft::new(
            vec![input],
            vec![Output::new(address, value).with_tokens(minted.clone())],
        )
        .mint(MintSpec {
            tokens: minted,
            script_file: script_file.path().to_path_buf(),
        })
        .witnesses(1);

        let tx = self
            .lifecycle(draft)?
            .execute(&[SigningKey::payment(wallet)])
            .await
            .map_err(|e| e.context(format!("failed to mint {} for wallet, {}", asset, wallet)))?;

        Ok(MintReceipt {
            tx,
            policy_id,
            asset: asset.id(),
            quantity,
        })
    }

    /// Create a wallet, fund it and bring it to `level`
    pub async fn create_wallet(
        &self,
        name: &str,
        initial_funds: &str,
        level: DelegationLevel,
    ) -> Result<WalletReceipt> {
        let (span, _id) = operation_span("create_wallet");
        async {
            let log = OperationLog::start("created wallet")
                .field("name", name)
                .field("initial_funds", initial_funds);
            let result = self.create_wallet_inner(name, initial_funds, level).await;
            let log = match &result {
                Ok(receipt) => log.field("wallet", &receipt.name),
                Err(_) => log,
            };
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn create_wallet_inner(
        &self,
        name: &str,
        initial_funds: &str,
        level: DelegationLevel,
    ) -> Result<WalletReceipt> {
        validate_quantity(initial_funds)?;
        let name = self.wallets.create(name).await?;
        let address = self.wallets.address(&name).await?;
        info!(wallet = %name, address = %address, "wallet keys generated");

        let funding = self.fund_wallet(&address, initial_funds).await?;
        let registration = match level {
            DelegationLevel::None => None,
            DelegationLevel::Registered | DelegationLevel::Delegated => {
                Some(self.register_stake(&name).await?)
            }
        };
        let delegation = match level {
            DelegationLevel::Delegated => Some(self.delegate(&name).await?),
            _ => None,
        };

        Ok(WalletReceipt {
            name,
            address,
            funding,
            registration,
            delegation,
        })
    }

    /// Spend `inputs` from `source` into a single output at `target`
    ///
    /// Lovelace and every token are carried over; the fee comes out of the
    /// lovelace. `target` defaults to the source wallet.
    pub async fn send_funds(
        &self,
        source: &str,
        target: Option<&str>,
        inputs: &[TxIn],
    ) -> Result<Tx> {
        let (span, _id) = operation_span("send_funds");
        async {
            let log = OperationLog::start("sent funds")
                .field("source", source)
                .field("inputs", inputs.len());
            let result = self.send_funds_inner(source, target, inputs).await;
            log.finish(&result);
            result
        }
        .instrument(span)
        .await
    }

    async fn send_funds_inner(
        &self,
        source: &str,
        target: Option<&str>,
        inputs: &[TxIn],
    ) -> Result<Tx> {
        if inputs.is_empty() {
            return Err(ToolkitError::validation("failed to send funds: no inputs"));
        }
        let mut seen = HashSet::new();
        for input in inputs {
            if !seen.insert(input.to_arg()) {
                return Err(ToolkitError::validation(format!(
                    "failed to send funds: duplicate input {}",
                    input.to_arg()
                )));
            }
        }

        let source_addr = self.wallets.address(source).await?;
        let utxos = self.cli.utxos(Some(&source_addr), &[]).await?;

        let mut selected = Vec::with_capacity(inputs.len());
        let mut lovelace = Quantity::zero();
        let mut tokens = TokenBundle::new();
        for input in inputs {
            let utxo = utxos.find(&input.tx_hash, input.index)?;
            lovelace += &utxo.value;
            tokens.merge(&utxo.token_bundle());
            selected.push(utxo.clone());
        }

        let target = match target {
            Some(t) if !t.is_empty() => self.cli.normalize_address(t).await?,
            _ => source_addr,
        };

        let draft = TxDraft::new(
            selected,
            vec![Output::new(target, lovelace).with_tokens(tokens)],
        )
        .witnesses(1);

        self.lifecycle(draft)?
            .execute(&[SigningKey::payment(source)])
            .await
            .map_err(|e| e.context(format!("failed to send funds from wallet, {}", source)))
    }

    async fn exists(&self, path: &std::path::Path) -> Result<bool> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| ToolkitError::io(format!("unable to check file, {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestNode;

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity("").is_err());
        assert!(validate_quantity("12a").is_err());
        assert!(validate_quantity("-5").is_err());
        assert!(validate_quantity("00000").unwrap().is_none());
        assert_eq!(
            validate_quantity("1000000").unwrap(),
            Some(Quantity::from(1_000_000u64))
        );
        assert!(validate_quantity("9999999999999").unwrap().is_some());
        assert!(validate_quantity("10000000000000").is_err());
    }

    #[tokio::test]
    async fn test_zero_quantity_is_a_noop() {
        let node = TestNode::new();
        let orchestrator = node.orchestrator();
        assert!(orchestrator
            .fund_wallet("addr_test1target", "0")
            .await
            .unwrap()
            .is_none());
        assert!(node.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_treasury_never_queries_whole_utxo_set() {
        let node = TestNode::with_treasury_addr("");
        node.runner
            .respond("query utxo", "ff 3 55555555555 lovelace + TxOutDatumHashNone\n");

        let err = node
            .orchestrator()
            .fund_wallet("addr_test1_target", "1000000")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(err.to_string().contains("treasury address is not configured"));
        assert_eq!(node.runner.count("query utxo"), 0);
        assert_eq!(node.runner.count("transaction build-raw"), 0);
    }

    #[tokio::test]
    async fn test_no_large_treasury_utxo_is_insufficient_funds() {
        let node = TestNode::new();
        node.runner.respond_utxos(
            "addr_test1treasury",
            "aa 0 9999999999 lovelace + TxOutDatumHashNone\n",
        );
        let err = node
            .orchestrator()
            .fund_wallet("addr_test1target", "1000000")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "funds");
        assert_eq!(node.runner.count("transaction build-raw"), 0);
    }

    #[tokio::test]
    async fn test_source_skips_token_and_datum_utxos() {
        let node = TestNode::new();
        node.runner.respond_utxos(
            "addr_test1treasury",
            "aa 0 90000000000 lovelace + 5 policy.coin + TxOutDatumHashNone\n\
             bb 0 80000000000 lovelace + TxOutDatumHash ScriptDataInAlonzoEra \"1e0a\"\n\
             cc 1 70000000000 lovelace + TxOutDatumHashNone\n",
        );
        let source = node.orchestrator().select_source().await.unwrap();
        assert_eq!(source.tx_in(), "cc#1");
    }

    #[tokio::test]
    async fn test_delegate_without_certificate() {
        let node = TestNode::new();
        let orchestrator = node.orchestrator();
        orchestrator.wallets().create("alice").await.unwrap();

        let err = orchestrator.delegate("alice").await.unwrap_err();
        assert_eq!(err.category(), "validation");
        assert_eq!(node.runner.count("transaction build-raw"), 0);
    }

    #[tokio::test]
    async fn test_mint_rejects_bad_asset_name() {
        let node = TestNode::new();
        let err = node
            .orchestrator()
            .mint("alice", "bad name!", "10")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(node.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_funds_rejects_duplicates() {
        let node = TestNode::new();
        let input = TxIn::new("aa", 0);
        let err = node
            .orchestrator()
            .send_funds("alice", None, &[input.clone(), input])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate input aa#0"));
    }
}
