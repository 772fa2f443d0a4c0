//! Test Utilities Module
//!
//! [`ScriptedRunner`] stands in for `cardano-cli`: it records every argument
//! vector, replays scripted replies and failures, and otherwise behaves like a
//! tiny deterministic node (writes key files, tx envelopes and protocol
//! parameters, derives fees from body size). [`TestNode`] wires it to a
//! temporary data directory.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::cardano::CardanoCli;
use crate::config::{FundingConfig, Network, NodeSettings};
use crate::errors::{Result, ToolkitError};
use crate::funding::Orchestrator;
use crate::invoker::CommandRunner;
use crate::tx_builder::tx::{blake2b_256, body_bytes, TextEnvelope};

/// Base fee of the scripted fee formula
pub const FEE_BASE: u64 = 155_381;
/// Per-byte fee of the scripted fee formula
pub const FEE_PER_BYTE: u64 = 44;
pub const POLICY_ID: &str = "b0a1c2d3e4f5a6b7c8d9e0f1a2b3c4d5e6f7a8b9c0d1e2f3a4b5c6d7";
pub const KEY_HASH: &str = "1e2d3c4b5a69788796a5b4c3d2e1f0e1d2c3b4a5968778695a4b3c2d";
pub const STAKE_ADDRESS_DEPOSIT: u64 = 2_000_000;

const PROTOCOL_PARAMETERS: &str = r#"{
    "txFeePerByte": 44,
    "txFeeFixed": 155381,
    "stakeAddressDeposit": 2000000,
    "stakePoolDeposit": 500000000,
    "protocolVersion": {"major": 6, "minor": 0}
}"#;

const TIP: &str = r#"{"block":1234,"epoch":150,"era":"Alonzo","hash":"9f2c","slot":987654,"syncProgress":"100.00"}"#;

const VERSION: &str = "cardano-cli 1.30.1 - linux-x86_64 - ghc-8.10\ngit rev 0fb43f4e3da8b225f4f86557aed90a183981a64f\n";

/// Owned argument vector from string literals
pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Value following the first occurrence of `flag`
pub fn arg_after(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Values following every occurrence of `flag`, in order
pub fn arg_values(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|w| w[0] == flag)
        .map(|w| w[1].clone())
        .collect()
}

/// Subcommand key of an argument vector: its first two words
pub fn command_key(args: &[String]) -> String {
    args.iter().take(2).cloned().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Failure(String),
}

#[derive(Debug, Default)]
struct Script {
    once: VecDeque<Reply>,
    sticky: Option<Reply>,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<Vec<String>>,
    scripts: HashMap<String, Script>,
    signed_tx_ids: Vec<String>,
}

impl Inner {
    fn script(&mut self, key: &str) -> &mut Script {
        self.scripts.entry(key.to_string()).or_default()
    }

    fn next_reply(&mut self, key: &str) -> Option<Reply> {
        let script = self.scripts.get_mut(key)?;
        script.once.pop_front().or_else(|| script.sticky.clone())
    }
}

/// Scripted stand-in for the ledger CLI
///
/// Replies are keyed by the first two arguments (`"transaction submit"`), or by
/// `"query utxo <address>"` for per-address UTXO listings. One-shot replies are
/// consumed before the sticky one; without either, the built-in behaviour runs.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reply with `output` to every `key` call
    pub fn respond(&self, key: &str, output: &str) {
        self.lock().script(key).sticky = Some(Reply::Output(output.to_string()));
    }

    /// Reply with `output` to the next `key` call only
    pub fn respond_once(&self, key: &str, output: &str) {
        self.lock()
            .script(key)
            .once
            .push_back(Reply::Output(output.to_string()));
    }

    /// UTXO listing returned for `query utxo --address <address>`
    pub fn respond_utxos(&self, address: &str, listing: &str) {
        self.respond(&format!("query utxo {}", address), listing);
    }

    /// UTXO listing returned for the next query of `address` only
    pub fn respond_utxos_once(&self, address: &str, listing: &str) {
        self.respond_once(&format!("query utxo {}", address), listing);
    }

    /// Fail every `key` call with `output`
    pub fn fail(&self, key: &str, output: &str) {
        self.lock().script(key).sticky = Some(Reply::Failure(output.to_string()));
    }

    /// Fail the next `times` calls of `key` with `output`
    pub fn fail_times(&self, key: &str, output: &str, times: usize) {
        let mut inner = self.lock();
        let script = inner.script(key);
        for _ in 0..times {
            script.once.push_back(Reply::Failure(output.to_string()));
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, key: &str) -> Vec<Vec<String>> {
        self.lock()
            .calls
            .iter()
            .filter(|c| command_key(c) == key)
            .cloned()
            .collect()
    }

    pub fn last_call(&self, key: &str) -> Option<Vec<String>> {
        self.calls_for(key).pop()
    }

    pub fn count(&self, key: &str) -> usize {
        self.calls_for(key).len()
    }

    /// Id of the most recently signed transaction
    pub fn last_signed_tx_id(&self) -> Option<String> {
        self.lock().signed_tx_ids.last().cloned()
    }

    pub fn signed_tx_ids(&self) -> Vec<String> {
        self.lock().signed_tx_ids.clone()
    }

    fn builtin(&self, args: &[String]) -> std::result::Result<String, String> {
        match command_key(args).as_str() {
            "transaction build-raw" => {
                let out = required(args, "--out-file")?;
                let mut body = encode_body(args);
                let mut cbor = vec![0x84];
                cbor.append(&mut body);
                cbor.extend_from_slice(&[0xa0, 0xf5, 0xf6]);
                write_file(&out, &envelope("TxBodyAlonzo", &cbor))?;
                Ok(String::new())
            }
            "transaction sign" => {
                let body_file = required(args, "--tx-body-file")?;
                let out = required(args, "--out-file")?;
                let body = read_body(&body_file)?;
                let keys = arg_values(args, "--signing-key-file");

                let mut cbor = vec![0x84];
                cbor.extend_from_slice(&body);
                cbor.extend_from_slice(&[0xa1, 0x00]);
                cbor.extend(array_header(keys.len()));
                for key in &keys {
                    cbor.extend(text(key));
                }
                cbor.extend_from_slice(&[0xf5, 0xf6]);
                write_file(&out, &envelope("Tx AlonzoEra", &cbor))?;

                self.lock()
                    .signed_tx_ids
                    .push(hex::encode(blake2b_256(&body)));
                Ok(String::new())
            }
            "transaction calculate-min-fee" => {
                let body = read_body(&required(args, "--tx-body-file")?)?;
                let fee = FEE_BASE + FEE_PER_BYTE * body.len() as u64;
                Ok(format!("{} Lovelace\n", fee))
            }
            "query protocol-parameters" => {
                write_file(&required(args, "--out-file")?, PROTOCOL_PARAMETERS)?;
                Ok(String::new())
            }
            "address key-gen" | "stake-address key-gen" => {
                let vkey = required(args, "--verification-key-file")?;
                let skey = required(args, "--signing-key-file")?;
                write_file(&vkey, &key_envelope("VerificationKeyShelley_ed25519", &vkey))?;
                write_file(&skey, &key_envelope("SigningKeyShelley_ed25519", &skey))?;
                Ok(String::new())
            }
            "address build" => {
                let out = required(args, "--out-file")?;
                write_file(&out, &format!("addr_test1_{}", stem(&out)))?;
                Ok(String::new())
            }
            "stake-address build" => {
                let out = required(args, "--out-file")?;
                write_file(&out, &format!("stake_test1_{}", stem(&out)))?;
                Ok(String::new())
            }
            "stake-address registration-certificate" | "stake-address delegation-certificate" => {
                let out = required(args, "--out-file")?;
                write_file(&out, &envelope("CertificateShelley", &[0x82, 0x00]))?;
                Ok(String::new())
            }
            "address key-hash" => Ok(format!("{}\n", KEY_HASH)),
            "transaction policyid" => Ok(format!("{}\n", POLICY_ID)),
            "query tip" => Ok(TIP.to_string()),
            "version" => Ok(VERSION.to_string()),
            _ => Ok(String::new()),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, args: &[String]) -> Result<String> {
        let key = command_key(args);
        let reply = {
            let mut inner = self.lock();
            inner.calls.push(args.to_vec());
            let by_address = match (key.as_str(), arg_after(args, "--address")) {
                ("query utxo", Some(address)) => {
                    inner.next_reply(&format!("query utxo {}", address))
                }
                _ => None,
            };
            by_address.or_else(|| inner.next_reply(&key))
        };

        let failed = |output: String| ToolkitError::Process {
            command: format!("cardano-cli {}", args.join(" ")),
            output,
            status: Some(1),
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Failure(output)) => Err(failed(output)),
            None => self.builtin(args).map_err(failed),
        }
    }
}

fn required(args: &[String], flag: &str) -> std::result::Result<String, String> {
    arg_after(args, flag).ok_or_else(|| format!("Missing: {}", flag))
}

fn write_file(path: &str, contents: &str) -> std::result::Result<(), String> {
    std::fs::write(path, contents).map_err(|e| format!("{}: {}", path, e))
}

fn read_body(path: &str) -> std::result::Result<Vec<u8>, String> {
    let data = std::fs::read(path).map_err(|e| format!("{}: {}", path, e))?;
    let cbor = TextEnvelope::parse(&data)
        .and_then(|env| env.cbor())
        .map_err(|e| format!("{}: {}", path, e))?;
    body_bytes(&cbor)
        .map(|b| b.to_vec())
        .map_err(|e| format!("{}: {}", path, e))
}

fn stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn envelope(kind: &str, cbor: &[u8]) -> String {
    serde_json::json!({
        "type": kind,
        "description": "",
        "cborHex": hex::encode(cbor),
    })
    .to_string()
}

fn key_envelope(kind: &str, path: &str) -> String {
    let seed = blake2b_256(path.as_bytes());
    let mut cbor = vec![0x58, 0x20];
    cbor.extend_from_slice(&seed);
    envelope(kind, &cbor)
}

fn array_header(len: usize) -> Vec<u8> {
    match len {
        0..=23 => vec![0x80 + len as u8],
        24..=255 => vec![0x98, len as u8],
        _ => {
            let mut out = vec![0x99];
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out
        }
    }
}

fn text(s: &str) -> Vec<u8> {
    let len = s.len();
    let mut out = match len {
        0..=23 => vec![0x60 + len as u8],
        24..=255 => vec![0x78, len as u8],
        _ => {
            let mut out = vec![0x79];
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out
        }
    };
    out.extend_from_slice(s.as_bytes());
    out
}

/// Body stand-in: the build arguments as CBOR text, minus the output path
///
/// The fee is a fixed-width unsigned integer so the body size does not depend
/// on the fee value.
fn encode_body(args: &[String]) -> Vec<u8> {
    let mut items: Vec<Vec<u8>> = Vec::new();
    let mut iter = args.iter().skip(2);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--out-file" => {
                iter.next();
            }
            "--fee" => {
                let fee: u64 = iter.next().and_then(|f| f.parse().ok()).unwrap_or_default();
                let mut item = vec![0x1b];
                item.extend_from_slice(&fee.to_be_bytes());
                items.push(item);
            }
            other => items.push(text(other)),
        }
    }
    let mut out = array_header(items.len());
    for item in items {
        out.extend(item);
    }
    out
}

/// Temporary data directory plus a scripted CLI
pub struct TestNode {
    dir: TempDir,
    pub runner: ScriptedRunner,
    settings: NodeSettings,
}

impl TestNode {
    /// Testnet magic 42, treasury `addr_test1treasury`, no stake pool
    pub fn new() -> Self {
        Self::with_runner(ScriptedRunner::new())
    }

    pub fn with_runner(runner: ScriptedRunner) -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {}", e));
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(data_dir.join("tmp"))
            .unwrap_or_else(|e| panic!("create data dir: {}", e));
        let data_dir =
            std::fs::canonicalize(&data_dir).unwrap_or_else(|e| panic!("canonicalize: {}", e));

        let settings = NodeSettings {
            cli: vec!["cardano-cli".to_string()],
            treasury_signing_key_file: data_dir.join("treasury.skey"),
            data_dir,
            socket_path: None,
            network: Network::Testnet(42),
            era: "alonzo".to_string(),
            treasury_addr: "addr_test1treasury".to_string(),
            pool_cold_vkey_file: None,
            debug: false,
        };
        Self {
            dir,
            runner,
            settings,
        }
    }

    /// Node with a stake pool cold key configured
    pub fn with_pool() -> Self {
        let mut node = Self::new();
        node.settings.pool_cold_vkey_file = Some(node.dir.path().join("pool.cold.vkey"));
        node
    }

    /// Node with a different treasury address
    pub fn with_treasury_addr(addr: &str) -> Self {
        let mut node = Self::new();
        node.settings.treasury_addr = addr.to_string();
        node
    }

    /// Node whose scratch files are retained
    pub fn with_debug(debug: bool) -> Self {
        let mut node = Self::new();
        node.settings.debug = debug;
        node
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn cli(&self) -> CardanoCli {
        CardanoCli::with_runner(self.settings.clone(), Arc::new(self.runner.clone()))
    }

    /// Orchestrator with default funding knobs and a fresh cancellation token
    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(FundingConfig::default(), CancellationToken::new())
    }

    pub fn orchestrator_with(&self, funding: FundingConfig, cancel: CancellationToken) -> Orchestrator {
        Orchestrator::new(self.cli(), funding, cancel)
    }

    pub fn data_dir(&self) -> &Path {
        &self.settings.data_dir
    }

    /// Write `<data_dir>/wallets/<name><suffix>`
    pub fn write_wallet_file(&self, name: &str, suffix: &str, contents: &str) -> PathBuf {
        let dir = self.settings.wallets_dir();
        std::fs::create_dir_all(&dir).unwrap_or_else(|e| panic!("create wallets dir: {}", e));
        let path = dir.join(format!("{}{}", name, suffix));
        std::fs::write(&path, contents).unwrap_or_else(|e| panic!("write wallet file: {}", e));
        path
    }

    /// Files currently left in `<data_dir>/tmp`
    pub fn tmp_file_count(&self) -> usize {
        std::fs::read_dir(self.settings.tmp_dir())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_helpers() {
        let a = args(&["transaction", "build-raw", "--tx-out", "x", "--tx-out", "y"]);
        assert_eq!(arg_after(&a, "--tx-out").as_deref(), Some("x"));
        assert_eq!(arg_values(&a, "--tx-out"), vec!["x", "y"]);
        assert_eq!(command_key(&a), "transaction build-raw");
        assert_eq!(arg_after(&a, "--fee"), None);
    }

    #[tokio::test]
    async fn test_scripted_replies_take_precedence() {
        let runner = ScriptedRunner::new();
        runner.respond_once("query tip", "first");
        runner.fail_times("transaction submit", "boom", 1);

        let tip = args(&["query", "tip"]);
        assert_eq!(runner.run(&tip).await.unwrap(), "first");
        assert_eq!(runner.run(&tip).await.unwrap(), TIP);

        let submit = args(&["transaction", "submit"]);
        assert_eq!(runner.run(&submit).await.unwrap_err().category(), "process");
        assert!(runner.run(&submit).await.is_ok());
        assert_eq!(runner.count("transaction submit"), 2);
    }

    #[tokio::test]
    async fn test_utxo_replies_by_address() {
        let runner = ScriptedRunner::new();
        runner.respond_utxos("addr_a", "listing a");
        let a = args(&["query", "utxo", "--address", "addr_a"]);
        let b = args(&["query", "utxo", "--address", "addr_b"]);
        assert_eq!(runner.run(&a).await.unwrap(), "listing a");
        assert_eq!(runner.run(&b).await.unwrap(), "");
    }

    #[test]
    fn test_body_size_ignores_fee_value() {
        let zero = encode_body(&args(&["transaction", "build-raw", "--fee", "0"]));
        let fee = encode_body(&args(&["transaction", "build-raw", "--fee", "171573"]));
        assert_eq!(zero.len(), fee.len());
        assert_ne!(zero, fee);
    }
}
