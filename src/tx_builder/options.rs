//! Raw transaction build options
//!
//! [`BuildOptions`] is assembled through [`BuildOptionsBuilder`] and checked
//! once in [`BuildOptionsBuilder::finalize`]. Inputs, outputs and certificates
//! keep the order in which they were added.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{Result, ToolkitError};
use crate::utxo::Utxo;
use crate::value::{Quantity, TokenBundle};

/// Transaction input reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub tx_hash: String,
    pub index: u32,
}

impl TxIn {
    pub fn new(tx_hash: impl Into<String>, index: u32) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
        }
    }

    pub fn to_arg(&self) -> String {
        format!("{}#{}", self.tx_hash, self.index)
    }
}

impl FromStr for TxIn {
    type Err = ToolkitError;

    /// `<tx_hash>#<index>`
    fn from_str(s: &str) -> Result<Self> {
        let (hash, index) = s
            .split_once('#')
            .ok_or_else(|| ToolkitError::validation(format!("invalid tx-in, {}", s)))?;
        let index = index
            .parse()
            .map_err(|_| ToolkitError::validation(format!("invalid tx-in index, {}", s)))?;
        if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(ToolkitError::validation(format!("invalid tx-in hash, {}", s)));
        }
        Ok(Self::new(hash, index))
    }
}

impl From<&Utxo> for TxIn {
    fn from(utxo: &Utxo) -> Self {
        Self::new(utxo.tx_hash.clone(), utxo.index)
    }
}

/// Transaction output; `address` may be a wallet name until the build resolves it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub address: String,
    pub quantity: Quantity,
    /// `<qty> <policyId>.<assetName>` fragments
    pub tokens: Vec<String>,
}

impl TxOut {
    /// `<addr>+<lovelace>[+<token>...]` with an already resolved address
    pub fn to_arg(&self, address: &str) -> String {
        let mut out = format!("{}+{}", address, self.quantity);
        for token in &self.tokens {
            out.push('+');
            out.push_str(token);
        }
        out
    }
}

impl FromStr for TxOut {
    type Err = ToolkitError;

    /// `<addr>+<lovelace>[+<qty> <policyId>.<assetName>...]`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('+');
        let address = parts.next().unwrap_or_default().trim();
        if address.is_empty() {
            return Err(ToolkitError::validation(format!("invalid tx-out address, {}", s)));
        }
        let quantity = parts
            .next()
            .ok_or_else(|| ToolkitError::validation(format!("invalid tx-out, {}", s)))
            .and_then(|q| Quantity::parse(q.trim()))?;

        let mut tokens = Vec::new();
        for fragment in parts {
            let fragment = fragment.trim();
            let valid = fragment
                .split_once(' ')
                .map(|(qty, asset)| {
                    !qty.is_empty()
                        && qty.bytes().all(|b| b.is_ascii_digit())
                        && asset.split_once('.').is_some_and(|(policy, _)| !policy.is_empty())
                })
                .unwrap_or(false);
            if !valid {
                return Err(ToolkitError::validation(format!(
                    "invalid tx-out token {:?} in {}",
                    fragment, s
                )));
            }
            tokens.push(fragment.to_string());
        }

        Ok(Self {
            address: address.to_string(),
            quantity,
            tokens,
        })
    }
}

/// Validated options for `transaction build-raw`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub fee: Quantity,
    pub mint: Option<String>,
    pub mint_script_file: Option<PathBuf>,
    pub tx_in: Vec<TxIn>,
    pub tx_out: Vec<TxOut>,
    pub certificates: Vec<PathBuf>,
}

impl BuildOptions {
    pub fn builder() -> BuildOptionsBuilder {
        BuildOptionsBuilder::default()
    }

    /// Argument vector for `build-raw`
    ///
    /// `addresses` holds the resolved destination of each output, in output order.
    pub fn to_args(&self, era: &str, out_file: &Path, addresses: &[String]) -> Vec<String> {
        let mut args = vec![
            "transaction".to_string(),
            "build-raw".to_string(),
            "--fee".to_string(),
            self.fee.to_string(),
            format!("--{}-era", era),
            "--out-file".to_string(),
            out_file.display().to_string(),
        ];

        for input in &self.tx_in {
            args.push("--tx-in".to_string());
            args.push(input.to_arg());
        }
        for (output, address) in self.tx_out.iter().zip(addresses) {
            args.push("--tx-out".to_string());
            args.push(output.to_arg(address));
        }
        if let (Some(mint), Some(script)) = (&self.mint, &self.mint_script_file) {
            args.push(format!("--mint={}", mint));
            args.push(format!("--mint-script-file={}", script.display()));
        }
        for cert in &self.certificates {
            args.push("--certificate-file".to_string());
            args.push(cert.display().to_string());
        }
        args
    }
}

/// Accumulates build options; nothing is checked until [`finalize`](Self::finalize)
#[derive(Debug, Clone, Default)]
pub struct BuildOptionsBuilder {
    fee: Option<String>,
    mint: Option<String>,
    mint_script_file: Option<PathBuf>,
    tx_in: Vec<TxIn>,
    tx_out: Vec<TxOut>,
    certificates: Vec<PathBuf>,
}

impl BuildOptionsBuilder {
    /// Fee in lovelace as a decimal string; defaults to `0`
    pub fn fee(mut self, fee: impl Into<String>) -> Self {
        self.fee = Some(fee.into());
        self
    }

    pub fn tx_in(mut self, tx_hash: impl Into<String>, index: u32) -> Self {
        self.tx_in.push(TxIn::new(tx_hash, index));
        self
    }

    pub fn tx_out(mut self, address: impl Into<String>, quantity: Quantity, tokens: Vec<String>) -> Self {
        self.tx_out.push(TxOut {
            address: address.into(),
            quantity,
            tokens,
        });
        self
    }

    /// Output carrying every token of `bundle`
    pub fn tx_out_bundle(self, address: impl Into<String>, quantity: Quantity, bundle: &TokenBundle) -> Self {
        self.tx_out(address, quantity, bundle.to_cli_fragments())
    }

    /// Mint expression, e.g. `100 <policyId>.<assetName>`
    pub fn mint(mut self, expr: impl Into<String>) -> Self {
        self.mint = Some(expr.into());
        self
    }

    pub fn mint_script_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mint_script_file = Some(path.into());
        self
    }

    pub fn certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificates.push(path.into());
        self
    }

    pub fn finalize(self) -> Result<BuildOptions> {
        let fee = match self.fee.as_deref() {
            None | Some("") => Quantity::zero(),
            Some(fee) => Quantity::parse(fee)
                .map_err(|_| ToolkitError::validation(format!("invalid fee, {}", fee)))?,
        };

        let mint = self.mint.filter(|m| !m.is_empty());
        match (&mint, &self.mint_script_file) {
            (Some(_), None) => {
                return Err(ToolkitError::validation(
                    "mint requires a mint script file",
                ))
            }
            (None, Some(file)) => {
                return Err(ToolkitError::validation(format!(
                    "mint script file given without a mint expression, {}",
                    file.display()
                )))
            }
            _ => {}
        }

        Ok(BuildOptions {
            fee,
            mint,
            mint_script_file: self.mint_script_file,
            tx_in: self.tx_in,
            tx_out: self.tx_out,
            certificates: self.certificates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(n: u64) -> Quantity {
        Quantity::from(n)
    }

    #[test]
    fn test_tx_in_from_str() {
        let tx_in: TxIn = "abc123#2".parse().unwrap();
        assert_eq!(tx_in, TxIn::new("abc123", 2));
        assert_eq!(tx_in.to_arg(), "abc123#2");
        assert!("abc123".parse::<TxIn>().is_err());
        assert!("abc#x".parse::<TxIn>().is_err());
        assert!("#1".parse::<TxIn>().is_err());
    }

    #[test]
    fn test_tx_out_from_str() {
        let out: TxOut = "addr_test1_bob+5000000+12 p1.coin".parse().unwrap();
        assert_eq!(out.address, "addr_test1_bob");
        assert_eq!(out.quantity, Quantity::from(5_000_000u64));
        assert_eq!(out.tokens, vec!["12 p1.coin".to_string()]);
        assert_eq!(out.to_arg("addr_test1_bob"), "addr_test1_bob+5000000+12 p1.coin");

        let plain: TxOut = "alice+1".parse().unwrap();
        assert!(plain.tokens.is_empty());

        assert!("addr_test1_bob".parse::<TxOut>().is_err());
        assert!("+5".parse::<TxOut>().is_err());
        assert!("bob+5a".parse::<TxOut>().is_err());
        assert!("bob+5+coin".parse::<TxOut>().is_err());
    }

    #[test]
    fn test_default_fee_is_zero() {
        let options = BuildOptions::builder().finalize().unwrap();
        assert!(options.fee.is_zero());
        assert!(options.tx_in.is_empty());
    }

    #[test]
    fn test_fee_must_be_digits() {
        assert!(BuildOptions::builder().fee("12a").finalize().is_err());
        assert!(BuildOptions::builder().fee("-1").finalize().is_err());
        assert_eq!(
            BuildOptions::builder().fee("175000").finalize().unwrap().fee,
            q(175_000)
        );
    }

    #[test]
    fn test_mint_and_script_go_together() {
        let err = BuildOptions::builder().mint("1 p.a").finalize().unwrap_err();
        assert_eq!(err.category(), "validation");

        let err = BuildOptions::builder()
            .mint_script_file("/tmp/policy.script")
            .finalize()
            .unwrap_err();
        assert_eq!(err.category(), "validation");

        assert!(BuildOptions::builder()
            .mint("1 p.a")
            .mint_script_file("/tmp/policy.script")
            .finalize()
            .is_ok());
    }

    #[test]
    fn test_argument_order() {
        let options = BuildOptions::builder()
            .certificate("/w/a-stake.reg.cert")
            .tx_out("b", q(2), vec!["5 p.x".to_string(), "1 p.y".to_string()])
            .tx_in("h1", 0)
            .mint("5 p.x")
            .tx_in("h1", 0)
            .tx_out("a", q(1), vec![])
            .mint_script_file("/tmp/s")
            .fee("7")
            .finalize()
            .unwrap();

        let args = options.to_args(
            "alonzo",
            Path::new("/d/tmp/body"),
            &["addr_b".to_string(), "addr_a".to_string()],
        );
        let expected: Vec<String> = [
            "transaction", "build-raw", "--fee", "7", "--alonzo-era", "--out-file", "/d/tmp/body",
            "--tx-in", "h1#0", "--tx-in", "h1#0",
            "--tx-out", "addr_b+2+5 p.x+1 p.y", "--tx-out", "addr_a+1",
            "--mint=5 p.x", "--mint-script-file=/tmp/s",
            "--certificate-file", "/w/a-stake.reg.cert",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(args, expected);
    }
}
