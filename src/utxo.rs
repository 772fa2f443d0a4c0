//! UTXO listing parser
//!
//! `cardano-cli query utxo` prints a loosely formatted table:
//!
//! ```text
//!                            TxHash                                 TxIx        Amount
//! --------------------------------------------------------------------------------------
//! 111b3dc0...9081989ba     0        1000000000 lovelace + 1000000000 5a39...c83c.test + TxOutDatumHashNone
//! 0f318cef...d67391d6     0        10000000 lovelace + TxOutDatumHash ScriptDataInAlonzoEra "ed04...b4a4"
//! ```
//!
//! There is no grammar for this output, so every line is matched on its own and
//! anything that does not look like a UTXO row is skipped. All of the pattern
//! matching for the listing lives in this module.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ToolkitError};
use crate::value::{Asset, Quantity, Token, TokenBundle};

static RE_UTXO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([a-z0-9]+)\s+(\d+)\s+(\d+)\s+lovelace(.*)$").expect("valid regex")
});

static RE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+\s*(\d+)\s+([a-z0-9]+)\.(\S+)").expect("valid regex"));

// Older releases print `ScriptDataInAlonzoEra "<hash>"`, later ones drop the era tag.
static RE_DATUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:ScriptDataIn\w+Era|TxOutDatumHash)\s+"([^"]+)""#).expect("valid regex")
});

/// Unspent transaction output as reported by the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Hash of the transaction that created this output
    pub tx_hash: String,
    pub index: u32,
    /// Lovelace carried by the output
    pub value: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datum_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<Token>,
}

impl Utxo {
    pub fn new(tx_hash: impl Into<String>, index: u32, value: Quantity) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            index,
            value,
            datum_hash: None,
            tokens: Vec::new(),
        }
    }

    /// `<tx_hash>#<index>`, the form `--tx-in` expects
    pub fn tx_in(&self) -> String {
        format!("{}#{}", self.tx_hash, self.index)
    }

    pub fn has_datum(&self) -> bool {
        self.datum_hash.is_some()
    }

    pub fn has_tokens(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Tokens aggregated per asset
    pub fn token_bundle(&self) -> TokenBundle {
        self.tokens.iter().cloned().collect()
    }

    /// One row of a `query utxo` listing describing this output
    pub fn to_listing_line(&self) -> String {
        let mut line = format!("{}     {}        {} lovelace", self.tx_hash, self.index, self.value);
        for token in &self.tokens {
            line.push_str(&format!(" + {}", token.to_cli_fragment()));
        }
        match &self.datum_hash {
            Some(datum) => line.push_str(&format!(" + TxOutDatumHash ScriptDataInAlonzoEra \"{}\"", datum)),
            None => line.push_str(" + TxOutDatumHashNone"),
        }
        line
    }
}

impl fmt::Display for Utxo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(datum) = &self.datum_hash {
            write!(f, "{}@", datum)?;
        }
        write!(f, "{}#{}+{}:lovelace", self.tx_hash, self.index, self.value)?;
        for token in &self.tokens {
            write!(f, "+{}:{}", token.quantity, token.asset.id())?;
        }
        Ok(())
    }
}

/// Parse a `query utxo` listing into UTXOs in document order
pub fn parse_utxos(text: &str) -> Vec<Utxo> {
    RE_UTXO
        .captures_iter(text)
        .map(|caps| {
            let index = caps[2].parse::<u32>().unwrap_or_default();
            let mut utxo = Utxo::new(&caps[1], index, Quantity::parse_lenient(&caps[3]));

            let extra = caps.get(4).map(|m| m.as_str()).unwrap_or_default();
            if !extra.is_empty() {
                utxo.datum_hash = RE_DATUM.captures(extra).map(|c| c[1].to_string());
                utxo.tokens = RE_TOKEN
                    .captures_iter(extra)
                    .map(|t| {
                        Token::new(
                            Asset::new(&t[2], &t[3]),
                            Quantity::parse_lenient(&t[1]),
                        )
                    })
                    .collect();
            }
            utxo
        })
        .collect()
}

/// Predicate used to select UTXOs
pub type UtxoFilter = Box<dyn Fn(&Utxo) -> bool + Send + Sync>;

/// Keep only UTXOs without a datum hash (plain key-locked outputs)
pub fn exclude_scripts() -> UtxoFilter {
    Box::new(|u: &Utxo| !u.has_datum())
}

/// Keep only lovelace-only UTXOs
pub fn exclude_tokens() -> UtxoFilter {
    Box::new(|u: &Utxo| !u.has_tokens())
}

/// Keep UTXOs carrying the given `policyId.assetName`
pub fn has_token(asset_id: impl Into<String>) -> UtxoFilter {
    let asset_id = asset_id.into();
    Box::new(move |u: &Utxo| u.tokens.iter().any(|t| t.asset.id() == asset_id))
}

/// Keep UTXOs holding at least `lovelace`
pub fn at_least(lovelace: impl Into<Quantity>) -> UtxoFilter {
    let min = lovelace.into();
    Box::new(move |u: &Utxo| u.value >= min)
}

/// Ordered collection of UTXOs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Utxos(Vec<Utxo>);

impl Utxos {
    pub fn parse(text: &str) -> Self {
        Self(parse_utxos(text))
    }

    /// Look up a UTXO by its identity
    pub fn find(&self, tx_hash: &str, index: u32) -> Result<&Utxo> {
        self.0
            .iter()
            .find(|u| u.tx_hash == tx_hash && u.index == index)
            .ok_or_else(|| {
                ToolkitError::validation(format!("unable to find utxo: {}#{}", tx_hash, index))
            })
    }

    /// UTXOs satisfying every filter
    pub fn filter(self, filters: &[UtxoFilter]) -> Self {
        Self(
            self.0
                .into_iter()
                .filter(|u| filters.iter().all(|f| f(u)))
                .collect(),
        )
    }

    pub fn first(&self) -> Option<&Utxo> {
        self.0.first()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Utxo> {
        self.0.iter()
    }

    /// Listing text that parses back to this collection
    pub fn to_listing(&self) -> String {
        let mut out = String::from(
            "                           TxHash                                 TxIx        Amount\n\
             --------------------------------------------------------------------------------------\n",
        );
        for utxo in &self.0 {
            out.push_str(&utxo.to_listing_line());
            out.push('\n');
        }
        out
    }

    pub fn into_vec(self) -> Vec<Utxo> {
        self.0
    }
}

impl From<Vec<Utxo>> for Utxos {
    fn from(v: Vec<Utxo>) -> Self {
        Self(v)
    }
}

impl IntoIterator for Utxos {
    type Item = Utxo;
    type IntoIter = std::vec::IntoIter<Utxo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Utxos {
    type Item = &'a Utxo;
    type IntoIter = std::slice::Iter<'a, Utxo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
