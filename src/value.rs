//! Quantities, assets and value balances
//!
//! Amounts are arbitrary-precision unsigned integers parsed from decimal
//! strings. Nothing in here touches floating point.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use num_bigint::BigUint;
use num_traits::{CheckedSub, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{Result, ToolkitError};

/// Non-negative big-integer amount (lovelace or token units)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(BigUint);

impl Quantity {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    /// Parse a strictly decimal string: nonempty, ASCII digits only
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ToolkitError::parse(format!("invalid quantity, {:?}", s)));
        }
        BigUint::parse_bytes(s.as_bytes(), 10)
            .map(Self)
            .ok_or_else(|| ToolkitError::parse(format!("invalid quantity, {:?}", s)))
    }

    /// Parse, degrading to zero on malformed input
    pub fn parse_lenient(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self - rhs`, or `None` when the result would be negative
    pub fn checked_sub(&self, rhs: &Quantity) -> Option<Quantity> {
        self.0.checked_sub(&rhs.0).map(Self)
    }

    /// Number of decimal digits in the canonical rendering
    pub fn digits(&self) -> usize {
        self.0.to_str_radix(10).len()
    }
}

impl From<u64> for Quantity {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl FromStr for Quantity {
    type Err = ToolkitError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl<'a> Add<&'a Quantity> for &Quantity {
    type Output = Quantity;

    fn add(self, rhs: &'a Quantity) -> Quantity {
        Quantity(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Quantity> for Quantity {
    fn add_assign(&mut self, rhs: &Quantity) {
        self.0 += &rhs.0;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::zero(), |acc, q| &acc + q)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Quantity::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Native asset identity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub policy_id: String,
    pub asset_name: String,
}

impl Asset {
    pub fn new(policy_id: impl Into<String>, asset_name: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            asset_name: asset_name.into(),
        }
    }

    /// `policyId.assetName`
    pub fn id(&self) -> String {
        format!("{}.{}", self.policy_id, self.asset_name)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.policy_id, self.asset_name)
    }
}

/// An amount of a native asset carried by an output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub asset: Asset,
    pub quantity: Quantity,
}

impl Token {
    pub fn new(asset: Asset, quantity: Quantity) -> Self {
        Self { asset, quantity }
    }

    /// `<qty> <policyId>.<assetName>`, the form `--tx-out` and `--mint` expect
    pub fn to_cli_fragment(&self) -> String {
        format!("{} {}", self.quantity, self.asset)
    }
}

/// Per-asset totals, kept in asset order so rendered outputs are deterministic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBundle(BTreeMap<Asset, Quantity>);

impl TokenBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, asset: &Asset, quantity: &Quantity) {
        if quantity.is_zero() {
            return;
        }
        *self.0.entry(asset.clone()).or_default() += quantity;
    }

    pub fn add_token(&mut self, token: &Token) {
        self.add(&token.asset, &token.quantity);
    }

    pub fn merge(&mut self, other: &TokenBundle) {
        for (asset, quantity) in &other.0 {
            self.add(asset, quantity);
        }
    }

    pub fn get(&self, asset: &Asset) -> Quantity {
        self.0.get(asset).cloned().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.0
            .iter()
            .map(|(asset, quantity)| Token::new(asset.clone(), quantity.clone()))
    }

    pub fn to_cli_fragments(&self) -> Vec<String> {
        self.tokens().map(|t| t.to_cli_fragment()).collect()
    }

    fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.0.keys()
    }
}

impl FromIterator<Token> for TokenBundle {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        let mut bundle = TokenBundle::new();
        for token in iter {
            bundle.add_token(&token);
        }
        bundle
    }
}

/// Lovelace plus tokens on one side of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Balance {
    pub lovelace: Quantity,
    pub tokens: TokenBundle,
}

impl Balance {
    pub fn add(&mut self, lovelace: &Quantity, tokens: &TokenBundle) {
        self.lovelace += lovelace;
        self.tokens.merge(tokens);
    }
}

/// Check that a transaction conserves value
///
/// Lovelace: `inputs = outputs + fee + deposit`.
/// Every asset: `inputs + minted = outputs`.
pub fn verify_conservation(
    inputs: &Balance,
    outputs: &Balance,
    fee: &Quantity,
    deposit: &Quantity,
    minted: &TokenBundle,
) -> Result<()> {
    let spent = &(&outputs.lovelace + fee) + deposit;
    if inputs.lovelace != spent {
        return Err(ToolkitError::validation(format!(
            "lovelace not conserved: inputs {} != outputs {} + fee {} + deposit {}",
            inputs.lovelace, outputs.lovelace, fee, deposit
        )));
    }

    let mut available = inputs.tokens.clone();
    available.merge(minted);
    let assets = available.assets().chain(outputs.tokens.assets());
    for asset in assets {
        let have = available.get(asset);
        let sent = outputs.tokens.get(asset);
        if have != sent {
            return Err(ToolkitError::validation(format!(
                "asset {} not conserved: inputs + minted {} != outputs {}",
                asset, have, sent
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    #[test]
    fn test_parse_rejects_non_digits() {
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("-1").is_err());
        assert!(Quantity::parse("+1").is_err());
        assert!(Quantity::parse("1.5").is_err());
        assert!(Quantity::parse("12a").is_err());
        assert_eq!(Quantity::parse_lenient("12a"), Quantity::zero());
    }

    #[test]
    fn test_big_arithmetic_is_exact() {
        let v = q("99999999999999999999999999");
        let r = v.checked_sub(&q("1")).unwrap();
        assert_eq!(r.to_string(), "99999999999999999999999998");
        assert!(q("5").checked_sub(&q("6")).is_none());
        assert_eq!(q("0001").to_string(), "1");
        assert_eq!(q("1234567890123").digits(), 13);
    }

    #[test]
    fn test_bundle_aggregates_per_asset() {
        let a = Asset::new("5a39", "test");
        let b = Asset::new("bce9", "piCoin");
        let bundle: TokenBundle = vec![
            Token::new(a.clone(), q("10")),
            Token::new(b.clone(), q("1")),
            Token::new(a.clone(), q("5")),
        ]
        .into_iter()
        .collect();

        assert_eq!(bundle.len(), 2);
        assert_eq!(bundle.get(&a), q("15"));
        assert_eq!(
            bundle.to_cli_fragments(),
            vec!["15 5a39.test".to_string(), "1 bce9.piCoin".to_string()]
        );
    }

    #[test]
    fn test_conservation_with_mint_and_deposit() {
        let asset = Asset::new("policy", "coin");
        let mut minted = TokenBundle::new();
        minted.add(&asset, &q("100"));

        let inputs = Balance {
            lovelace: q("10000000"),
            tokens: TokenBundle::new(),
        };
        let outputs = Balance {
            lovelace: q("7825000"),
            tokens: minted.clone(),
        };
        verify_conservation(&inputs, &outputs, &q("175000"), &q("2000000"), &minted).unwrap();

        let err = verify_conservation(&inputs, &outputs, &q("175001"), &q("2000000"), &minted);
        assert!(err.is_err());

        let err = verify_conservation(&inputs, &outputs, &q("175000"), &q("2000000"), &TokenBundle::new());
        assert!(err.unwrap_err().to_string().contains("policy.coin"));
    }
}
