//! cardano-toolkit
//!
//! Transaction assembly, fee estimation and treasury funding on top of the
//! `cardano-cli` command-line tool.
//!
//! - [`utxo`]: typed view of the `query utxo` listing
//! - [`value`]: big-integer lovelace and multi-asset bundles
//! - [`invoker`]: process boundary to the CLI
//! - [`cardano`]: node facade (queries, address resolution, scratch files)
//! - [`tx_builder`]: build options, fee estimation and the two-pass lifecycle
//! - [`funding`]: funding, staking, minting and wallet flows

pub mod cardano;
pub mod config;
pub mod endpoints;
pub mod errors;
pub mod funding;
pub mod invoker;
pub mod metrics;
pub mod observability;
pub mod structured_logging;
pub mod tx_builder;
pub mod utxo;
pub mod value;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use cardano::CardanoCli;
pub use config::{NodeSettings, ToolkitConfig};
pub use errors::{Result, ToolkitError};
pub use funding::Orchestrator;
pub use tx_builder::Tx;
pub use utxo::{Utxo, Utxos};
pub use value::{Asset, Quantity, Token, TokenBundle};
