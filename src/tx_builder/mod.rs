//! Transaction assembly
//!
//! The pieces stack leaf-first:
//! - **options**: validated `build-raw` options and their argument vector
//! - **builder**: build, sign and submit through the CLI
//! - **fee**: minimum fee estimation and the protocol parameter cache
//! - **tx**: transaction id derivation from the CBOR envelope
//! - **lifecycle**: the two-pass build, fee, sign, submit state machine

pub mod builder;
pub mod fee;
pub mod lifecycle;
pub mod options;
pub mod tx;

pub use builder::{SigningKey, TxBuilder};
pub use fee::{FeeEstimator, FeeShape};
pub use lifecycle::{LifecycleState, MintSpec, Output, TxDraft, TxLifecycle};
pub use options::{BuildOptions, BuildOptionsBuilder, TxIn, TxOut};
pub use tx::Tx;
