//! Treasury funding, staking and minting
//!
//! - **retry**: retry policy for the transient funding race
//! - **wallet**: wallet key material and file layout
//! - **orchestrator**: the user-facing flows

pub mod orchestrator;
pub mod retry;
pub mod wallet;

pub use orchestrator::{
    validate_quantity, DelegationLevel, MintReceipt, Orchestrator, WalletReceipt,
};
pub use retry::{cancellable_sleep, retry_transient, RetryPolicy};
pub use wallet::{validate_wallet_name, WalletStore};
