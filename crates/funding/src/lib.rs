//! Funding, locking and fee escalation for outbound peg-in transactions.
//!
//! The wallet itself (keys, signing, coin selection, lock table) lives in the node behind
//! [`WalletBackend`]. This crate decides which outputs to reserve, how to shape the
//! funding template, when to give leases back and how to push a stuck transaction
//! through, either by replacing it or by attaching a child.

pub mod backend;
pub mod broadcast;
pub mod capability;
pub mod confirmations;
pub mod errors;
pub mod escalation;
pub mod fee;
pub mod locks;
pub mod psbt;
pub mod sender;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{BackendError, WalletBackend};
pub use capability::{BackendVersion, CapabilityCache};
pub use errors::{FundingError, FundingResult};
pub use escalation::{BumpOutcome, BumpRequest};
pub use sender::FundingEngine;
pub use types::*;
