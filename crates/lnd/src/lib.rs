//! LND REST client implementing the wallet and routing history capabilities.

mod client;
mod errors;
mod history;
mod wallet;
mod wire;

pub use client::LndClient;
pub use errors::LndError;
