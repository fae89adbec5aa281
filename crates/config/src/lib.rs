//! Configuration of the peg-in daemon.

mod config;
pub mod errors;
pub mod overrides;

pub use config::*;
pub use errors::ConfigError;
pub use overrides::{apply_override, load_config, parse_override};
