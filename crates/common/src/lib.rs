//! Pieces shared by the peg-in daemon crates.

pub mod logging;
