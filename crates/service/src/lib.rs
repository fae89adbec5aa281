//! Lifecycle of a single outbound peg-in.
//!
//! [`PeginService`] starts a peg-in and raises its fee while it waits in the mempool.
//! [`PeginMonitor`] polls its depth and claims it on the side chain once it is buried deep
//! enough. The pending peg-in survives restarts through a [`PeginStore`].

pub mod claim;
pub mod errors;
pub mod history;
pub mod monitor;
pub mod service;
pub mod state;

pub use claim::{ClaimBackend, ClaimError, ClaimOutcome, ClaimStage, PeginAddress};
pub use errors::PeginError;
pub use history::{
    ChannelStats, ForwardingEvent, ForwardingHistorySource, ForwardingLog, ForwardingPage,
    HistoryError,
};
pub use monitor::{PeginMonitor, TickOutcome};
pub use service::{PeginService, PeginStatus, StartRequest};
pub use state::{JsonFileStore, MemoryStore, PeginState, PeginStore, StoreError};
