//! Reconciliation runs
//!
//! The orchestrator drives full and incremental passes against any
//! [`Remote`]; the split ledger supplies incremental candidates.

mod memory;
mod orchestrator;
mod remote;
mod split;

pub use memory::{InMemoryRemote, RemoteWrite};
pub use orchestrator::{Orchestrator, StopSignal, SyncOptions};
pub use remote::{Listing, Remote};
pub use split::{CandidateSet, SplitLedger, fingerprint};
