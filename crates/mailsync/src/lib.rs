//! Mailsync crate - Declarative reconciliation of hosted mail accounts
//!
//! This crate provides the engine that converges a hosted mail service onto
//! a desired state described in configuration:
//! - Domain models (ResourceIdentity, ResourceKey, SyncOutcome, SyncReport)
//! - Mapping tables (accounts, aliases, spam settings and ACLs), the shape
//!   normalizer and the diff engine
//! - A rate-limited transport with throttling disambiguation
//! - The hosted mail admin API client
//! - Full and incremental sync orchestration, with a split ledger for candidates
//!
//! The crate has no UI or async runtime dependencies; a run is sequential
//! per resource.

pub mod config;
pub mod desired;
pub mod error;
pub mod models;
pub mod rackspace;
pub mod reconcile;
pub mod sync;
pub mod transport;

pub use config::SyncConfig;
pub use desired::{DesiredState, DesiredStateBuilder, DomainDocument};
pub use error::{ErrorKind, SyncError};
pub use models::{
    ActualRecord, DesiredRecord, IdentityError, NormalizedRecord, OutcomeStatus, ResourceIdentity,
    ResourceKey, ResourceKind, SyncMode, SyncOutcome, SyncReport, SyncStats,
};
pub use rackspace::{ApiSigner, RackspaceClient};
pub use reconcile::{DiffOp, FieldMapping, Mappings, diff, hosted_mail_mappings, normalize};
pub use sync::{
    CandidateSet, InMemoryRemote, Orchestrator, Remote, SplitLedger, StopSignal, SyncOptions,
};
pub use transport::{RateLimits, RetryPolicy, Transport};
