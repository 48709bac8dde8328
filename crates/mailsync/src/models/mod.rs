//! Domain models for reconciliation

mod identity;
mod outcome;
mod record;

pub use identity::{IdentityError, ResourceIdentity};
pub use outcome::{FatalError, OutcomeStatus, SyncOutcome, SyncReport, SyncStats};
pub use record::{
    ActualRecord, DesiredRecord, NormalizedRecord, ResourceKey, ResourceKind, SyncMode,
    value_type_name,
};
