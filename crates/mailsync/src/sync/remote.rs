//! The remote side of a reconciliation run

use std::collections::BTreeMap;

use crate::error::SyncError;
use crate::models::{ActualRecord, NormalizedRecord, ResourceIdentity, ResourceKey, ResourceKind};

/// Result of listing one kind of resource in one domain
///
/// A value is present when the listing row already carries the whole
/// record; otherwise the record has to be fetched.
pub type Listing = BTreeMap<ResourceIdentity, Option<ActualRecord>>;

/// Operations the orchestrator needs from the remote API
///
/// Methods take `&mut self` because implementations own per-run state such
/// as the rate-limit history.
pub trait Remote {
    /// Every resource of `kind` in `domain`
    fn list(&mut self, kind: ResourceKind, domain: &str) -> Result<Listing, SyncError>;

    /// Read one resource; `None` when it does not exist
    fn fetch(&mut self, key: &ResourceKey) -> Result<Option<ActualRecord>, SyncError>;

    fn create(&mut self, key: &ResourceKey, record: &NormalizedRecord) -> Result<(), SyncError>;

    /// Send only the changed fields
    fn update(&mut self, key: &ResourceKey, changes: &NormalizedRecord) -> Result<(), SyncError>;

    fn delete(&mut self, key: &ResourceKey) -> Result<(), SyncError>;
}
