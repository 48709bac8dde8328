//! In-memory remote
//!
//! Used for testing the orchestrator without a network. Records are stored
//! flat, the way the write endpoints accept them, and listings name every
//! stored resource without carrying its record.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::{Listing, Remote};
use crate::error::SyncError;
use crate::models::{ActualRecord, NormalizedRecord, ResourceKey, ResourceKind};

/// A write the remote received
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    Create(ResourceKey, NormalizedRecord),
    Update(ResourceKey, NormalizedRecord),
    Delete(ResourceKey),
}

impl RemoteWrite {
    pub fn key(&self) -> &ResourceKey {
        match self {
            RemoteWrite::Create(key, _) | RemoteWrite::Update(key, _) | RemoteWrite::Delete(key) => key,
        }
    }
}

/// [`Remote`] backed by a map, with failure injection
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    records: BTreeMap<ResourceKey, ActualRecord>,
    writes: Vec<RemoteWrite>,
    fetches: Vec<ResourceKey>,
    failures: HashMap<ResourceKey, SyncError>,
    listing_failures: HashMap<(ResourceKind, String), SyncError>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record in read shape (nested or flat)
    pub fn insert(&mut self, key: ResourceKey, record: ActualRecord) {
        self.records.insert(key, record);
    }

    pub fn with_record(mut self, key: ResourceKey, record: ActualRecord) -> Self {
        self.insert(key, record);
        self
    }

    /// Make every operation on `key` fail with `error`
    pub fn fail_on(&mut self, key: ResourceKey, error: SyncError) {
        self.failures.insert(key, error);
    }

    /// Make listing `kind` in `domain` fail with `error`
    pub fn fail_listing(&mut self, kind: ResourceKind, domain: &str, error: SyncError) {
        self.listing_failures.insert((kind, domain.to_string()), error);
    }

    pub fn record(&self, key: &ResourceKey) -> Option<&ActualRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.records.contains_key(key)
    }

    /// Writes received so far, in order
    pub fn writes(&self) -> &[RemoteWrite] {
        &self.writes
    }

    /// Keys fetched so far, in order
    pub fn fetches(&self) -> &[ResourceKey] {
        &self.fetches
    }

    fn check(&self, key: &ResourceKey) -> Result<(), SyncError> {
        match self.failures.get(key) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn to_object(record: &NormalizedRecord) -> Map<String, Value> {
    record.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

impl Remote for InMemoryRemote {
    fn list(&mut self, kind: ResourceKind, domain: &str) -> Result<Listing, SyncError> {
        if let Some(error) = self.listing_failures.get(&(kind, domain.to_string())) {
            return Err(error.clone());
        }

        Ok(self
            .records
            .keys()
            .filter(|key| key.kind == kind && key.identity.domain() == domain)
            .map(|key| (key.identity.clone(), None))
            .collect())
    }

    fn fetch(&mut self, key: &ResourceKey) -> Result<Option<ActualRecord>, SyncError> {
        self.check(key)?;
        self.fetches.push(key.clone());
        Ok(self.records.get(key).cloned())
    }

    fn create(&mut self, key: &ResourceKey, record: &NormalizedRecord) -> Result<(), SyncError> {
        self.check(key)?;
        if self.records.contains_key(key) {
            return Err(SyncError::Rejected {
                status: 409,
                body: format!("{} already exists", key),
            });
        }
        self.records.insert(key.clone(), Value::Object(to_object(record)));
        self.writes.push(RemoteWrite::Create(key.clone(), record.clone()));
        Ok(())
    }

    fn update(&mut self, key: &ResourceKey, changes: &NormalizedRecord) -> Result<(), SyncError> {
        self.check(key)?;
        let Some(Value::Object(existing)) = self.records.get_mut(key) else {
            return Err(SyncError::Rejected {
                status: 404,
                body: format!("{} not found", key),
            });
        };
        existing.extend(to_object(changes));
        self.writes.push(RemoteWrite::Update(key.clone(), changes.clone()));
        Ok(())
    }

    fn delete(&mut self, key: &ResourceKey) -> Result<(), SyncError> {
        self.check(key)?;
        self.records.remove(key);
        self.writes.push(RemoteWrite::Delete(key.clone()));
        Ok(())
    }
}
