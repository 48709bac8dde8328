//! Incremental candidate selection
//!
//! The split ledger remembers a fingerprint of every desired record that
//! was last reconciled successfully. Records whose fingerprint changed, new
//! records, and records no longer desired become the candidates of the next
//! incremental pass.

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::desired::DesiredState;
use crate::models::{DesiredRecord, IdentityError, ResourceIdentity, ResourceKey, ResourceKind, SyncReport};

/// Identities an incremental pass should look at
///
/// Entries are either a specific resource (`alias:info@example.com`) or a
/// bare address, which covers every kind desired under that address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    keys: BTreeSet<ResourceKey>,
    identities: BTreeSet<ResourceIdentity>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `kind:address` or a bare address
    pub fn parse_entry(&mut self, entry: &str) -> Result<(), IdentityError> {
        if let Some(key) = ResourceKey::parse(entry.trim()) {
            self.keys.insert(key);
        } else {
            self.identities.insert(ResourceIdentity::parse(entry)?);
        }
        Ok(())
    }

    pub fn parse<'a>(entries: impl IntoIterator<Item = &'a str>) -> Result<Self, IdentityError> {
        let mut set = Self::new();
        for entry in entries {
            set.parse_entry(entry)?;
        }
        Ok(set)
    }

    pub fn insert_key(&mut self, key: ResourceKey) {
        self.keys.insert(key);
    }

    pub fn insert_identity(&mut self, identity: ResourceIdentity) {
        self.identities.insert(identity);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len() + self.identities.len()
    }

    /// Explicit resource entries
    pub fn keys(&self) -> &BTreeSet<ResourceKey> {
        &self.keys
    }

    /// Expand into concrete keys in processing order
    ///
    /// Bare addresses expand to the kinds desired under them; addresses with
    /// no desired record at all are returned separately.
    pub fn resolve(&self, desired: &DesiredState) -> (BTreeSet<ResourceKey>, Vec<ResourceIdentity>) {
        let mut keys = self.keys.clone();
        let mut unmatched = Vec::new();

        for identity in &self.identities {
            let matched: Vec<ResourceKey> = ResourceKind::ALL
                .iter()
                .map(|&kind| ResourceKey::new(kind, identity.clone()))
                .filter(|key| desired.contains(key))
                .collect();
            if matched.is_empty() {
                unmatched.push(identity.clone());
            }
            keys.extend(matched);
        }

        (keys, unmatched)
    }
}

/// Stable fingerprint of a desired record: SHA-1 over its canonical JSON
pub fn fingerprint(record: &DesiredRecord) -> String {
    // BTreeMap serializes with sorted keys, so equal records hash equally
    let canonical = serde_json::to_string(record).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fingerprints of the last successfully reconciled desired records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitLedger {
    #[serde(default = "SplitLedger::current_version")]
    pub version: u32,
    /// `kind:identity` to fingerprint
    #[serde(default)]
    pub fingerprints: BTreeMap<String, String>,
}

impl SplitLedger {
    const VERSION: u32 = 1;

    fn current_version() -> u32 {
        Self::VERSION
    }

    pub fn new() -> Self {
        Self {
            version: Self::VERSION,
            fingerprints: BTreeMap::new(),
        }
    }

    /// Load a ledger, or start an empty one if the file does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        config::load_json_file(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Resources that are new, changed or no longer desired since the last record
    pub fn changed(&self, desired: &DesiredState) -> CandidateSet {
        let mut candidates = CandidateSet::new();

        for (key, record) in desired.records() {
            if self.fingerprints.get(&key.to_string()) != Some(&fingerprint(record)) {
                candidates.insert_key(key.clone());
            }
        }

        for entry in self.fingerprints.keys() {
            match ResourceKey::parse(entry) {
                Some(key) if !desired.contains(&key) => candidates.insert_key(key),
                Some(_) => {}
                None => warn!("Ignoring unreadable ledger entry {}", entry),
            }
        }

        candidates
    }

    /// Fold a run's outcomes into the ledger
    ///
    /// Successful resources take their current fingerprint; resources that
    /// were deleted or are no longer desired are forgotten; failures keep
    /// their old entry so they stay candidates.
    pub fn record(&mut self, desired: &DesiredState, report: &SyncReport) {
        if report.dry_run {
            return;
        }

        for outcome in &report.outcomes {
            let entry = outcome.key.to_string();
            match desired.get(&outcome.key) {
                Some(record) if outcome.is_success() => {
                    self.fingerprints.insert(entry, fingerprint(record));
                }
                None if !outcome.is_failure() => {
                    self.fingerprints.remove(&entry);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::{OutcomeStatus, SyncMode, SyncOutcome};
    use serde_json::json;
    use tempfile::TempDir;

    fn key(s: &str) -> ResourceKey {
        ResourceKey::parse(s).unwrap()
    }

    fn record(value: serde_json::Value) -> DesiredRecord {
        serde_json::from_value(value).unwrap()
    }

    fn desired() -> DesiredState {
        let mut state = DesiredState::default();
        state.insert(key("account:a@x.com"), record(json!({"enabled": true, "size": 25600})));
        state.insert(key("alias:info@x.com"), record(json!({"aliasEmails": "a@x.com"})));
        state
    }

    #[test]
    fn test_fingerprint_is_canonical_sha1() {
        let fp = fingerprint(&record(json!({"size": 25600, "enabled": true})));
        assert_eq!(fp, "05246efb5180e90d2b10b565cf5bd8a2621d2a35");
    }

    #[test]
    fn test_parse_candidates() {
        let set = CandidateSet::parse(["alias:Info@x.com", "b@x.com"]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.keys().contains(&key("alias:info@x.com")));
        assert!(CandidateSet::parse(["not an address"]).is_err());
    }

    #[test]
    fn test_resolve_expands_bare_addresses() {
        let set = CandidateSet::parse(["a@x.com", "info@x.com", "ghost@x.com"]).unwrap();
        let (keys, unmatched) = set.resolve(&desired());

        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["account:a@x.com", "alias:info@x.com"]);
        assert_eq!(unmatched, vec![ResourceIdentity::parse("ghost@x.com").unwrap()]);
    }

    #[test]
    fn test_changed_detects_new_modified_and_removed() {
        let state = desired();
        let mut ledger = SplitLedger::new();
        assert_eq!(ledger.changed(&state).len(), 2);

        ledger.fingerprints.insert(
            "account:a@x.com".into(),
            fingerprint(state.get(&key("account:a@x.com")).unwrap()),
        );
        ledger.fingerprints.insert("alias:info@x.com".into(), "stale".into());
        ledger.fingerprints.insert("account:gone@x.com".into(), "old".into());

        let changed = ledger.changed(&state);
        assert_eq!(
            changed.keys().iter().cloned().collect::<Vec<_>>(),
            vec![key("account:gone@x.com"), key("alias:info@x.com")]
        );
    }

    #[test]
    fn test_record_keeps_failures_as_candidates() {
        let state = desired();
        let mut ledger = SplitLedger::new();
        ledger.fingerprints.insert("account:gone@x.com".into(), "old".into());

        let mut report = SyncReport::new(SyncMode::Incremental, false);
        report.push(SyncOutcome::new(key("account:a@x.com"), OutcomeStatus::Updated { fields: vec![] }));
        report.push(SyncOutcome::failed(
            key("alias:info@x.com"),
            &SyncError::RateLimited { attempts: 6 },
        ));
        report.push(SyncOutcome::skipped(key("account:gone@x.com"), "no longer desired"));
        ledger.record(&state, &report);

        assert!(ledger.fingerprints.contains_key("account:a@x.com"));
        assert!(!ledger.fingerprints.contains_key("alias:info@x.com"));
        assert!(!ledger.fingerprints.contains_key("account:gone@x.com"));

        let changed = ledger.changed(&state);
        assert_eq!(changed.keys().len(), 1);
        assert!(changed.keys().contains(&key("alias:info@x.com")));
    }

    #[test]
    fn test_dry_run_does_not_record() {
        let state = desired();
        let mut ledger = SplitLedger::new();
        let mut report = SyncReport::new(SyncMode::Full, true);
        report.push(SyncOutcome::new(key("account:a@x.com"), OutcomeStatus::Created));

        ledger.record(&state, &report);
        assert!(ledger.fingerprints.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/ledger.json");

        assert_eq!(SplitLedger::load(&path).unwrap(), SplitLedger::new());

        let mut ledger = SplitLedger::new();
        ledger.fingerprints.insert("account:a@x.com".into(), "abc".into());
        ledger.save(&path).unwrap();

        assert_eq!(SplitLedger::load(&path).unwrap(), ledger);
    }
}
