//! Sync orchestrator
//!
//! Drives one reconciliation pass: works out the set of resources to look
//! at, normalizes what the remote holds, diffs it against the desired state
//! and applies the resulting operation, one resource at a time.

use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::Remote;
use super::split::CandidateSet;
use crate::desired::DesiredState;
use crate::error::SyncError;
use crate::models::{
    ActualRecord, DesiredRecord, NormalizedRecord, OutcomeStatus, ResourceKey, ResourceKind, SyncMode,
    SyncOutcome, SyncReport,
};
use crate::reconcile::{DiffOp, FieldMapping, Mappings, diff, normalize};

/// Options for a sync run
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Plan and report every operation without issuing writes
    pub dry_run: bool,
}

/// Shared flag asking a run to stop before its next resource
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Where the actual side of a resource comes from
enum ActualSource {
    /// Not present remotely
    Absent,
    /// The listing carried the record
    Listed(ActualRecord),
    /// Present but surplus; its contents do not matter
    Surplus,
    /// Present; the record needs its own read
    Fetch,
}

/// Reconciles desired state against a [`Remote`]
pub struct Orchestrator<'a> {
    remote: &'a mut dyn Remote,
    mappings: &'a Mappings,
    options: SyncOptions,
    stop: StopSignal,
}

impl<'a> Orchestrator<'a> {
    pub fn new(remote: &'a mut dyn Remote, mappings: &'a Mappings, options: SyncOptions) -> Self {
        Self {
            remote,
            mappings,
            options,
            stop: StopSignal::new(),
        }
    }

    /// Use an externally owned stop signal
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Reconcile every desired resource and every remote resource in the managed domains
    ///
    /// Remote resources with no desired record are deleted. The run aborts
    /// before any write if a listing cannot be completed. Kinds that cannot
    /// be listed are only reconciled where a desired record exists.
    pub fn full_sync(&mut self, desired: &DesiredState) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::new(SyncMode::Full, self.options.dry_run);

        info!(
            "Starting full sync of {} domain(s), {} desired resource(s)",
            desired.domains().len(),
            desired.len()
        );

        let mut listed: BTreeMap<ResourceKey, Option<ActualRecord>> = BTreeMap::new();
        for domain in desired.domains() {
            for kind in ResourceKind::LISTED {
                match self.remote.list(kind, domain) {
                    Ok(listing) => {
                        debug!("Listed {} {} resource(s) in {}", listing.len(), kind, domain);
                        listed.extend(
                            listing
                                .into_iter()
                                .map(|(identity, record)| (ResourceKey::new(kind, identity), record)),
                        );
                    }
                    Err(e) => {
                        error!("Listing {} resources in {} failed, aborting: {}", kind, domain, e);
                        report.abort(&e);
                        report.duration_ms = start.elapsed().as_millis() as u64;
                        return report;
                    }
                }
            }
        }

        let keys: BTreeSet<ResourceKey> = desired
            .records()
            .keys()
            .chain(listed.keys())
            .cloned()
            .collect();

        for key in keys {
            if self.stop_requested(&mut report) {
                break;
            }

            let wanted = desired.get(&key);
            // Unlisted kinds are read one by one
            let source = match listed.remove(&key) {
                None if key.kind.is_listed() => ActualSource::Absent,
                None => ActualSource::Fetch,
                Some(Some(record)) => ActualSource::Listed(record),
                Some(None) if wanted.is_none() => ActualSource::Surplus,
                Some(None) => ActualSource::Fetch,
            };

            let result = self.reconcile(&key, wanted, source, SyncMode::Full);
            if !self.record_result(&mut report, key, result) {
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!("Full sync finished in {} ms", report.duration_ms);
        report
    }

    /// Reconcile only the candidate resources
    ///
    /// Candidates with no desired record are reported as skipped; this pass
    /// never deletes.
    pub fn incremental_sync(&mut self, desired: &DesiredState, candidates: &CandidateSet) -> SyncReport {
        let start = Instant::now();
        let mut report = SyncReport::new(SyncMode::Incremental, self.options.dry_run);

        let (keys, unmatched) = candidates.resolve(desired);
        for identity in unmatched {
            warn!("Candidate {} has no desired record, ignoring", identity);
        }
        info!("Starting incremental sync of {} candidate(s)", keys.len());

        for key in keys {
            if self.stop_requested(&mut report) {
                break;
            }

            let Some(wanted) = desired.get(&key) else {
                debug!("{} is no longer desired, leaving it in place", key);
                report.push(SyncOutcome::skipped(
                    key,
                    "no longer desired; incremental passes never delete",
                ));
                continue;
            };

            let result = self.reconcile(&key, Some(wanted), ActualSource::Fetch, SyncMode::Incremental);
            if !self.record_result(&mut report, key, result) {
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!("Incremental sync finished in {} ms", report.duration_ms);
        report
    }

    fn stop_requested(&self, report: &mut SyncReport) -> bool {
        if self.stop.is_stopped() {
            warn!("Stop requested, ending run after {} resource(s)", report.outcomes.len());
            report.stopped = true;
            return true;
        }
        false
    }

    /// Record one resource's result; returns false when the run must end
    fn record_result(
        &self,
        report: &mut SyncReport,
        key: ResourceKey,
        result: Result<OutcomeStatus, SyncError>,
    ) -> bool {
        match result {
            Ok(status) => {
                report.push(SyncOutcome::new(key, status));
                true
            }
            Err(e) if e.is_fatal() => {
                error!("{}: {}, aborting run", key, e);
                report.push(SyncOutcome::failed(key, &e));
                report.abort(&e);
                false
            }
            Err(e) => {
                warn!("{}: {}", key, e);
                report.push(SyncOutcome::failed(key, &e));
                true
            }
        }
    }

    fn reconcile(
        &mut self,
        key: &ResourceKey,
        desired: Option<&DesiredRecord>,
        source: ActualSource,
        mode: SyncMode,
    ) -> Result<OutcomeStatus, SyncError> {
        let mapping = self.mappings.for_kind(key.kind);

        let actual = match source {
            ActualSource::Absent => None,
            ActualSource::Surplus => Some(NormalizedRecord::new()),
            ActualSource::Listed(raw) => Some(normalize(&raw, &key.identity, mapping)?),
            ActualSource::Fetch => match self.remote.fetch(key)? {
                Some(raw) => Some(normalize(&raw, &key.identity, mapping)?),
                None => None,
            },
        };

        let op = diff(desired, actual.as_ref(), &key.identity, mapping, mode)?;
        self.apply(key, op, mapping)
    }

    fn apply(
        &mut self,
        key: &ResourceKey,
        op: DiffOp,
        mapping: &FieldMapping,
    ) -> Result<OutcomeStatus, SyncError> {
        let prefix = if self.options.dry_run { "[dry run] " } else { "" };

        match &op {
            DiffOp::NoOp(_) => {
                debug!("{}: in sync", key);
                Ok(OutcomeStatus::Unchanged)
            }
            DiffOp::Create(_, payload) => {
                if let Some(field) = mapping
                    .required_on_create()
                    .iter()
                    .find(|field| !payload.contains_key(**field))
                {
                    return Err(SyncError::IncompleteRecord {
                        field: format!("{}/{}", key.identity, field),
                    });
                }
                info!("{}{} {}", prefix, key.kind, op);
                if !self.options.dry_run {
                    self.remote.create(key, payload)?;
                }
                Ok(OutcomeStatus::Created)
            }
            DiffOp::Update(_, changes) => {
                info!("{}{} {}", prefix, key.kind, op);
                if !self.options.dry_run {
                    self.remote.update(key, changes)?;
                }
                Ok(OutcomeStatus::Updated {
                    fields: changes.keys().cloned().collect(),
                })
            }
            DiffOp::Delete(_) => {
                info!("{}{} {}", prefix, key.kind, op);
                if !self.options.dry_run {
                    self.remote.delete(key)?;
                }
                Ok(OutcomeStatus::Deleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::hosted_mail_mappings;
    use crate::sync::{InMemoryRemote, RemoteWrite};
    use serde_json::{Value, json};

    fn key(s: &str) -> ResourceKey {
        ResourceKey::parse(s).unwrap()
    }

    fn record(value: Value) -> DesiredRecord {
        serde_json::from_value(value).unwrap()
    }

    fn desired() -> DesiredState {
        let mut state = DesiredState::default();
        state.insert(
            key("account:ann@x.com"),
            record(json!({"enabled": true, "size": 25600, "password": "Secret1!"})),
        );
        state.insert(
            key("account:bob@x.com"),
            record(json!({"enabled": true, "size": 2048, "displayName": "Bob"})),
        );
        state.insert(key("alias:info@x.com"), record(json!({"aliasEmails": "ann@x.com"})));
        state
    }

    fn remote() -> InMemoryRemote {
        InMemoryRemote::new()
            .with_record(
                key("account:bob@x.com"),
                json!({"enabled": "true", "size": 1024, "displayName": "Bob", "name": "bob"}),
            )
            .with_record(
                key("account:old@x.com"),
                json!({"enabled": true, "size": 1024}),
            )
            .with_record(
                key("alias:info@x.com"),
                json!({"numberOfMembers": 1, "singleMemberName": "Ann@x.com"}),
            )
    }

    fn status(report: &SyncReport, k: &str) -> OutcomeStatus {
        report.outcome(&key(k)).unwrap().status.clone()
    }

    #[test]
    fn test_full_sync_converges() {
        let mappings = hosted_mail_mappings().unwrap();
        let state = desired();
        let mut remote = remote();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);

        assert!(report.is_clean(), "{}", report);
        assert_eq!(status(&report, "account:ann@x.com"), OutcomeStatus::Created);
        assert_eq!(
            status(&report, "account:bob@x.com"),
            OutcomeStatus::Updated {
                fields: vec!["size".into()]
            }
        );
        assert_eq!(status(&report, "account:old@x.com"), OutcomeStatus::Deleted);
        assert_eq!(status(&report, "alias:info@x.com"), OutcomeStatus::Unchanged);

        assert!(remote.contains(&key("account:ann@x.com")));
        assert!(!remote.contains(&key("account:old@x.com")));
        assert_eq!(remote.record(&key("account:bob@x.com")).unwrap()["size"], json!(2048));
    }

    #[test]
    fn test_full_sync_is_idempotent() {
        let mappings = hosted_mail_mappings().unwrap();
        let state = desired();
        let mut remote = remote();

        Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        let writes = remote.writes().len();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        assert_eq!(report.stats().unchanged, 3);
        assert_eq!(remote.writes().len(), writes);
    }

    #[test]
    fn test_outcomes_follow_key_order() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&desired());
        let order: Vec<String> = report.outcomes.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "account:ann@x.com",
                "account:bob@x.com",
                "account:old@x.com",
                "alias:info@x.com"
            ]
        );
    }

    #[test]
    fn test_dry_run_issues_no_writes() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();

        let report =
            Orchestrator::new(&mut remote, &mappings, SyncOptions { dry_run: true }).full_sync(&desired());

        assert!(report.dry_run);
        assert_eq!(report.stats().created, 1);
        assert_eq!(report.stats().deleted, 1);
        assert!(remote.writes().is_empty());
        assert!(remote.contains(&key("account:old@x.com")));
    }

    #[test]
    fn test_incremental_never_deletes() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        let candidates = CandidateSet::parse(["bob@x.com", "account:old@x.com"]).unwrap();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default())
            .incremental_sync(&desired(), &candidates);

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(status(&report, "account:bob@x.com"), OutcomeStatus::Updated { .. }));
        assert!(matches!(status(&report, "account:old@x.com"), OutcomeStatus::Skipped { .. }));
        assert!(remote.contains(&key("account:old@x.com")));
        assert!(report.outcome(&key("account:ann@x.com")).is_none());
    }

    #[test]
    fn test_recoverable_failure_continues() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        remote.fail_on(key("account:bob@x.com"), SyncError::RateLimited { attempts: 6 });

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&desired());

        assert!(report.outcome(&key("account:bob@x.com")).unwrap().is_failure());
        assert_eq!(status(&report, "account:old@x.com"), OutcomeStatus::Deleted);
        assert_eq!(report.outcomes.len(), 4);
        assert!(report.aborted.is_none());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_fatal_failure_aborts() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        remote.fail_on(
            key("account:bob@x.com"),
            SyncError::Unauthorized("bad signature".into()),
        );

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&desired());

        assert_eq!(report.outcomes.len(), 2);
        assert!(report.aborted.is_some());
        assert!(remote.contains(&key("account:old@x.com")));
    }

    #[test]
    fn test_listing_failure_aborts_before_writes() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        remote.fail_listing(
            ResourceKind::Alias,
            "x.com",
            SyncError::Transport {
                attempts: 3,
                message: "connection reset".into(),
            },
        );

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&desired());

        assert!(report.outcomes.is_empty());
        assert!(report.aborted.is_some());
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn test_create_without_required_field() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut state = DesiredState::default();
        state.insert(key("account:new@x.com"), record(json!({"size": 1024})));
        let mut remote = InMemoryRemote::new();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);

        let outcome = report.outcome(&key("account:new@x.com")).unwrap();
        assert!(outcome.to_string().contains("new@x.com/password"));
        assert!(report.aborted.is_none());
        assert!(remote.writes().is_empty());
    }

    #[test]
    fn test_stop_before_first_resource() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        let stop = StopSignal::new();
        stop.stop();

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default())
            .with_stop(stop)
            .full_sync(&desired());

        assert!(report.stopped);
        assert!(report.outcomes.is_empty());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_spam_resources_fetched_not_listed() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut state = desired();
        state.insert(
            key("spam:bob@x.com"),
            record(json!({
                "filterLevel": "on",
                "rsEmail.spamHandling": "toFolder",
                "rsEmail.hasFolderCleaner": true,
                "rsEmail.spamFolderAgeLimit": 14,
                "rsEmail.spamFolderNumLimit": 250
            })),
        );
        state.insert(key("safelist:bob@x.com"), record(json!({"addresses": "@partner.com"})));

        let mut remote = remote().with_record(
            key("spam:bob@x.com"),
            json!({
                "filterLevel": "on",
                "rsEmail.spamHandling": "toFolder",
                "rsEmail.hasFolderCleaner": "true",
                "rsEmail.spamFolderAgeLimit": 7,
                "rsEmail.spamFolderNumLimit": 250,
                "rsEmail.spamForwardingAddress": ""
            }),
        );
        remote.fail_listing(
            ResourceKind::SpamSettings,
            "x.com",
            SyncError::InvariantViolation("spam settings cannot be listed".into()),
        );

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        assert!(report.is_clean(), "{}", report);

        // The settings endpoint gets every setting, not just the one that moved
        match status(&report, "spam:bob@x.com") {
            OutcomeStatus::Updated { fields } => assert_eq!(fields.len(), 5),
            other => panic!("expected update, got {:?}", other),
        }
        assert_eq!(status(&report, "safelist:bob@x.com"), OutcomeStatus::Created);
        assert!(remote.fetches().contains(&key("spam:bob@x.com")));

        let again = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        assert_eq!(status(&again, "spam:bob@x.com"), OutcomeStatus::Unchanged);
        assert_eq!(status(&again, "safelist:bob@x.com"), OutcomeStatus::Unchanged);
    }

    #[test]
    fn test_dropped_account_field_is_cleared() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut state = DesiredState::default();
        state.insert(
            key("account:bob@x.com"),
            record(json!({"enabled": true, "size": 1024})),
        );
        let mut remote = InMemoryRemote::new().with_record(
            key("account:bob@x.com"),
            json!({
                "enabled": true,
                "size": 1024,
                "displayName": "Stale Name",
                "enableForwardingAddresses": "old@y.com"
            }),
        );

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        assert_eq!(
            status(&report, "account:bob@x.com"),
            OutcomeStatus::Updated {
                fields: vec!["displayName".into(), "enableForwardingAddresses".into()]
            }
        );

        let again = Orchestrator::new(&mut remote, &mappings, SyncOptions::default()).full_sync(&state);
        assert_eq!(status(&again, "account:bob@x.com"), OutcomeStatus::Unchanged);
    }

    /// Raises the stop signal from inside the run, as an interrupt would
    struct InterruptingRemote {
        inner: InMemoryRemote,
        stop: StopSignal,
    }

    impl Remote for InterruptingRemote {
        fn list(&mut self, kind: ResourceKind, domain: &str) -> Result<crate::sync::Listing, SyncError> {
            self.inner.list(kind, domain)
        }

        fn fetch(&mut self, key: &ResourceKey) -> Result<Option<ActualRecord>, SyncError> {
            self.stop.stop();
            self.inner.fetch(key)
        }

        fn create(&mut self, key: &ResourceKey, record: &NormalizedRecord) -> Result<(), SyncError> {
            self.inner.create(key, record)
        }

        fn update(&mut self, key: &ResourceKey, changes: &NormalizedRecord) -> Result<(), SyncError> {
            self.inner.update(key, changes)
        }

        fn delete(&mut self, key: &ResourceKey) -> Result<(), SyncError> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_stop_mid_run_finishes_current_resource() {
        let mappings = hosted_mail_mappings().unwrap();
        let stop = StopSignal::new();
        let mut remote = InterruptingRemote {
            inner: remote(),
            stop: stop.clone(),
        };

        let report = Orchestrator::new(&mut remote, &mappings, SyncOptions::default())
            .with_stop(stop)
            .full_sync(&desired());

        // ann is created without a read; bob's read raises the signal but
        // bob's update still completes before the run ends
        assert!(report.stopped);
        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(status(&report, "account:bob@x.com"), OutcomeStatus::Updated { .. }));
        assert_eq!(remote.inner.record(&key("account:bob@x.com")).unwrap()["size"], json!(2048));
        assert!(remote.inner.contains(&key("account:old@x.com")));
    }

    #[test]
    fn test_update_payload_is_minimal() {
        let mappings = hosted_mail_mappings().unwrap();
        let mut remote = remote();
        let candidates = CandidateSet::parse(["account:bob@x.com"]).unwrap();

        Orchestrator::new(&mut remote, &mappings, SyncOptions::default())
            .incremental_sync(&desired(), &candidates);

        let expected: NormalizedRecord = record(json!({"size": 2048}));
        assert_eq!(
            remote.writes(),
            &[RemoteWrite::Update(key("account:bob@x.com"), expected)]
        );
        assert_eq!(remote.fetches(), &[key("account:bob@x.com")]);
    }
}
