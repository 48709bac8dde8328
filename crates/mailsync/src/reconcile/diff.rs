//! Diff engine
//!
//! Compares a desired record with the normalized actual record for the same
//! identity and decides the single operation that converges them.

use serde_json::Value;
use std::fmt;

use super::mapping::{FieldMapping, parse_bool};
use crate::error::SyncError;
use crate::models::{NormalizedRecord, ResourceIdentity, SyncMode};

/// Operation planned for one resource
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOp {
    /// Resource is missing remotely; payload is the full desired record
    Create(ResourceIdentity, NormalizedRecord),
    /// Payload holds only the fields whose values differ
    Update(ResourceIdentity, NormalizedRecord),
    Delete(ResourceIdentity),
    NoOp(ResourceIdentity),
}

impl DiffOp {
    pub fn identity(&self) -> &ResourceIdentity {
        match self {
            DiffOp::Create(id, _) | DiffOp::Update(id, _) | DiffOp::Delete(id) | DiffOp::NoOp(id) => id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiffOp::Create(..) => "create",
            DiffOp::Update(..) => "update",
            DiffOp::Delete(_) => "delete",
            DiffOp::NoOp(_) => "no-op",
        }
    }

    /// Whether applying this operation issues a write
    pub fn is_write(&self) -> bool {
        !matches!(self, DiffOp::NoOp(_))
    }
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffOp::Create(id, payload) | DiffOp::Update(id, payload) => {
                let fields: Vec<&str> = payload.keys().map(String::as_str).collect();
                write!(f, "{} {} [{}]", self.name(), id, fields.join(", "))
            }
            DiffOp::Delete(id) | DiffOp::NoOp(id) => write!(f, "{} {}", self.name(), id),
        }
    }
}

/// Decide the operation for one identity
///
/// Every desired key is compared, and a key the remote lacks counts as
/// changed. A field the desired record omits is compared against its reset
/// value when the table declares one, so dropping a field from configuration
/// clears it remotely; fields without a reset value are left alone.
/// Write-only fields are sent on create and never compared.
///
/// # Errors
/// `InvariantViolation` when neither side is present.
pub fn diff(
    desired: Option<&NormalizedRecord>,
    actual: Option<&NormalizedRecord>,
    identity: &ResourceIdentity,
    mapping: &FieldMapping,
    mode: SyncMode,
) -> Result<DiffOp, SyncError> {
    match (desired, actual) {
        (None, None) => Err(SyncError::InvariantViolation(format!(
            "diff for {} has neither a desired nor an actual record",
            identity
        ))),
        (Some(desired), None) => Ok(DiffOp::Create(identity.clone(), desired.clone())),
        (None, Some(_)) => {
            if mode.allows_delete() {
                Ok(DiffOp::Delete(identity.clone()))
            } else {
                Ok(DiffOp::NoOp(identity.clone()))
            }
        }
        (Some(desired), Some(actual)) => {
            let mut changed: NormalizedRecord = desired
                .iter()
                .filter(|(key, _)| !mapping.is_write_only(key))
                .filter(|(key, value)| match actual.get(*key) {
                    Some(current) => !values_equal(value, current, mapping.is_coercible(key)),
                    None => true,
                })
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            for spec in mapping.write_fields() {
                if spec.write_only || desired.contains_key(spec.write_name) {
                    continue;
                }
                let (Some(reset), Some(current)) = (spec.reset_value(), actual.get(spec.write_name)) else {
                    continue;
                };
                if !values_equal(&reset, current, spec.coercible) {
                    changed.insert(spec.write_name.to_string(), reset);
                }
            }

            if changed.is_empty() {
                return Ok(DiffOp::NoOp(identity.clone()));
            }

            if mapping.sends_full_updates() {
                let mut payload: NormalizedRecord = desired
                    .iter()
                    .filter(|(key, _)| !mapping.is_write_only(key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                payload.extend(changed);
                return Ok(DiffOp::Update(identity.clone(), payload));
            }

            Ok(DiffOp::Update(identity.clone(), changed))
        }
    }
}

/// Compare two field values, allowing scalar representations to match for coercible fields
pub fn values_equal(a: &Value, b: &Value, coercible: bool) -> bool {
    if a == b {
        return true;
    }
    if !coercible {
        return false;
    }
    match (canonical_scalar(a), canonical_scalar(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn canonical_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(
            parse_bool(s)
                .map(|b| b.to_string())
                .unwrap_or_else(|| s.trim().to_string()),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::tables::{account_mapping, spam_settings_mapping};
    use serde_json::json;

    fn id(addr: &str) -> ResourceIdentity {
        ResourceIdentity::parse(addr).unwrap()
    }

    fn record(value: Value) -> NormalizedRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_when_actual_missing() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"size": 25600, "password": "Secret1!"}));

        let op = diff(Some(&desired), None, &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::Create(id("a@x.com"), desired));
    }

    #[test]
    fn test_delete_only_in_full_mode() {
        let mapping = account_mapping().unwrap();
        let actual = record(json!({"enabled": true}));

        let op = diff(None, Some(&actual), &id("b@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::Delete(id("b@x.com")));

        let op = diff(None, Some(&actual), &id("b@x.com"), &mapping, SyncMode::Incremental).unwrap();
        assert_eq!(op, DiffOp::NoOp(id("b@x.com")));
    }

    #[test]
    fn test_both_absent_is_invariant_violation() {
        let mapping = account_mapping().unwrap();
        let err = diff(None, None, &id("a@x.com"), &mapping, SyncMode::Full).unwrap_err();
        assert!(matches!(err, SyncError::InvariantViolation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_update_holds_only_changed_fields() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({
            "displayName": "Ann",
            "firstName": "Ann",
            "size": 2048,
            "enableForwardingAddresses": ""
        }));
        let actual = record(json!({
            "displayName": "Ann",
            "firstName": "Anne",
            "size": 2048,
            "lastLogin": "yesterday"
        }));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(
            op,
            DiffOp::Update(
                id("a@x.com"),
                record(json!({"firstName": "Ann", "enableForwardingAddresses": ""}))
            )
        );
    }

    #[test]
    fn test_coercible_fields_compare_canonically() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"enabled": true, "visibleInExchangeGAL": false}));
        let actual = record(json!({"enabled": "true", "visibleInExchangeGAL": "False"}));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::NoOp(id("a@x.com")));
    }

    #[test]
    fn test_strict_fields_do_not_coerce() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"displayName": "true"}));
        let actual = record(json!({"displayName": true}));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert!(matches!(op, DiffOp::Update(_, ref payload) if payload.contains_key("displayName")));
    }

    #[test]
    fn test_write_only_fields_never_compared() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"password": "Secret1!", "size": 100}));
        let actual = record(json!({"size": 100}));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::NoOp(id("a@x.com")));
    }

    #[test]
    fn test_dropped_fields_are_cleared() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"enabled": true, "size": 2048}));
        let actual = record(json!({
            "enabled": "true",
            "size": 2048,
            "displayName": "Stale Name",
            "title": "",
            "enableForwardingAddresses": "old@y.com",
            "saveForwardedEmail": "true"
        }));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(
            op,
            DiffOp::Update(
                id("a@x.com"),
                record(json!({
                    "displayName": "",
                    "enableForwardingAddresses": "",
                    "saveForwardedEmail": false
                }))
            )
        );

        // Once cleared, nothing is left to do
        let cleared = record(json!({
            "enabled": true,
            "size": 2048,
            "displayName": "",
            "enableForwardingAddresses": ""
        }));
        let op = diff(Some(&desired), Some(&cleared), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::NoOp(id("a@x.com")));
    }

    #[test]
    fn test_desired_key_missing_remotely_is_a_change() {
        let mapping = account_mapping().unwrap();
        let desired = record(json!({"title": ""}));
        let actual = record(json!({}));

        let op = diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::Update(id("a@x.com"), record(json!({"title": ""}))));
    }

    #[test]
    fn test_full_update_tables_resend_every_setting() {
        let mapping = spam_settings_mapping().unwrap();
        let desired = record(json!({
            "filterLevel": "on",
            "rsEmail.spamHandling": "toFolder",
            "rsEmail.hasFolderCleaner": true,
            "rsEmail.spamFolderAgeLimit": 14,
            "rsEmail.spamFolderNumLimit": 250
        }));
        let mut actual = desired.clone();
        actual.insert("rsEmail.spamFolderAgeLimit".into(), json!(7));

        match diff(Some(&desired), Some(&actual), &id("a@x.com"), &mapping, SyncMode::Full).unwrap() {
            DiffOp::Update(_, payload) => assert_eq!(payload, desired),
            other => panic!("expected update, got {:?}", other),
        }

        let op = diff(Some(&desired), Some(&desired), &id("a@x.com"), &mapping, SyncMode::Full).unwrap();
        assert_eq!(op, DiffOp::NoOp(id("a@x.com")));
    }

    #[test]
    fn test_op_display() {
        let op = DiffOp::Update(id("a@x.com"), record(json!({"size": 1, "enabled": true})));
        assert_eq!(op.to_string(), "update a@x.com [enabled, size]");
        assert_eq!(DiffOp::Delete(id("b@x.com")).to_string(), "delete b@x.com");
        assert!(!DiffOp::NoOp(id("b@x.com")).is_write());
    }
}
