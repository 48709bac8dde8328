use mailsync::models::{NormalizedRecord, ResourceIdentity, SyncMode};
use mailsync::reconcile::{DiffOp, account_mapping, diff, normalize};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

fn identity() -> ResourceIdentity {
    ResourceIdentity::parse("prop@x.com").unwrap()
}

/// A boolean as the API might echo it
fn echoed_bool() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<bool>().prop_map(|b| Value::String(b.to_string())),
    ]
}

fn addresses() -> impl Strategy<Value = Value> {
    prop::collection::vec("[a-c]{1,3}@(x|y)\\.com", 0..3)
        .prop_map(|list| Value::Array(list.into_iter().map(Value::String).collect()))
}

fn contact_info() -> impl Strategy<Value = Value> {
    (
        prop::option::of("[A-Za-z ]{0,6}"),
        prop::option::of("[A-Za-z ]{0,6}"),
        prop::option::of(Just(Value::Null)),
    )
        .prop_map(|(first, last, notes)| {
            let mut info = Map::new();
            if let Some(first) = first {
                info.insert("firstName".into(), Value::String(first));
            }
            if let Some(last) = last {
                info.insert("lastName".into(), Value::String(last));
            }
            if let Some(notes) = notes {
                info.insert("notes".into(), notes);
            }
            Value::Object(info)
        })
}

/// Nested account reads with any mix of the conflicting fields present
fn account_read() -> impl Strategy<Value = Value> {
    (
        prop::option::of(echoed_bool()),
        prop::option::of("[a-z ]{0,8}"),
        prop::option::of(addresses()),
        prop::option::of(echoed_bool()),
        prop::option::of(echoed_bool()),
        prop::option::of(0i64..100_000),
        prop::option::of(contact_info()),
    )
        .prop_map(|(vacation_on, message, forwards, save, enabled, size, contact)| {
            let mut read = Map::new();
            read.insert("name".into(), json!("prop"));
            read.insert("currentUsage".into(), json!(17));
            if let Some(v) = vacation_on {
                read.insert("enableVacationMessage".into(), v);
            }
            if let Some(v) = message {
                read.insert("vacationMessage".into(), Value::String(v));
            }
            if let Some(v) = forwards {
                read.insert("emailForwardingAddressList".into(), v);
            }
            if let Some(v) = save {
                read.insert("saveForwardedEmail".into(), v);
            }
            if let Some(v) = enabled {
                read.insert("enabled".into(), v);
            }
            if let Some(v) = size {
                read.insert("size".into(), json!(v));
            }
            if let Some(v) = contact {
                read.insert("contactInfo".into(), v);
            }
            Value::Object(read)
        })
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}

fn as_actual(record: &NormalizedRecord) -> Value {
    Value::Object(record.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

const TEXT_FIELDS: &[&str] = &["displayName", "firstName", "lastName", "title", "notes"];

fn text_record() -> impl Strategy<Value = NormalizedRecord> {
    prop::collection::vec(prop::option::of("[ab]{0,2}"), TEXT_FIELDS.len()).prop_map(|values| {
        TEXT_FIELDS
            .iter()
            .zip(values)
            .filter_map(|(field, value)| value.map(|v| (field.to_string(), Value::String(v))))
            .collect()
    })
}

proptest! {
    #[test]
    fn test_conflict_groups_keep_selected_context(read in account_read()) {
        let mapping = account_mapping().unwrap();
        let record = normalize(&read, &identity(), &mapping).unwrap();

        // Vacation text survives only while vacation is on (or undecided)
        match read.get("enableVacationMessage") {
            Some(flag) if !is_true(flag) => prop_assert!(!record.contains_key("vacationMessage")),
            _ => prop_assert_eq!(
                record.contains_key("vacationMessage"),
                read.get("vacationMessage").is_some()
            ),
        }

        // Keeping forwarded copies only makes sense while forwarding
        let forwarding = read
            .get("emailForwardingAddressList")
            .map(|list| list.as_array().is_some_and(|items| !items.is_empty()));
        match forwarding {
            Some(false) => prop_assert!(!record.contains_key("saveForwardedEmail")),
            _ => prop_assert_eq!(
                record.contains_key("saveForwardedEmail"),
                read.get("saveForwardedEmail").is_some()
            ),
        }

        // Read-only and nested keys never leak through
        prop_assert!(!record.contains_key("name"));
        prop_assert!(!record.contains_key("currentUsage"));
        prop_assert!(!record.contains_key("contactInfo"));
        prop_assert!(!record.contains_key("emailForwardingAddressList"));
    }

    #[test]
    fn test_normalize_is_idempotent(read in account_read()) {
        let mapping = account_mapping().unwrap();
        let once = normalize(&read, &identity(), &mapping).unwrap();
        let twice = normalize(&as_actual(&once), &identity(), &mapping).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn test_update_payload_is_exactly_the_difference(
        desired in text_record(),
        actual in text_record(),
    ) {
        let mapping = account_mapping().unwrap();
        let id = identity();

        // Fields the desired record omits are cleared when they hold anything
        let cleared = Value::String(String::new());
        let wanted = |field: &str| desired.get(field).unwrap_or(&cleared).clone();
        let expected: BTreeSet<String> = TEXT_FIELDS
            .iter()
            .filter(|field| match (desired.get(**field), actual.get(**field)) {
                (Some(value), current) => current != Some(value),
                (None, Some(current)) => current != &cleared,
                (None, None) => false,
            })
            .map(|field| field.to_string())
            .collect();

        match diff(Some(&desired), Some(&actual), &id, &mapping, SyncMode::Full).unwrap() {
            DiffOp::NoOp(_) => prop_assert!(expected.is_empty()),
            DiffOp::Update(_, payload) => {
                let keys: BTreeSet<String> = payload.keys().cloned().collect();
                prop_assert_eq!(keys, expected);
                for (key, value) in &payload {
                    prop_assert_eq!(value, &wanted(key));
                }
            }
            other => prop_assert!(false, "unexpected {:?}", other),
        }
    }

    #[test]
    fn test_diff_after_apply_is_noop(
        desired in text_record(),
        actual in text_record(),
    ) {
        let mapping = account_mapping().unwrap();
        let id = identity();

        let mut converged = actual.clone();
        if let DiffOp::Update(_, payload) =
            diff(Some(&desired), Some(&actual), &id, &mapping, SyncMode::Incremental).unwrap()
        {
            converged.extend(payload);
        }

        let op = diff(Some(&desired), Some(&converged), &id, &mapping, SyncMode::Incremental).unwrap();
        prop_assert_eq!(op, DiffOp::NoOp(id));
    }
}
