//! Shape normalizer
//!
//! Turns a nested record from a read endpoint into the flat, write-shaped
//! form described by a [`FieldMapping`]. The result holds only write-side
//! keys, every value has its write-side type, and no two fields that a
//! conflict group considers mutually exclusive survive together.

use log::trace;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::mapping::FieldMapping;
use crate::error::SyncError;
use crate::models::{ActualRecord, NormalizedRecord, ResourceIdentity, value_type_name};

/// Normalize one read-side record
///
/// Already-flat input keyed by write names passes through unchanged, so
/// normalizing a normalized record is a no-op.
///
/// # Errors
/// `SchemaMismatch` when a value does not have the type its field expects
/// (including a scalar where a nested object was expected);
/// `ConflictResolution` when the conflict groups do not settle.
pub fn normalize(
    actual: &ActualRecord,
    identity: &ResourceIdentity,
    mapping: &FieldMapping,
) -> Result<NormalizedRecord, SyncError> {
    let Value::Object(root) = actual else {
        return Err(SyncError::SchemaMismatch {
            field: identity.to_string(),
            expected: "object",
            found: value_type_name(actual).to_string(),
        });
    };

    let mut record = NormalizedRecord::new();
    flatten(root, "", actual, identity, mapping, &mut record)?;
    resolve_conflicts(&mut record, identity, mapping)?;
    Ok(record)
}

fn flatten(
    object: &Map<String, Value>,
    prefix: &str,
    root: &Value,
    identity: &ResourceIdentity,
    mapping: &FieldMapping,
    out: &mut NormalizedRecord,
) -> Result<(), SyncError> {
    for (key, value) in object {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        if let Some(spec) = mapping.field_by_read(&path)
            && (spec.applies)(root)
        {
            let field = format!("{}/{}", identity, spec.write_name);
            let converted = spec.field_type.convert(value, spec.coercible, &field)?;
            out.insert(spec.write_name.to_string(), converted);
            continue;
        }

        if mapping.is_nested_prefix(&path) {
            match value {
                Value::Object(inner) => {
                    flatten(inner, &path, root, identity, mapping, out)?;
                }
                Value::Null => trace!("{}: {} is null", identity, path),
                other => {
                    return Err(SyncError::SchemaMismatch {
                        field: format!("{}/{}", identity, path),
                        expected: "object",
                        found: value_type_name(other).to_string(),
                    });
                }
            }
            continue;
        }

        // Top-level keys that are already write names (flat input)
        if prefix.is_empty()
            && let Some(spec) = mapping.field_by_write(key)
        {
            let field = format!("{}/{}", identity, spec.write_name);
            let converted = spec.field_type.convert(value, spec.coercible, &field)?;
            out.insert(spec.write_name.to_string(), converted);
            continue;
        }

        trace!("{}: dropping read-only field {}", identity, path);
    }
    Ok(())
}

/// Drop fields outside each group's selected context until nothing changes
///
/// Every group in a round selects against the same snapshot, so the result
/// does not depend on the order groups are declared in.
fn resolve_conflicts(
    record: &mut NormalizedRecord,
    identity: &ResourceIdentity,
    mapping: &FieldMapping,
) -> Result<(), SyncError> {
    let groups = mapping.groups();
    if groups.is_empty() {
        return Ok(());
    }

    for _ in 0..=groups.len() {
        let snapshot = record.clone();
        let mut removals: BTreeSet<&'static str> = BTreeSet::new();

        for group in groups {
            let Some(context) = (group.select)(&snapshot) else {
                continue;
            };
            let outside = group.fields_outside(context).ok_or_else(|| {
                SyncError::ConflictResolution(format!(
                    "group {} selected unknown context {} for {}",
                    group.name, context, identity
                ))
            })?;
            removals.extend(outside);
        }

        let mut changed = false;
        for field in removals {
            if record.remove(field).is_some() {
                trace!("{}: dropping {} (conflicting context)", identity, field);
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }

    Err(SyncError::ConflictResolution(format!(
        "conflict groups did not settle for {}",
        identity
    )))
}
