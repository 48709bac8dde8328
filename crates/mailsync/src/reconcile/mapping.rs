//! Field mapping and conflict group tables
//!
//! A [`FieldMapping`] describes how a nested, read-shaped record translates
//! into the flat, write-shaped form: which read paths are kept, what they are
//! renamed to, which type they must have, and which groups of write fields
//! are mutually exclusive in a given context.
//!
//! Tables are validated once when built and are immutable afterwards.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::error::SyncError;
use crate::models::{NormalizedRecord, ResourceKind, value_type_name};

/// Decides whether a field is meaningful for a particular raw record
pub type Applicability = fn(&Value) -> bool;

/// Picks the active context of a conflict group from flattened data
///
/// Returns `None` when the data does not determine a context, in which case
/// the group leaves the record alone.
pub type ContextSelector = fn(&NormalizedRecord) -> Option<&'static str>;

/// Applicability predicate that always holds
pub fn always(_: &Value) -> bool {
    true
}

/// Write-side type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Bool,
    /// List of addresses, written as a sorted comma-separated string
    AddressList,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Str => "string",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
            FieldType::AddressList => "address list",
        }
    }

    /// Check a read-side value against this type and bring it into write form
    ///
    /// `field` is only used for error messages.
    pub fn convert(self, value: &Value, coercible: bool, field: &str) -> Result<Value, SyncError> {
        let mismatch = || SyncError::SchemaMismatch {
            field: field.to_string(),
            expected: self.name(),
            found: value_type_name(value).to_string(),
        };

        match (self, value) {
            (FieldType::Str, Value::Null) => Ok(Value::String(String::new())),
            // The API sometimes turns an empty string into a single space
            (FieldType::Str, Value::String(s)) if s == " " => Ok(Value::String(String::new())),
            (FieldType::Str, Value::String(_)) => Ok(value.clone()),
            (FieldType::Str, Value::Bool(b)) if coercible => Ok(Value::String(b.to_string())),
            (FieldType::Str, Value::Number(n)) if coercible => Ok(Value::String(n.to_string())),

            (FieldType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            (FieldType::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),

            (FieldType::Bool, Value::Bool(_)) => Ok(value.clone()),
            (FieldType::Bool, Value::String(s)) if coercible && parse_bool(s).is_some() => {
                Ok(value.clone())
            }

            (FieldType::AddressList, Value::Null) => Ok(Value::String(String::new())),
            (FieldType::AddressList, Value::String(s)) => {
                Ok(Value::String(canonical_address_list(s.split(','))))
            }
            (FieldType::AddressList, Value::Array(items)) => {
                let mut addresses = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => addresses.push(s.as_str()),
                        _ => return Err(mismatch()),
                    }
                }
                Ok(Value::String(canonical_address_list(addresses)))
            }

            _ => Err(mismatch()),
        }
    }

    /// Check a configured value against this type and bring it into write form
    ///
    /// Configuration is looser than the API: YAML turns `5551234` into a
    /// number and `true` into a bool whatever the field, so scalars are
    /// rendered as strings for string fields and booleans are parsed.
    pub fn convert_desired(self, value: &Value, field: &str) -> Result<Value, SyncError> {
        match (self, value) {
            (FieldType::Str, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (FieldType::Str, Value::Bool(b)) => Ok(Value::String(b.to_string())),
            (FieldType::Bool, Value::String(s)) => {
                parse_bool(s).map(Value::Bool).ok_or_else(|| SyncError::SchemaMismatch {
                    field: field.to_string(),
                    expected: self.name(),
                    found: format!("{:?}", s),
                })
            }
            _ => self.convert(value, false, field),
        }
    }

    /// The value a field holds once it has been cleared
    pub fn empty_value(self) -> Value {
        match self {
            FieldType::Str | FieldType::AddressList => Value::String(String::new()),
            FieldType::Int => Value::from(0),
            FieldType::Bool => Value::Bool(false),
        }
    }
}

/// What a field is set to when the desired record stops mentioning it
#[derive(Debug, Clone, Copy)]
pub enum Reset {
    /// Leave whatever the remote holds
    Keep,
    /// Clear it to the type's empty value
    Empty,
    /// Put back a fixed default
    To(fn() -> Value),
}

/// Parse the canonical string form of a boolean
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Join addresses into the canonical form: trimmed, lower-cased, sorted, deduplicated
pub fn canonical_address_list<'a>(addresses: impl IntoIterator<Item = &'a str>) -> String {
    let set: BTreeSet<String> = addresses
        .into_iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    set.into_iter().collect::<Vec<_>>().join(",")
}

/// One row of the mapping table
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Dotted path in the read-side record (e.g. `contactInfo.firstName`)
    pub read_path: &'static str,
    /// Name the write endpoints use
    pub write_name: &'static str,
    pub field_type: FieldType,
    /// Compare by canonical string form instead of strict equality
    pub coercible: bool,
    /// Sent on create but never read back, so never compared
    pub write_only: bool,
    pub reset: Reset,
    pub applies: Applicability,
}

impl FieldSpec {
    pub const fn new(read_path: &'static str, write_name: &'static str, field_type: FieldType) -> Self {
        Self {
            read_path,
            write_name,
            field_type,
            coercible: false,
            write_only: false,
            reset: Reset::Keep,
            applies: always,
        }
    }

    /// Field whose read and write names match
    pub const fn same(name: &'static str, field_type: FieldType) -> Self {
        Self::new(name, name, field_type)
    }

    pub const fn coercible(mut self) -> Self {
        self.coercible = true;
        self
    }

    pub const fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub const fn when(mut self, applies: Applicability) -> Self {
        self.applies = applies;
        self
    }

    /// Clear the field when the desired record omits it
    pub const fn resets(mut self) -> Self {
        self.reset = Reset::Empty;
        self
    }

    /// Restore `default` when the desired record omits the field
    pub const fn resets_to(mut self, default: fn() -> Value) -> Self {
        self.reset = Reset::To(default);
        self
    }

    /// Value to write when the desired record omits this field
    pub fn reset_value(&self) -> Option<Value> {
        match self.reset {
            Reset::Keep => None,
            Reset::Empty => Some(self.field_type.empty_value()),
            Reset::To(default) => Some(default()),
        }
    }
}

/// Named set of write fields that belong together in one context
#[derive(Debug, Clone, Copy)]
pub struct ConflictContext {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

/// Fields the API treats as mutually exclusive depending on a context
#[derive(Debug, Clone, Copy)]
pub struct ConflictGroup {
    pub name: &'static str,
    /// Write fields the selector inspects
    pub reads: &'static [&'static str],
    pub contexts: &'static [ConflictContext],
    pub select: ContextSelector,
}

impl ConflictGroup {
    /// Fields that some context keeps and another drops
    pub fn removable_fields(&self) -> BTreeSet<&'static str> {
        let all: BTreeSet<&'static str> = self
            .contexts
            .iter()
            .flat_map(|c| c.fields.iter().copied())
            .collect();
        all.into_iter()
            .filter(|f| !self.contexts.iter().all(|c| c.fields.contains(f)))
            .collect()
    }

    /// Fields to drop when `context` is active
    pub fn fields_outside(&self, context: &str) -> Option<BTreeSet<&'static str>> {
        let active = self.contexts.iter().find(|c| c.name == context)?;
        Some(
            self.contexts
                .iter()
                .filter(|c| c.name != context)
                .flat_map(|c| c.fields.iter().copied())
                .filter(|f| !active.fields.contains(f))
                .collect(),
        )
    }
}

/// Validated mapping table for one resource kind
#[derive(Debug, Clone)]
pub struct FieldMapping {
    fields: Vec<FieldSpec>,
    by_read: HashMap<&'static str, usize>,
    by_write: HashMap<&'static str, usize>,
    /// Every proper prefix of a read path, for walking nested objects
    prefixes: BTreeSet<String>,
    groups: Vec<ConflictGroup>,
    required_on_create: Vec<&'static str>,
    full_updates: bool,
}

impl FieldMapping {
    /// Build and validate a table
    ///
    /// # Errors
    /// `InvariantViolation` for duplicate read paths, write names whose specs
    /// disagree on type, or groups naming unknown fields;
    /// `ConflictResolution` when conflict groups depend on each other in a
    /// cycle, since such a table has no guaranteed fixed point.
    pub fn new(fields: Vec<FieldSpec>, groups: Vec<ConflictGroup>) -> Result<Self, SyncError> {
        let mut by_read = HashMap::new();
        let mut by_write: HashMap<&'static str, usize> = HashMap::new();
        let mut prefixes = BTreeSet::new();

        for (idx, spec) in fields.iter().enumerate() {
            if by_read.insert(spec.read_path, idx).is_some() {
                return Err(SyncError::InvariantViolation(format!(
                    "duplicate read path {} in field mapping",
                    spec.read_path
                )));
            }

            if let Some(&existing) = by_write.get(spec.write_name) {
                let other = &fields[existing];
                if other.field_type != spec.field_type || other.coercible != spec.coercible {
                    return Err(SyncError::InvariantViolation(format!(
                        "write field {} is mapped with conflicting types",
                        spec.write_name
                    )));
                }
            } else {
                by_write.insert(spec.write_name, idx);
            }

            let mut prefix = String::new();
            let segments: Vec<&str> = spec.read_path.split('.').collect();
            for segment in &segments[..segments.len() - 1] {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                prefixes.insert(prefix.clone());
            }
        }

        for group in &groups {
            let unknown = group
                .reads
                .iter()
                .chain(group.contexts.iter().flat_map(|c| c.fields.iter()))
                .find(|f| !by_write.contains_key(**f));
            if let Some(field) = unknown {
                return Err(SyncError::InvariantViolation(format!(
                    "conflict group {} names unknown field {}",
                    group.name, field
                )));
            }
        }

        check_acyclic(&groups)?;

        Ok(Self {
            fields,
            by_read,
            by_write,
            prefixes,
            groups,
            required_on_create: Vec::new(),
            full_updates: false,
        })
    }

    /// A table with no fields; everything read through it is dropped
    pub fn empty() -> Self {
        Self {
            fields: Vec::new(),
            by_read: HashMap::new(),
            by_write: HashMap::new(),
            prefixes: BTreeSet::new(),
            groups: Vec::new(),
            required_on_create: Vec::new(),
            full_updates: false,
        }
    }

    /// Updates carry the whole desired record instead of only changed fields
    ///
    /// For endpoints that reset whatever a write leaves out.
    pub fn with_full_updates(mut self) -> Self {
        self.full_updates = true;
        self
    }

    pub fn sends_full_updates(&self) -> bool {
        self.full_updates
    }

    /// Declare fields a create payload must carry
    pub fn with_required(mut self, fields: &[&'static str]) -> Self {
        self.required_on_create.extend_from_slice(fields);
        self
    }

    pub fn field_by_read(&self, path: &str) -> Option<&FieldSpec> {
        self.by_read.get(path).map(|&idx| &self.fields[idx])
    }

    pub fn field_by_write(&self, name: &str) -> Option<&FieldSpec> {
        self.by_write.get(name).map(|&idx| &self.fields[idx])
    }

    /// Whether some read path continues below `path`
    pub fn is_nested_prefix(&self, path: &str) -> bool {
        self.prefixes.contains(path)
    }

    pub fn is_coercible(&self, write_name: &str) -> bool {
        self.field_by_write(write_name).is_some_and(|f| f.coercible)
    }

    pub fn is_write_only(&self, write_name: &str) -> bool {
        self.field_by_write(write_name).is_some_and(|f| f.write_only)
    }

    pub fn groups(&self) -> &[ConflictGroup] {
        &self.groups
    }

    pub fn required_on_create(&self) -> &[&'static str] {
        &self.required_on_create
    }

    /// Number of distinct write-side fields
    pub fn write_field_count(&self) -> usize {
        self.by_write.len()
    }

    /// One spec per write-side field, in table order
    pub fn write_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(idx, spec)| self.by_write.get(spec.write_name) == Some(idx))
            .map(|(_, spec)| spec)
    }
}

/// Reject tables where one group's selector reads a field another group can drop,
/// transitively back to itself.
fn check_acyclic(groups: &[ConflictGroup]) -> Result<(), SyncError> {
    let removable: Vec<BTreeSet<&'static str>> = groups.iter().map(|g| g.removable_fields()).collect();

    // edge a -> b: a's selector reads something b may remove
    let edges: Vec<Vec<usize>> = groups
        .iter()
        .map(|a| {
            (0..groups.len())
                .filter(|&b| a.reads.iter().any(|f| removable[b].contains(f)))
                .collect()
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(node: usize, edges: &[Vec<usize>], marks: &mut [Mark]) -> Option<usize> {
        marks[node] = Mark::Active;
        for &next in &edges[node] {
            match marks[next] {
                Mark::Active => return Some(next),
                Mark::New => {
                    if let Some(found) = visit(next, edges, marks) {
                        return Some(found);
                    }
                }
                Mark::Done => {}
            }
        }
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; groups.len()];
    for start in 0..groups.len() {
        if marks[start] == Mark::New
            && let Some(node) = visit(start, &edges, &mut marks)
        {
            return Err(SyncError::ConflictResolution(format!(
                "conflict group {} depends on itself through the mapping table",
                groups[node].name
            )));
        }
    }
    Ok(())
}

/// The mapping tables for every resource kind, loaded once per process
#[derive(Debug, Clone)]
pub struct Mappings {
    account: FieldMapping,
    alias: FieldMapping,
    spam_settings: FieldMapping,
    spam_acl: FieldMapping,
}

impl Mappings {
    /// Account and alias tables; spam kinds get empty tables until [`Mappings::with_spam`]
    pub fn new(account: FieldMapping, alias: FieldMapping) -> Self {
        Self {
            account,
            alias,
            spam_settings: FieldMapping::empty(),
            spam_acl: FieldMapping::empty(),
        }
    }

    /// Tables for spam settings and for the four spam ACLs (which share one)
    pub fn with_spam(mut self, settings: FieldMapping, acl: FieldMapping) -> Self {
        self.spam_settings = settings;
        self.spam_acl = acl;
        self
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &FieldMapping {
        match kind {
            ResourceKind::Account => &self.account,
            ResourceKind::Alias => &self.alias,
            ResourceKind::SpamSettings => &self.spam_settings,
            ResourceKind::Blocklist
            | ResourceKind::IpBlocklist
            | ResourceKind::Safelist
            | ResourceKind::IpSafelist => &self.spam_acl,
        }
    }
}
