//! Record shapes and resource keys

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::ResourceIdentity;

/// Flat attribute map in the shape the write endpoints accept
///
/// Keys are write-side field names; values are JSON scalars.
pub type NormalizedRecord = BTreeMap<String, Value>;

/// Desired state for one resource, as produced from configuration
///
/// Always flat, so it is already a [`NormalizedRecord`].
pub type DesiredRecord = NormalizedRecord;

/// Raw, nested record as returned by a read endpoint
pub type ActualRecord = Value;

/// Kind of manageable resource
///
/// Spam settings and the four spam ACLs hang off a mailbox: they exist for
/// as long as the mailbox does, are never listed and never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Account,
    Alias,
    #[serde(rename = "spam")]
    SpamSettings,
    Blocklist,
    IpBlocklist,
    Safelist,
    IpSafelist,
}

impl ResourceKind {
    /// Declaration order is processing order: mailboxes exist before
    /// anything that points at them
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Account,
        ResourceKind::Alias,
        ResourceKind::SpamSettings,
        ResourceKind::Blocklist,
        ResourceKind::IpBlocklist,
        ResourceKind::Safelist,
        ResourceKind::IpSafelist,
    ];

    /// Kinds a full sync enumerates remotely
    pub const LISTED: [ResourceKind; 2] = [ResourceKind::Account, ResourceKind::Alias];

    /// Spam ACL kinds, in processing order
    pub const SPAM_ACLS: [ResourceKind; 4] = [
        ResourceKind::Blocklist,
        ResourceKind::IpBlocklist,
        ResourceKind::Safelist,
        ResourceKind::IpSafelist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Account => "account",
            ResourceKind::Alias => "alias",
            ResourceKind::SpamSettings => "spam",
            ResourceKind::Blocklist => "blocklist",
            ResourceKind::IpBlocklist => "ipblocklist",
            ResourceKind::Safelist => "safelist",
            ResourceKind::IpSafelist => "ipsafelist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether full sync enumerates this kind (and may delete surplus ones)
    pub fn is_listed(self) -> bool {
        Self::LISTED.contains(&self)
    }

    pub fn is_spam_acl(self) -> bool {
        Self::SPAM_ACLS.contains(&self)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource kind paired with its identity
///
/// Ordering is by kind first, then identity, which gives the stable
/// processing order used for reproducible runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub identity: ResourceIdentity,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, identity: ResourceIdentity) -> Self {
        Self { kind, identity }
    }

    pub fn account(identity: ResourceIdentity) -> Self {
        Self::new(ResourceKind::Account, identity)
    }

    pub fn alias(identity: ResourceIdentity) -> Self {
        Self::new(ResourceKind::Alias, identity)
    }

    /// Parse the `kind:identity` form produced by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, identity) = s.split_once(':')?;
        Some(Self {
            kind: ResourceKind::parse(kind)?,
            identity: ResourceIdentity::parse(identity).ok()?,
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.identity)
    }
}

/// Reconciliation pass type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Whole resource set, deletions included
    Full,
    /// Externally supplied candidate subset; never deletes
    Incremental,
}

impl SyncMode {
    pub fn allows_delete(self) -> bool {
        matches!(self, SyncMode::Full)
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Describe the JSON type of a value for error messages
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
