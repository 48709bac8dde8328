//! Desired state
//!
//! Each managed domain has a YAML document listing its accounts:
//!
//! ```yaml
//! accounts:
//!   ann:
//!     displayName: Ann Smith
//!     password: Secret1!
//!     aliases: [info, sales]
//!     spam:
//!       settings:
//!         filterLevel: exclusive
//!       safelist: ["@partner.com"]
//!   bob@example.com:
//!     enabled: false
//! ```
//!
//! The builder turns these into flat desired records keyed by
//! [`ResourceKey`]: one account record per account with defaults applied,
//! one alias record per alias name listing every account that names it, and
//! one record per spam section an account carries. Every attribute is
//! checked against the write side of its mapping table.

use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::SyncConfig;
use crate::models::{DesiredRecord, ResourceIdentity, ResourceKey, ResourceKind, value_type_name};
use crate::reconcile::{DEFAULT_MAILBOX_SIZE, Mappings, canonical_address_list, normalize};

/// Keys in an account entry that are not account attributes
const NON_ATTRIBUTE_KEYS: &[&str] = &["aliases", "spam", "name"];

const FILTER_LEVELS: &[&str] = &["on", "off", "exclusive"];

const SPAM_HANDLING: &[&str] = &["toFolder", "delete", "labelSubject", "toAddress"];

/// One domain document as written on disk
#[derive(Debug, Default, Deserialize)]
pub struct DomainDocument {
    /// Account name (bare or full address) to its attributes
    #[serde(default)]
    pub accounts: BTreeMap<String, Option<BTreeMap<String, Value>>>,

    /// Domain-wide spam settings; not managed
    #[serde(default)]
    pub spam: Option<Value>,
}

impl DomainDocument {
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_yaml_file(path)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse domain document")
    }
}

/// Desired records for every managed domain
#[derive(Debug, Default, Clone)]
pub struct DesiredState {
    domains: BTreeSet<String>,
    records: BTreeMap<ResourceKey, DesiredRecord>,
}

impl DesiredState {
    /// Domains whose remote state this run owns
    pub fn domains(&self) -> &BTreeSet<String> {
        &self.domains
    }

    pub fn records(&self) -> &BTreeMap<ResourceKey, DesiredRecord> {
        &self.records
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&DesiredRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Register a domain with no records (every remote resource in it is surplus)
    pub fn add_domain(&mut self, domain: &str) {
        self.domains.insert(domain.to_lowercase());
    }

    /// Insert a record directly; its domain becomes managed
    pub fn insert(&mut self, key: ResourceKey, record: DesiredRecord) {
        self.domains.insert(key.identity.domain().to_string());
        self.records.insert(key, record);
    }

    /// Load every domain named by the configuration
    pub fn load(config: &SyncConfig, mappings: &Mappings) -> Result<Self> {
        let mut builder = DesiredStateBuilder::new(mappings);
        for (domain, path) in config.domain_files()? {
            let document = DomainDocument::from_file(&path)
                .with_context(|| format!("Failed to load domain {}", domain))?;
            builder.add_domain(&domain, &document)?;
        }
        Ok(builder.build())
    }
}

/// Accumulates domain documents into a [`DesiredState`]
pub struct DesiredStateBuilder<'a> {
    mappings: &'a Mappings,
    state: DesiredState,
}

impl<'a> DesiredStateBuilder<'a> {
    pub fn new(mappings: &'a Mappings) -> Self {
        Self {
            mappings,
            state: DesiredState::default(),
        }
    }

    /// Add the accounts, aliases and spam settings of one domain
    pub fn add_domain(&mut self, domain: &str, document: &DomainDocument) -> Result<()> {
        let domain = domain.trim().to_lowercase();
        self.state.add_domain(&domain);

        if document.spam.is_some() {
            warn!(
                "Domain-wide spam settings for {} are not managed; set them per account",
                domain
            );
        }

        let mut alias_members: BTreeMap<ResourceIdentity, Vec<String>> = BTreeMap::new();

        for (name, attributes) in &document.accounts {
            let identity = ResourceIdentity::in_domain(name, &domain)
                .with_context(|| format!("Invalid account name {:?} in domain {}", name, domain))?;
            if identity.domain() != domain {
                anyhow::bail!("Account {} is listed under domain {}", identity, domain);
            }

            let attributes = attributes.clone().unwrap_or_default();

            if let Some(aliases) = attributes.get("aliases") {
                for alias in alias_names(aliases)
                    .with_context(|| format!("Invalid aliases for {}", identity))?
                {
                    let alias_id = ResourceIdentity::in_domain(&alias, &domain)
                        .with_context(|| format!("Invalid alias {:?} for {}", alias, identity))?;
                    alias_members
                        .entry(alias_id)
                        .or_default()
                        .push(identity.to_string());
                }
            }

            if let Some(spam) = attributes.get("spam") {
                self.add_spam(&identity, spam)?;
            }

            let record = self.account_record(&identity, attributes)?;
            let key = ResourceKey::account(identity);
            if self.state.records.insert(key.clone(), record).is_some() {
                anyhow::bail!("Account {} is defined twice", key.identity);
            }
        }

        for (alias, members) in alias_members {
            let key = ResourceKey::alias(alias);
            if self.state.records.contains_key(&ResourceKey::account(key.identity.clone())) {
                anyhow::bail!("{} is both an account and an alias", key.identity);
            }
            let mut record = DesiredRecord::new();
            record.insert(
                "aliasEmails".to_string(),
                Value::String(canonical_address_list(members.iter().map(String::as_str))),
            );
            self.state.records.insert(key, record);
        }

        Ok(())
    }

    fn account_record(
        &self,
        identity: &ResourceIdentity,
        attributes: BTreeMap<String, Value>,
    ) -> Result<DesiredRecord> {
        let mapping = self.mappings.for_kind(ResourceKind::Account);

        let mut record = DesiredRecord::new();
        for (key, value) in attributes {
            if NON_ATTRIBUTE_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(spec) = mapping.field_by_write(&key) else {
                anyhow::bail!("Unknown attribute {:?} for account {}", key, identity);
            };
            let field = format!("{}/{}", identity, spec.write_name);
            let value = spec
                .field_type
                .convert_desired(&value, &field)
                .with_context(|| format!("Invalid attribute {:?} for account {}", key, identity))?;
            record.insert(key, value);
        }

        // The service shows first and last name when no display name is set
        if record
            .get("displayName")
            .and_then(Value::as_str)
            .is_none_or(str::is_empty)
        {
            let first = record.get("firstName").and_then(Value::as_str).unwrap_or_default();
            let last = record.get("lastName").and_then(Value::as_str).unwrap_or_default();
            let name = format!("{} {}", first, last).trim().to_string();
            if !name.is_empty() {
                record.insert("displayName".to_string(), Value::String(name));
            }
        }

        let defaults = [
            ("enabled", Value::Bool(true)),
            ("size", Value::from(DEFAULT_MAILBOX_SIZE)),
            ("visibleInExchangeGAL", Value::Bool(true)),
            ("visibleInRackspaceEmailCompanyDirectory", Value::Bool(true)),
        ];
        for (key, value) in defaults {
            record.entry(key.to_string()).or_insert(value);
        }
        Ok(record)
    }

    /// Add one record per section of an account's `spam:` block
    fn add_spam(&mut self, identity: &ResourceIdentity, spam: &Value) -> Result<()> {
        let sections = match spam {
            Value::Null => return Ok(()),
            Value::Object(sections) => sections,
            other => anyhow::bail!(
                "spam for {} must be a mapping, found {}",
                identity,
                value_type_name(other)
            ),
        };

        for (section, value) in sections {
            let (kind, record) = match ResourceKind::parse(section) {
                Some(kind) if kind.is_spam_acl() => (kind, spam_acl_record(identity, kind, value)?),
                _ if section == "settings" => (
                    ResourceKind::SpamSettings,
                    self.spam_settings_record(identity, value)?,
                ),
                _ => anyhow::bail!("Unknown spam section {:?} for {}", section, identity),
            };
            self.state
                .records
                .insert(ResourceKey::new(kind, identity.clone()), record);
        }
        Ok(())
    }

    /// Settings as written, completed with service defaults, minus the fields
    /// the chosen spam handling excludes
    fn spam_settings_record(&self, identity: &ResourceIdentity, value: &Value) -> Result<DesiredRecord> {
        let mapping = self.mappings.for_kind(ResourceKind::SpamSettings);

        // `rsEmail: {spamHandling: ...}` and `rsEmail.spamHandling: ...` are the same setting
        let mut flat = Map::new();
        match value {
            Value::Null => {}
            Value::Object(entries) => {
                for (key, value) in entries {
                    match value {
                        Value::Object(inner) => flat.extend(
                            inner
                                .iter()
                                .map(|(name, v)| (format!("{}.{}", key, name), v.clone())),
                        ),
                        _ => {
                            flat.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            other => anyhow::bail!(
                "spam settings for {} must be a mapping, found {}",
                identity,
                value_type_name(other)
            ),
        }

        let mut record = Map::new();
        for (key, value) in flat {
            let Some(spec) = mapping.field_by_write(&key) else {
                anyhow::bail!("Unknown spam setting {:?} for {}", key, identity);
            };
            let value = match (key.as_str(), value) {
                ("filterLevel", Value::Bool(true)) => Value::String("on".into()),
                ("filterLevel", Value::Bool(false)) => Value::String("off".into()),
                (_, value) => value,
            };
            let field = format!("{}/spam/{}", identity, spec.write_name);
            let value = spec.field_type.convert_desired(&value, &field)?;
            check_spam_setting(&key, &value).with_context(|| format!("Invalid spam setting for {}", identity))?;
            record.insert(key, value);
        }

        for spec in mapping.write_fields() {
            if let Some(default) = spec.reset_value() {
                record.entry(spec.write_name.to_string()).or_insert(default);
            }
        }

        normalize(&Value::Object(record), identity, mapping)
            .with_context(|| format!("Conflicting spam settings for {}", identity))
    }

    pub fn build(self) -> DesiredState {
        self.state
    }
}

fn check_spam_setting(key: &str, value: &Value) -> Result<()> {
    let allowed = match key {
        "filterLevel" => FILTER_LEVELS,
        "rsEmail.spamHandling" => SPAM_HANDLING,
        "rsEmail.spamFolderAgeLimit" | "rsEmail.spamFolderNumLimit" => {
            if value.as_i64().is_some_and(|n| n < 0) {
                anyhow::bail!("{} must not be negative", key);
            }
            return Ok(());
        }
        _ => return Ok(()),
    };
    match value.as_str() {
        Some(s) if allowed.contains(&s) => Ok(()),
        _ => anyhow::bail!("{} must be one of {}, found {}", key, allowed.join(", "), value),
    }
}

fn spam_acl_record(identity: &ResourceIdentity, kind: ResourceKind, value: &Value) -> Result<DesiredRecord> {
    let entries: Vec<&str> = match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.as_str()),
                other => anyhow::bail!(
                    "{} entries for {} must be strings, found {}",
                    kind,
                    identity,
                    value_type_name(other)
                ),
            })
            .collect::<Result<_>>()?,
        other => anyhow::bail!(
            "{} for {} must be a list, found {}",
            kind,
            identity,
            value_type_name(other)
        ),
    };

    let mut record = DesiredRecord::new();
    record.insert(
        "addresses".to_string(),
        Value::String(canonical_address_list(entries)),
    );
    Ok(record)
}

fn alias_names(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => Ok(s.split(',').map(|a| a.trim().to_string()).filter(|a| !a.is_empty()).collect()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => anyhow::bail!("alias entries must be strings, found {}", other),
            })
            .collect(),
        other => anyhow::bail!("aliases must be a list, found {}", other),
    }
}
