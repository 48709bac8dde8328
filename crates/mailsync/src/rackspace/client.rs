//! Hosted mail admin API client
//!
//! Implements [`Remote`] on top of the rate-limited [`Transport`]: builds
//! paths, walks paginated listings and form-encodes writes. Spam settings
//! and ACLs live under their mailbox; ACL writes are sent as the entries to
//! add and remove rather than the whole list.

use log::debug;
use serde_json::Value;
use std::collections::BTreeSet;

use super::api::ListPage;
use super::auth::ApiSigner;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::{
    ActualRecord, NormalizedRecord, ResourceIdentity, ResourceKey, ResourceKind, value_type_name,
};
use crate::reconcile::FieldType;
use crate::sync::{Listing, Remote};
use crate::transport::{Request, SystemClock, Transport, UreqBackend};

/// Client for one customer account
pub struct RackspaceClient {
    transport: Transport,
    customer_id: String,
    page_size: u64,
}

impl RackspaceClient {
    /// Production API base URL
    pub const API_URL: &'static str = "https://api.emailsrvr.com";

    /// Rows requested per listing page
    pub const PAGE_SIZE: u64 = 50;

    pub fn new(transport: Transport, customer_id: &str) -> Self {
        Self {
            transport,
            customer_id: customer_id.to_string(),
            page_size: Self::PAGE_SIZE,
        }
    }

    /// Build a client with a fresh transport from configuration
    pub fn connect(config: &SyncConfig) -> Self {
        let backend = UreqBackend::new(&config.api_url, config.timeout());
        let signer = ApiSigner::new(&config.user_key, &config.secret_key, &config.user_agent);
        let transport = Transport::new(
            Box::new(backend),
            Box::new(SystemClock),
            config.rate_limits.to_limits(),
            config.retry.to_policy(),
        )
        .with_signer(Box::new(signer));

        Self::new(transport, &config.customer_id)
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    fn collection_path(&self, kind: ResourceKind, domain: &str) -> String {
        let segment = match kind {
            ResourceKind::Alias => "aliases",
            _ => "mailboxes",
        };
        format!(
            "/v1/customers/{}/domains/{}/rs/{}",
            urlencoding::encode(&self.customer_id),
            urlencoding::encode(domain),
            segment
        )
    }

    fn resource_path(&self, key: &ResourceKey) -> String {
        let path = format!(
            "{}/{}",
            self.collection_path(key.kind, key.identity.domain()),
            urlencoding::encode(key.identity.local_part())
        );
        match key.kind {
            ResourceKind::Account | ResourceKind::Alias => path,
            ResourceKind::SpamSettings => format!("{}/spam/settings", path),
            acl => format!("{}/spam/{}", path, acl.as_str()),
        }
    }

    /// Parse a listing row into its identity and, when complete, its record
    fn listing_row(
        kind: ResourceKind,
        domain: &str,
        row: Value,
    ) -> Result<(ResourceIdentity, Option<ActualRecord>), SyncError> {
        let name = match row.get("name") {
            Some(Value::String(name)) => name.clone(),
            other => {
                return Err(SyncError::SchemaMismatch {
                    field: format!("{}/{}/name", domain, kind),
                    expected: "string",
                    found: other.map(value_type_name).unwrap_or("nothing").to_string(),
                });
            }
        };

        let identity = ResourceIdentity::in_domain(&name, domain).map_err(|e| {
            SyncError::SchemaMismatch {
                field: format!("{}/{}/name", domain, kind),
                expected: "address",
                found: e.to_string(),
            }
        })?;

        let complete = kind == ResourceKind::Alias
            && row.get("numberOfMembers").and_then(Value::as_u64) == Some(1);

        Ok((identity, complete.then_some(row)))
    }

    /// Bring a spam ACL to the entries in `record`
    ///
    /// The endpoint takes the entries to add and remove, so the current list
    /// is read first.
    fn write_acl(&mut self, key: &ResourceKey, record: &NormalizedRecord) -> Result<(), SyncError> {
        let field = format!("{}/{}", key.identity, key.kind);
        let wanted = match record.get("addresses") {
            Some(value) => acl_entries(value, &field)?,
            None => BTreeSet::new(),
        };
        let current = match self.fetch(key)? {
            Some(raw) => acl_entries(raw.get("addresses").unwrap_or(&Value::Null), &field)?,
            None => BTreeSet::new(),
        };

        let add: Vec<&str> = wanted.difference(&current).map(String::as_str).collect();
        let remove: Vec<&str> = current.difference(&wanted).map(String::as_str).collect();
        if add.is_empty() && remove.is_empty() {
            debug!("{} already holds the wanted entries", key);
            return Ok(());
        }

        let mut form = Vec::new();
        if !add.is_empty() {
            form.push(("addList".to_string(), add.join(",")));
        }
        if !remove.is_empty() {
            form.push(("removeList".to_string(), remove.join(",")));
        }
        let request = Request::put(self.resource_path(key), form).header("Accept", "application/json");
        self.write(request, key)
    }

    fn write(&mut self, request: Request, key: &ResourceKey) -> Result<(), SyncError> {
        let response = self.transport.call(&request)?;
        if response.is_not_found() {
            return Err(SyncError::Rejected {
                status: 404,
                body: format!("{} not found", key),
            });
        }
        Ok(())
    }
}

/// Canonical entries of an ACL, from either a read (array) or a record (comma list)
fn acl_entries(value: &Value, field: &str) -> Result<BTreeSet<String>, SyncError> {
    let canonical = FieldType::AddressList.convert(value, false, field)?;
    Ok(canonical
        .as_str()
        .unwrap_or_default()
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect())
}

/// Encode a flat record as form fields
///
/// Booleans go over the wire as `true`/`false`, lists as comma-joined strings.
pub fn form_fields(record: &NormalizedRecord) -> Result<Vec<(String, String)>, SyncError> {
    record
        .iter()
        .map(|(key, value)| {
            let encoded = match value {
                Value::Null => String::new(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(SyncError::InvariantViolation(format!(
                            "field {} holds a list with a {} in it",
                            key,
                            value_type_name(other)
                        ))),
                    })
                    .collect::<Result<Vec<_>, _>>()?
                    .join(","),
                Value::Object(_) => {
                    return Err(SyncError::InvariantViolation(format!(
                        "field {} is nested and cannot be form-encoded",
                        key
                    )));
                }
            };
            Ok((key.clone(), encoded))
        })
        .collect()
}

impl Remote for RackspaceClient {
    fn list(&mut self, kind: ResourceKind, domain: &str) -> Result<Listing, SyncError> {
        if !kind.is_listed() {
            return Err(SyncError::InvariantViolation(format!(
                "{} resources cannot be listed",
                kind
            )));
        }

        let path = format!("{}/", self.collection_path(kind, domain));
        let mut listing = Listing::new();
        let mut offset = 0u64;

        loop {
            let request = Request::get(path.as_str())
                .header("Accept", "application/json")
                .query("size", self.page_size)
                .query("offset", offset);

            let page: ListPage = self.transport.call_json(&request)?.ok_or_else(|| {
                SyncError::Rejected {
                    status: 404,
                    body: format!("domain {} not found", domain),
                }
            })?;

            let (page_offset, page_size, total) = (page.offset, page.size, page.total);
            let rows = page.into_rows();
            debug!(
                "Listed {} {} rows for {} (offset {}, total {})",
                rows.len(),
                kind,
                domain,
                page_offset,
                total
            );
            if rows.is_empty() {
                break;
            }

            for row in rows {
                let (identity, record) = Self::listing_row(kind, domain, row)?;
                listing.insert(identity, record);
            }

            if page_size == 0 || page_offset + page_size >= total {
                break;
            }
            offset = page_offset + page_size;
        }

        Ok(listing)
    }

    fn fetch(&mut self, key: &ResourceKey) -> Result<Option<ActualRecord>, SyncError> {
        let request = Request::get(self.resource_path(key)).header("Accept", "application/json");
        self.transport.call_json::<Value>(&request)
    }

    fn create(&mut self, key: &ResourceKey, record: &NormalizedRecord) -> Result<(), SyncError> {
        match key.kind {
            ResourceKind::Account | ResourceKind::Alias => {
                let request = Request::post(self.resource_path(key), form_fields(record)?)
                    .header("Accept", "application/json");
                self.write(request, key)
            }
            // Spam resources come with their mailbox; creating one means setting it
            _ => self.update(key, record),
        }
    }

    fn update(&mut self, key: &ResourceKey, changes: &NormalizedRecord) -> Result<(), SyncError> {
        if key.kind.is_spam_acl() {
            return self.write_acl(key, changes);
        }
        let request = Request::put(self.resource_path(key), form_fields(changes)?)
            .header("Accept", "application/json");
        self.write(request, key)
    }

    fn delete(&mut self, key: &ResourceKey) -> Result<(), SyncError> {
        match key.kind {
            ResourceKind::Account | ResourceKind::Alias => {}
            ResourceKind::SpamSettings => {
                return Err(SyncError::InvariantViolation(format!(
                    "{} cannot be deleted, only changed",
                    key
                )));
            }
            _ => return self.write_acl(key, &NormalizedRecord::new()),
        }

        let request = Request::delete(self.resource_path(key)).header("Accept", "application/json");
        let response = self.transport.call(&request)?;
        if response.is_not_found() {
            debug!("{} already gone", key);
        }
        Ok(())
    }
}
