//! Rackspace hosted mail admin API integration
//!
//! This module provides:
//! - Request signing
//! - A [`Remote`](crate::sync::Remote) over mailboxes, aliases and mailbox spam settings

mod auth;
mod client;

pub use auth::ApiSigner;
pub use client::{RackspaceClient, form_fields};

/// Listing response types
pub mod api {
    use serde::Deserialize;
    use serde_json::Value;

    /// One page of a mailbox or alias listing
    ///
    /// Rows are kept as raw JSON: alias rows double as actual records.
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListPage {
        #[serde(default)]
        pub rs_mailboxes: Vec<Value>,
        #[serde(default)]
        pub aliases: Vec<Value>,
        #[serde(default)]
        pub offset: u64,
        #[serde(default)]
        pub size: u64,
        #[serde(default)]
        pub total: u64,
    }

    impl ListPage {
        pub fn into_rows(self) -> Vec<Value> {
            let mut rows = self.rs_mailboxes;
            rows.extend(self.aliases);
            rows
        }
    }
}
