//! Request signing for the hosted mail admin API
//!
//! Every request carries `X-Api-Signature: <user key>:<timestamp>:<hash>`
//! where the hash is the base64 SHA-1 of user key, user agent, timestamp
//! and secret key concatenated. The timestamp is regenerated per attempt.

use base64::prelude::*;
use chrono::Utc;
use sha1::{Digest, Sha1};

use crate::transport::RequestSigner;

/// Signs requests with an API key pair
#[derive(Clone)]
pub struct ApiSigner {
    user_key: String,
    secret_key: String,
    user_agent: String,
}

impl ApiSigner {
    /// Format of the signature timestamp
    pub const TIMESTAMP_FORMAT: &'static str = "%Y%m%d%H%M%S";

    pub fn new(user_key: &str, secret_key: &str, user_agent: &str) -> Self {
        Self {
            user_key: user_key.to_string(),
            secret_key: secret_key.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Header value for a given timestamp
    pub fn signature(&self, timestamp: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.user_key.as_bytes());
        hasher.update(self.user_agent.as_bytes());
        hasher.update(timestamp.as_bytes());
        hasher.update(self.secret_key.as_bytes());
        let digest = hasher.finalize();

        format!(
            "{}:{}:{}",
            self.user_key,
            timestamp,
            BASE64_STANDARD.encode(digest)
        )
    }

    fn timestamp_now() -> String {
        Utc::now().format(Self::TIMESTAMP_FORMAT).to_string()
    }
}

impl std::fmt::Debug for ApiSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSigner")
            .field("user_key", &self.user_key)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl RequestSigner for ApiSigner {
    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("User-Agent".to_string(), self.user_agent.clone()),
            (
                "X-Api-Signature".to_string(),
                self.signature(&Self::timestamp_now()),
            ),
        ]
    }
}
