//! Resource identity: the email address that correlates desired and actual records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a string is not a usable resource identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("identity is empty")]
    Empty,
    #[error("identity {0:?} must have the form local@domain")]
    Malformed(String),
}

/// Unique key for one manageable account or alias (`local@domain`)
///
/// Identities are lower-cased on construction, so `Info@Example.com` and
/// `info@example.com` name the same resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// Parse and normalize an address
    pub fn parse(address: &str) -> Result<Self, IdentityError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(IdentityError::Empty);
        }

        let Some((local, domain)) = address.split_once('@') else {
            return Err(IdentityError::Malformed(address.to_string()));
        };

        let valid_part = |part: &str| {
            !part.is_empty() && !part.contains(['@', '/', '?', '#']) && !part.contains(char::is_whitespace)
        };
        if !valid_part(local) || !valid_part(domain) || !domain.contains('.') {
            return Err(IdentityError::Malformed(address.to_string()));
        }

        Ok(Self(address.to_lowercase()))
    }

    /// Build an identity from a name that may or may not carry the domain
    pub fn in_domain(name: &str, domain: &str) -> Result<Self, IdentityError> {
        if name.contains('@') {
            Self::parse(name)
        } else {
            Self::parse(&format!("{}@{}", name, domain))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mailbox/alias name without the domain
    pub fn local_part(&self) -> &str {
        self.0.split_once('@').map(|(local, _)| local).unwrap_or(&self.0)
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, domain)| domain).unwrap_or("")
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourceIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceIdentity {
    type Error = IdentityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceIdentity> for String {
    fn from(id: ResourceIdentity) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lowercases() {
        let id = ResourceIdentity::parse("  Info@Example.COM ").unwrap();
        assert_eq!(id.as_str(), "info@example.com");
        assert_eq!(id.local_part(), "info");
        assert_eq!(id.domain(), "example.com");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(ResourceIdentity::parse(""), Err(IdentityError::Empty));
        assert!(ResourceIdentity::parse("no-at-sign").is_err());
        assert!(ResourceIdentity::parse("@example.com").is_err());
        assert!(ResourceIdentity::parse("user@").is_err());
        assert!(ResourceIdentity::parse("a@b@example.com").is_err());
        assert!(ResourceIdentity::parse("user@localhost").is_err());
        assert!(ResourceIdentity::parse("us er@example.com").is_err());
        assert!(ResourceIdentity::parse("user/../x@example.com").is_err());
    }

    #[test]
    fn test_in_domain() {
        let bare = ResourceIdentity::in_domain("Sales", "example.com").unwrap();
        assert_eq!(bare.as_str(), "sales@example.com");

        let full = ResourceIdentity::in_domain("sales@example.com", "ignored.org").unwrap();
        assert_eq!(full.as_str(), "sales@example.com");
    }

    #[test]
    fn test_serde_validates() {
        let id: ResourceIdentity = serde_json::from_str("\"A@X.com\"").unwrap();
        assert_eq!(id.as_str(), "a@x.com");
        assert!(serde_json::from_str::<ResourceIdentity>("\"nope\"").is_err());
    }
}
