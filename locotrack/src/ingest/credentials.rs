//! Receiver-side table of pre-shared keys.
//!
//! Configured as a list of `host:id:key` entries separated by commas,
//! whitespace or newlines:
//!
//! ```text
//! psk = phone:1:s3cret, tablet:2:an0ther
//! ```
//!
//! The key is everything after the second colon, so keys may themselves
//! contain colons.

use std::collections::HashMap;

use thiserror::Error;

/// Credentials of one sending host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCredential {
    /// Numeric id recorded with every stored fix.
    pub host_id: i32,
    /// Pre-shared key used to verify datagram signatures.
    pub psk: String,
}

/// Error parsing a credential entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialParseError {
    #[error("entry '{0}' is not of the form host:id:key")]
    Malformed(String),

    #[error("entry '{entry}' has a non-numeric host id")]
    BadHostId { entry: String },

    #[error("host '{0}' is listed more than once")]
    Duplicate(String),
}

/// Mapping hostname → credentials, immutable once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialTable {
    hosts: HashMap<String, HostCredential>,
}

impl CredentialTable {
    /// Parse a `host:id:key` list.
    pub fn parse(list: &str) -> Result<Self, CredentialParseError> {
        let mut table = Self::default();

        for entry in list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let mut parts = entry.splitn(3, ':');
            let (host, id, psk) = match (parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(i), Some(k)) if !h.is_empty() && !k.is_empty() => (h, i, k),
                _ => return Err(CredentialParseError::Malformed(entry.to_string())),
            };
            let host_id = id.parse().map_err(|_| CredentialParseError::BadHostId {
                entry: entry.to_string(),
            })?;

            if table.hosts.contains_key(host) {
                return Err(CredentialParseError::Duplicate(host.to_string()));
            }
            table.insert(
                host,
                HostCredential {
                    host_id,
                    psk: psk.to_string(),
                },
            );
        }

        Ok(table)
    }

    pub fn insert(&mut self, hostname: impl Into<String>, credential: HostCredential) {
        self.hosts.insert(hostname.into(), credential);
    }

    pub fn get(&self, hostname: &str) -> Option<&HostCredential> {
        self.hosts.get(hostname)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
