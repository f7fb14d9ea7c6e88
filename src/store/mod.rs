//! Domain record storage.
//!
//! Every zone served authoritatively is described by one [`DomainRecord`], keyed by its
//! fully qualified, lowercase domain name. The [DNS server][crate::dns] reads records to
//! synthesize answers, the [management API][crate::api] creates, updates and deletes them,
//! and the [issuance pipeline][crate::acme] writes DNS-01 challenge tokens and issued
//! certificates into them.
//!
//! Two implementations of [`RecordStore`] are provided, [`memory::InMemoryRecordStore`] and
//! [`file::FileRecordStore`]. The former is not durable across restarts. The latter writes a
//! JSON snapshot of every record after each update and loads it again on startup.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use trust_dns_server::client::rr::{LowerName, Name};

pub mod file;
pub mod memory;

#[allow(clippy::module_name_repetitions)]
pub use file::FileRecordStore;
#[allow(clippy::module_name_repetitions)]
pub use memory::InMemoryRecordStore;

/// `DynRecordStore` is a type alias for a [`RecordStore`] shared between the DNS server, the
/// management API and the issuance pipeline.
#[allow(clippy::module_name_repetitions)]
pub type DynRecordStore = Arc<dyn RecordStore + Send + Sync>;

/// The data served for one managed domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub domain: LowerName,
    #[serde(default)]
    pub ipv4_addresses: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ipv6_addresses: Vec<Ipv6Addr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dkim_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dkim_private_key: Option<String>,
    /// DNS-01 validation values served under `_acme-challenge.<domain>`. Empty when no
    /// challenge is pending.
    #[serde(default)]
    pub acme_challenge_tokens: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_certificate_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_pem: Option<String>,
}

impl DomainRecord {
    /// An empty record for `domain`, used as a placeholder before any data is known.
    #[must_use]
    pub fn new(domain: LowerName) -> Self {
        DomainRecord {
            domain,
            ipv4_addresses: Vec::default(),
            ipv6_addresses: Vec::default(),
            dkim_public_key: None,
            dkim_private_key: None,
            acme_challenge_tokens: Vec::default(),
            public_certificate_pem: None,
            private_key_pem: None,
        }
    }

    /// The domain without its trailing dot, e.g. `example.com`.
    #[must_use]
    pub fn bare_domain(&self) -> String {
        self.domain.to_string().trim_end_matches('.').to_string()
    }
}

/// Normalize a user supplied domain name into the form used as a [`RecordStore`] key:
/// lowercase and fully qualified with exactly one trailing dot.
///
/// # Errors
///
/// Returns [`Error::InvalidDomain`] if the name is empty or not a valid DNS name.
pub fn normalize_domain(domain: &str) -> Result<LowerName, Error> {
    let trimmed = domain.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(Error::InvalidDomain(domain.to_string()));
    }
    let name = Name::from_ascii(format!("{trimmed}."))
        .map_err(|_| Error::InvalidDomain(domain.to_string()))?;
    Ok(LowerName::new(&name))
}

/// An async trait describing concurrent storage of [`DomainRecord`]s keyed by domain.
///
/// Implementations hand out copies, never references into their storage, so a reader can
/// never observe a record half way through an update.
#[async_trait::async_trait]
pub trait RecordStore {
    /// Get the record for exactly `domain`, if any. No subdomain matching is performed.
    async fn get(&self, domain: &LowerName) -> Option<DomainRecord>;

    /// Insert or replace the record keyed by `record.domain`.
    async fn set(&self, record: DomainRecord) -> Result<(), Error>;

    /// Remove the record for `domain`. Removing an absent domain is a no-op.
    async fn delete(&self, domain: &LowerName) -> Result<(), Error>;

    /// A point-in-time copy of every record.
    async fn list(&self) -> Vec<DomainRecord>;

    /// Replace the store contents with `records`.
    async fn load(&self, records: Vec<DomainRecord>) -> Result<(), Error>;
}
