//! Error types.

use std::net::IpAddr;
use trust_dns_server::client::rr::LowerName;
use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible acmezone error states outside of certificate issuance
/// (see [`IssueError`][crate::acme::IssueError] for those).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned when a domain name supplied to the [record store][crate::store] or the
    /// [management API][crate::api] can't be parsed as a DNS name.
    #[error("invalid domain name \"{0}\"")]
    InvalidDomain(String),

    /// Returned when a record is created for a domain that already has one.
    #[error("a record for \"{0}\" already exists")]
    RecordExists(LowerName),

    /// Returned when an update or certificate request names a domain with no record.
    #[error("no record for \"{0}\"")]
    RecordNotFound(LowerName),

    /// Returned when a record supplied to the [management API][crate::api] is well-formed JSON
    /// but can't be served, e.g. a DKIM key too long for a `TXT` record.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Returned when a [DKIM key pair][crate::dkim] can't be generated for a new record.
    #[error("can't generate DKIM key: {0}")]
    DkimKey(String),

    /// Returned when the [`Config::api_bind_addr`][`crate::config::Config::api_bind_addr`] is
    /// not a loopback address, or an address within a private network space. The management
    /// API can create, delete and re-issue certificates for any zone, so it is only ever
    /// served on private networks.
    #[error("API bind address ({0}) must be a loopback or private IP")]
    InsecureAPIBind(IpAddr),

    /// Returned when the configuration is well-formed but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when the configuration sources can't be read or merged.
    #[error("configuration error")]
    Figment(#[from] figment::Error),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when processing JSON from disk (e.g. loading a
    /// [record snapshot][crate::store::file::SnapshotFile]) fails due to invalid JSON content.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when the DNS server encounters a generic DNS protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),
}
