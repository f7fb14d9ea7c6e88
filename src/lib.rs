//! acmezone
//!
//! An authoritative DNS server for a set of managed domains that can also obtain TLS
//! certificates for them.
//!
//! Managed domains are answered from the [record store][store], with every supported record
//! type synthesized from one [`DomainRecord`][store::DomainRecord] per domain. Everything
//! else is forwarded to upstream resolvers, raced concurrently. Certificates are issued with
//! the [RFC-8555][RFC-8555] [DNS-01] challenge, whose token the server publishes in its own
//! zone data.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod acme;
pub mod api;
pub mod config;
pub mod dkim;
pub mod dns;
pub mod error;
pub mod store;

pub use acme::Issuer;
pub use api::new as new_http;
pub use config::{Config, Shared};
pub use dns::{new as new_dns, DnsServer};
pub use store::{DynRecordStore, FileRecordStore, InMemoryRecordStore};
