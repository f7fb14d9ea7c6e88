//! Authoritative DNS server with recursive fallback.
//!
//! # Managed zones
//!
//! Every [`DomainRecord`][crate::store::DomainRecord] in the [record store][crate::store] is a
//! managed zone. A question about the zone apex, or about any name below it, is answered
//! authoritatively with records synthesized from the stored domain (see [`synth`]):
//!
//! | Type  | Answer                                                                |
//! |-------|-----------------------------------------------------------------------|
//! | A     | each stored IPv4 address                                              |
//! | AAAA  | each stored IPv6 address                                              |
//! | TXT   | DKIM key on `mail.`, DMARC policy on `_dmarc.`, challenge tokens on `_acme-challenge.`, SPF otherwise |
//! | MX    | `mail.<zone>`                                                         |
//! | NS    | one per configured name server label                                  |
//! | SOA   | the zone's SOA, also the fallback for any other type                  |
//! | PTR   | the first IPv4 address in `in-addr.arpa` form                         |
//! | CAA   | `issue` for the configured CA                                         |
//!
//! E.g. once `example.com` has been created through the [management API][crate::api]:
//!
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 +short www.example.com A
//! 93.184.216.34
//! ❯ dig @127.0.0.1 -p 5353 +short _dmarc.example.com TXT
//! "v=DMARC1; p=reject; sp=reject; adkim=s; aspf=s; rua=mailto:admin@example.com"
//! ```
//!
//! # Everything else
//!
//! Questions about unmanaged names are raced across the configured
//! [`upstreams`][crate::config::Config::upstreams] (see [`upstream`]) when
//! [`recursion`][crate::config::Config::recursion] is enabled, and refused otherwise. If no
//! upstream answers successfully within
//! [`upstream_timeout`][crate::config::Config::upstream_timeout] the reply is `SERVFAIL`.
//!
//! Anything that isn't a standard query gets `NOTIMP`.

mod handlers;
pub mod resolve;
pub mod server;
pub mod synth;
pub mod upstream;

pub use server::{new, DnsServer};
