//! HTTP API for managing domain records and issuing certificates.
//!
//! The API performs no authentication. It is only ever bound to loopback or private
//! addresses (see [`Config::api_bind_addr`][crate::config::Config::api_bind_addr]).
//!
//! Errors are returned as a JSON body of the form `{"error": "..."}`.
//!
//! # API Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the service is operational.
//!
//! ## `/records` (GET)
//!
//!   Returns every stored record as a JSON array, ordered by domain.
//!
//! ## `/records` (POST)
//!
//!   Creates a record. Expects a JSON request body of the form:
//!
//!   ```json
//!   {
//!     "domain": "example.com",
//!     "ipv4_addresses": ["93.184.216.34"],
//!     "ipv6_addresses": [],
//!     "dkim_public_key": "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA...",
//!     "dkim_private_key": "..."
//!   }
//!   ```
//!
//!   Only `domain` is required. When neither DKIM key is given, a fresh
//!   [2048-bit RSA key pair][crate::dkim] is generated and stored on the record. When
//!   [`derive_ipv6`][crate::config::Config::derive_ipv6] is enabled and no IPv6 addresses are
//!   given, the IPv4-mapped form of each IPv4 address is served for `AAAA` queries.
//!
//!   Returns HTTP 201 (Created) with the stored record, HTTP 400 (Bad Request) for an invalid
//!   domain or a DKIM key too long to publish, and HTTP 409 (Conflict) if the domain already
//!   has a record.
//!
//! ## `/records/:domain` (GET, PUT, DELETE)
//!
//!   `GET` returns the record for `domain`, or HTTP 404 (Not Found).
//!
//!   `PUT` replaces the addresses of an existing record, taking the same body as
//!   `POST /records` without `domain`. DKIM keys are only replaced when one is given.
//!   Challenge tokens and certificates are kept. Returns HTTP 404 (Not Found) if there is no
//!   record.
//!
//!   `DELETE` removes the record and returns HTTP 204 (No Content), whether or not it existed.
//!
//! ## `/records/:domain/certificate` (POST)
//!
//!   Runs the [issuance pipeline][crate::acme] for `domain` and returns the updated record,
//!   with `public_certificate_pem` and `private_key_pem` set.
//!
//!   Returns HTTP 400 (Bad Request) for an invalid domain, HTTP 504 (Gateway Timeout) if the
//!   CA did not finish within [`acme_timeout`][crate::config::Config::acme_timeout] and
//!   HTTP 502 (Bad Gateway) for any other issuance failure.
//!
//! ```bash
//! ❯ curl -X POST http://localhost:3000/records/example.com/certificate
//! ```

mod api_error;
mod model;
mod routes;
pub mod server;

pub use server::new;
