use crate::error::Error;
use figment::providers::{Env, Format, Json, Serialized};
use figment::Figment;
use ipnetwork::IpNetwork;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub type Shared = Arc<Config>;

/// Prefix of environment variables that override values from the config file, e.g.
/// `ACMEZONE_API_BIND_ADDR=127.0.0.1:3000` or `ACMEZONE_ZONE__CAA_ISSUER=pki.goog`.
pub const ENV_PREFIX: &str = "ACMEZONE_";

pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[serde_as]
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub dns_udp_bind_addr: SocketAddr,
    pub dns_tcp_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dns_tcp_timeout: Duration,
    pub api_bind_addr: SocketAddr,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub api_timeout: Duration,
    /// Where the record snapshot is kept. Records are only held in memory when unset.
    pub snapshot_path: Option<String>,
    /// Forward queries for unmanaged names to [`Config::upstreams`]. When disabled such
    /// queries are refused.
    pub recursion: bool,
    pub upstreams: Vec<SocketAddr>,
    /// Upper bound on the number of upstreams raced for one query.
    pub max_upstreams: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub upstream_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub shutdown_grace: Duration,
    pub acme_directory_url: String,
    #[serde(default)]
    pub acme_contact: Vec<String>,
    /// Deadline for one whole issuance attempt, polling included.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub acme_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub acme_poll_interval: Duration,
    /// Derive IPv4-mapped IPv6 addresses for records created without any IPv6 address.
    pub derive_ipv6: bool,
    pub zone: ZonePolicy,
}

/// Fixed values used when synthesizing records for every managed zone.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ZonePolicy {
    pub caa_issuer: String,
    pub mx_preference: u16,
    /// Labels prepended to the zone name to form its NS (and SOA MNAME) targets.
    pub name_servers: Vec<String>,
    /// Label prepended to the zone name to form the SOA RNAME.
    pub hostmaster: String,
    pub soa_serial: SoaSerial,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SoaSerial {
    /// The current UTC date as `YYYYMMDD`.
    Date,
    Fixed(u32),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dns_udp_bind_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            dns_tcp_bind_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            dns_tcp_timeout: Duration::from_secs(10),
            api_bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            api_timeout: Duration::from_secs(90),
            snapshot_path: None,
            recursion: true,
            upstreams: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([8, 8, 8, 8], 53)),
            ],
            max_upstreams: 4,
            upstream_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
            acme_directory_url: LETSENCRYPT_STAGING.to_string(),
            acme_contact: Vec::default(),
            acme_timeout: Duration::from_secs(60),
            acme_poll_interval: Duration::from_secs(2),
            derive_ipv6: false,
            zone: ZonePolicy::default(),
        }
    }
}

impl Default for ZonePolicy {
    fn default() -> Self {
        ZonePolicy {
            caa_issuer: "letsencrypt.org".to_string(),
            mx_preference: 10,
            name_servers: vec!["ns1".to_string(), "ns2".to_string()],
            hostmaster: "admin".to_string(),
            soa_serial: SoaSerial::Date,
        }
    }
}

lazy_static! {
    // NOTE(XXX): Once the "ip" feature has stabilized we can use Ipv6Addr.is_unique_local[0].
    //            Presently this feature is unstable so we home-roll. See also RFC 4193[1].
    // [0]: https://doc.rust-lang.org/std/net/struct.Ipv6Addr.html#method.is_unique_local
    // [1]: https://www.rfc-editor.org/rfc/rfc4193.html
    static ref IPV6_UNIQUE_LOCAL_NETWORK: IpNetwork = IpNetwork::from_str("fc00::/7").unwrap();
}

impl Config {
    /// Load the config from defaults, then the optional JSON file, then `ACMEZONE_`
    /// environment variables, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Figment`] if a source can't be read or a value has the wrong type,
    /// and the errors of [`Config::validate`].
    pub fn load(config_file: Option<&Path>) -> Result<Self, Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_file {
            figment = figment.merge(Json::file(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract and validate a config from an already assembled [`Figment`].
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_figment(figment: Figment) -> Result<Self, Error> {
        let conf: Config = figment.extract()?;
        conf.validate()?;
        Ok(conf)
    }

    /// # Errors
    ///
    /// Returns [`Error::InsecureAPIBind`] for a public API bind address, and
    /// [`Error::InvalidConfig`] when recursion is enabled without any upstream.
    pub fn validate(&self) -> Result<(), Error> {
        self.bind_addr_is_secure()?;
        if self.recursion && (self.upstreams.is_empty() || self.max_upstreams == 0) {
            return Err(Error::InvalidConfig(
                "recursion requires at least one upstream".to_string(),
            ));
        }
        if self.zone.name_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one name server label is required".to_string(),
            ));
        }
        Ok(())
    }

    /// The upstreams consulted for a single recursive query.
    #[must_use]
    pub fn raced_upstreams(&self) -> &[SocketAddr] {
        let n = self.upstreams.len().min(self.max_upstreams);
        &self.upstreams[..n]
    }

    fn bind_addr_is_secure(&self) -> Result<(), Error> {
        match self.api_bind_addr {
            SocketAddr::V4(v4_addr) => {
                let ip = v4_addr.ip();
                if !ip.is_loopback() && !ip.is_private() {
                    return Err(Error::InsecureAPIBind(IpAddr::V4(*ip)));
                }
                Ok(())
            }
            SocketAddr::V6(v6_addr) => {
                let ip = v6_addr.ip();
                if !ip.is_loopback() && !IPV6_UNIQUE_LOCAL_NETWORK.contains(IpAddr::V6(*ip)) {
                    return Err(Error::InsecureAPIBind(IpAddr::V6(*ip)));
                }
                Ok(())
            }
        }
    }
}
