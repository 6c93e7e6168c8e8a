//! Configuration types for skydns.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS server configuration.
    pub dns: DnsConfig,

    /// HTTP control surface configuration.
    pub http: HttpConfig,

    /// Cluster / replication configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Address for the DNS server to listen on (UDP and TCP).
    pub listen_addr: SocketAddr,

    /// Zone suffix requests are anchored to (e.g. "skydns.local").
    pub domain: String,

    /// Addresses served for A/AAAA questions at the zone apex.
    #[serde(default)]
    pub self_addrs: Vec<IpAddr>,

    /// Upstream resolvers for questions outside the zone. Empty means
    /// out-of-zone questions are refused.
    #[serde(default)]
    pub forwarders: Vec<SocketAddr>,

    /// Per-connection read deadline.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Per-connection write deadline.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Rotate answer ordering between queries.
    #[serde(default = "default_true")]
    pub round_robin: bool,

    /// Basename of the DNSSEC key file pair enabling online signing.
    #[serde(default)]
    pub dnssec_key: Option<String>,

    /// SOA record configuration.
    #[serde(default)]
    pub soa: SoaConfig,
}

/// Minimal serde bridge for humantime-formatted durations ("2s", "500ms").
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// HTTP control surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address for the HTTP server to listen on.
    pub listen_addr: SocketAddr,

    /// Shared secret required in the `Authorization` header of mutating
    /// calls. `None` disables authentication.
    #[serde(default)]
    pub secret: Option<String>,

    /// Write deadline applied to command submission.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Serve HTTPS with this key/certificate pair.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS material for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM private key path.
    pub key: PathBuf,
    /// PEM certificate path.
    pub pem: PathBuf,
}

/// Cluster / replication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Directory holding the command log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seed peers to join.
    #[serde(default)]
    pub join: Vec<String>,

    /// Seed peers from an NS lookup of the domain instead of `join`.
    #[serde(default)]
    pub discover: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            join: Vec::new(),
            discover: false,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g. "info", "skydns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

/// SOA (Start of Authority) record configuration. The `mname` also serves
/// as the zone's NS target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaConfig {
    /// Primary nameserver hostname.
    pub mname: String,

    /// Admin email in DNS format ("admin.example.com" for admin@example.com).
    pub rname: String,

    /// Refresh interval in seconds.
    #[serde(default = "default_refresh")]
    pub refresh: u32,

    /// Retry interval in seconds.
    #[serde(default = "default_retry")]
    pub retry: u32,

    /// Expire time in seconds.
    #[serde(default = "default_expire")]
    pub expire: u32,

    /// Minimum / negative-answer TTL in seconds.
    #[serde(default = "default_minimum")]
    pub minimum: u32,
}

impl SoaConfig {
    /// SOA defaults anchored to the zone: `ns1.<domain>` / `hostmaster.<domain>`.
    pub fn for_domain(domain: &str) -> Self {
        Self {
            mname: format!("ns1.{domain}"),
            rname: format!("hostmaster.{domain}"),
            ..Default::default()
        }
    }
}

impl Default for SoaConfig {
    fn default() -> Self {
        Self {
            mname: "ns1.skydns.local".to_string(),
            rname: "hostmaster.skydns.local".to_string(),
            refresh: default_refresh(),
            retry: default_retry(),
            expire: default_expire(),
            minimum: default_minimum(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh() -> u32 {
    3600
}

fn default_retry() -> u32 {
    600
}

fn default_expire() -> u32 {
    604800
}

fn default_minimum() -> u32 {
    60
}
