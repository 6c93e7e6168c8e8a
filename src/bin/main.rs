//! skydns binary entry point.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use skydns::api::{self, ApiState};
use skydns::bus::{CommandBus, StandaloneBus};
use skydns::callback;
use skydns::config::{ClusterConfig, Config, DnsConfig, HttpConfig, SoaConfig, TelemetryConfig, TlsConfig};
use skydns::error::Error;
use skydns::forward::{self, Forwarder};
use skydns::{lease, telemetry, DnsServer, Registry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Distributed service discovery served over DNS.
#[derive(Parser, Debug)]
#[command(name = "skydns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Domain to anchor requests to.
    #[arg(long, env = "SKYDNS_DOMAIN", default_value = "skydns.local")]
    domain: String,

    /// IP:port to bind to for DNS (UDP and TCP).
    #[arg(long, env = "SKYDNS_DNS", default_value = "127.0.0.1:53")]
    dns: String,

    /// IP:port to bind to for HTTP.
    #[arg(long, env = "SKYDNS", default_value = "127.0.0.1:8080")]
    http: String,

    /// Data directory for the command log.
    #[arg(long, default_value = "./data")]
    data: PathBuf,

    /// Comma-separated cluster members to join.
    #[arg(long, default_value = "")]
    join: String,

    /// Seed cluster peers from an NS lookup of the domain instead of --join.
    #[arg(long)]
    discover: bool,

    /// Per-connection read timeout.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    rtimeout: Duration,

    /// Per-connection write timeout.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    wtimeout: Duration,

    /// Shared secret for mutating HTTP calls; empty disables auth.
    #[arg(long, default_value = "")]
    secret: String,

    /// Comma-separated upstream resolvers for non-local questions,
    /// e.g. 8.8.8.8:53,8.8.4.4:53. Defaults to /etc/resolv.conf.
    #[arg(long, default_value = "")]
    nameserver: String,

    /// Basename of the DNSSEC key file, e.g. Kskydns.local.+005+38250.
    #[arg(long, default_value = "")]
    dnssec: String,

    /// Disable round robin rotation of answer sets.
    #[arg(long = "no-round-robin")]
    no_round_robin: bool,

    /// TLS private key; together with --tls-pem enables HTTPS.
    #[arg(long = "tls-key")]
    tls_key: Option<PathBuf>,

    /// TLS certificate; together with --tls-key enables HTTPS.
    #[arg(long = "tls-pem")]
    tls_pem: Option<PathBuf>,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn parse_nameservers(list: &str) -> Result<Vec<SocketAddr>, Error> {
    let mut upstreams = Vec::new();
    for part in split_list(list) {
        if let Ok(addr) = part.parse::<SocketAddr>() {
            upstreams.push(addr);
        } else if let Ok(ip) = part.parse::<IpAddr>() {
            upstreams.push(SocketAddr::new(ip, 53));
        } else {
            return Err(Error::Config(format!("invalid nameserver address: {part}")));
        }
    }
    Ok(upstreams)
}

fn build_config(args: &Args) -> Result<Config, Error> {
    let dns_addr: SocketAddr = args
        .dns
        .parse()
        .map_err(|_| Error::Config(format!("invalid DNS bind address: {}", args.dns)))?;

    // The SKYDNS env var historically allowed a scheme prefix.
    let http = args
        .http
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let http_addr: SocketAddr = http
        .parse()
        .map_err(|_| Error::Config(format!("invalid HTTP bind address: {http}")))?;

    let forwarders = if args.nameserver.is_empty() {
        match forward::from_resolv_conf() {
            Ok(upstreams) => upstreams,
            Err(e) => {
                warn!(error = %e, "could not read /etc/resolv.conf, forwarding disabled");
                Vec::new()
            }
        }
    } else {
        parse_nameservers(&args.nameserver)?
    };

    let self_addrs = if dns_addr.ip().is_unspecified() {
        Vec::new()
    } else {
        vec![dns_addr.ip()]
    };

    let tls = match (&args.tls_key, &args.tls_pem) {
        (Some(key), Some(pem)) => Some(TlsConfig {
            key: key.clone(),
            pem: pem.clone(),
        }),
        (None, None) => None,
        _ => {
            return Err(Error::Config(
                "--tls-key and --tls-pem must be given together".to_string(),
            ))
        }
    };

    Ok(Config {
        dns: DnsConfig {
            listen_addr: dns_addr,
            domain: args.domain.trim_end_matches('.').to_string(),
            self_addrs,
            forwarders,
            read_timeout: args.rtimeout,
            write_timeout: args.wtimeout,
            round_robin: !args.no_round_robin,
            dnssec_key: (!args.dnssec.is_empty()).then(|| args.dnssec.clone()),
            soa: SoaConfig::for_domain(args.domain.trim_end_matches('.')),
        },
        http: HttpConfig {
            listen_addr: http_addr,
            secret: (!args.secret.is_empty()).then(|| args.secret.clone()),
            write_timeout: args.wtimeout,
            tls,
        },
        cluster: ClusterConfig {
            data_dir: args.data.clone(),
            join: split_list(&args.join),
            discover: args.discover,
        },
        telemetry: TelemetryConfig::default(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = build_config(&args)?;

    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        domain = %config.dns.domain,
        dns_addr = %config.dns.listen_addr,
        http_addr = %config.http.listen_addr,
        data_dir = %config.cluster.data_dir.display(),
        "starting skydns"
    );

    #[cfg(not(feature = "dnssec"))]
    if config.dns.dnssec_key.is_some() {
        return Err(Error::Config(
            "--dnssec given but skydns was built without the `dnssec` feature".to_string(),
        )
        .into());
    }

    // Coordinated shutdown on interrupt.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let callback_sink = callback::spawn_dispatcher(cancel.clone());
    let registry = Registry::with_callback_sink(callback_sink);

    // Resolve seed peers. Replication transports plug in behind the command
    // bus; this build runs a single replica.
    let mut peers = config.cluster.join.clone();
    if config.cluster.discover {
        let forwarder = Forwarder::new(config.dns.forwarders.clone(), config.dns.read_timeout);
        peers = forward::discover_peers(&forwarder, &config.dns.domain).await?;
        info!(peers = peers.len(), "discovered cluster peers");
    }
    if !peers.is_empty() {
        return Err(Error::Config(
            "no cluster transport in this build: run a single replica, or plug a \
             transport into the command bus"
                .to_string(),
        )
        .into());
    }

    let bus: Arc<dyn CommandBus> =
        Arc::new(StandaloneBus::open(&config.cluster.data_dir, registry.clone())?);

    let lease_handle = lease::spawn(registry.clone(), bus.clone(), cancel.clone());

    let dns_server = DnsServer::new(config.dns.clone(), registry.clone());
    let dns_cancel = cancel.clone();
    let dns_handle = tokio::spawn(async move {
        if let Err(e) = dns_server.run(dns_cancel).await {
            error!("DNS server error: {e}");
        }
    });

    let state = ApiState {
        registry,
        bus,
        secret: config.http.secret.clone(),
        write_timeout: config.http.write_timeout,
    };
    let result = api::serve(config.http.clone(), state, cancel.clone()).await;

    cancel.cancel();
    let _ = tokio::join!(dns_handle, lease_handle);

    if let Err(e) = result {
        error!("HTTP server error: {e}");
        return Err(e.into());
    }

    info!("skydns shutdown complete");
    Ok(())
}
