//! Upstream resolution for questions outside the zone.
//!
//! Questions are relayed verbatim over UDP; a truncated reply is retried
//! over TCP with the usual two-byte length framing. Upstreams are tried in
//! order until one answers within the deadline.

use std::net::SocketAddr;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, warn};

use crate::error::Error;
use crate::metrics;

/// Largest reply accepted over either transport.
const MAX_MESSAGE_SIZE: usize = 65_535;

/// Relays DNS messages to a fixed set of upstream resolvers.
#[derive(Debug, Clone)]
pub struct Forwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
}

impl Forwarder {
    /// A forwarder over `upstreams`, each exchange bounded by `timeout`.
    pub fn new(upstreams: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { upstreams, timeout }
    }

    /// Whether any upstream is configured.
    pub fn is_empty(&self) -> bool {
        self.upstreams.is_empty()
    }

    /// Exchange `query` with the first upstream that answers. Falls back
    /// from UDP to TCP when the reply came back truncated.
    pub async fn exchange(&self, query: &Message) -> Result<Message, Error> {
        let bytes = query.to_vec()?;

        for upstream in &self.upstreams {
            match self.exchange_udp(&bytes, *upstream).await {
                Ok(reply) if reply.truncated() => {
                    debug!(%upstream, "UDP reply truncated, retrying over TCP");
                    match self.exchange_tcp(&bytes, *upstream).await {
                        Ok(reply) => {
                            metrics::record_forward(&upstream.to_string(), true);
                            return Ok(reply);
                        }
                        Err(e) => {
                            metrics::record_forward(&upstream.to_string(), false);
                            warn!(%upstream, error = %e, "TCP fallback failed");
                        }
                    }
                }
                Ok(reply) => {
                    metrics::record_forward(&upstream.to_string(), true);
                    return Ok(reply);
                }
                Err(e) => {
                    metrics::record_forward(&upstream.to_string(), false);
                    debug!(%upstream, error = %e, "upstream exchange failed");
                }
            }
        }

        Err(Error::Transport("no upstream resolver answered".to_string()))
    }

    async fn exchange_udp(&self, bytes: &[u8], upstream: SocketAddr) -> Result<Message, Error> {
        let bind: SocketAddr = if upstream.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(upstream).await?;

        tokio::time::timeout(self.timeout, socket.send(bytes))
            .await
            .map_err(|_| Error::Transport(format!("write timeout to {upstream}")))??;

        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let len = tokio::time::timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::Transport(format!("read timeout from {upstream}")))??;

        Ok(Message::from_vec(&buf[..len])?)
    }

    async fn exchange_tcp(&self, bytes: &[u8], upstream: SocketAddr) -> Result<Message, Error> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(upstream))
            .await
            .map_err(|_| Error::Transport(format!("connect timeout to {upstream}")))??;

        let mut framed = Vec::with_capacity(bytes.len() + 2);
        framed.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        framed.extend_from_slice(bytes);
        tokio::time::timeout(self.timeout, stream.write_all(&framed))
            .await
            .map_err(|_| Error::Transport(format!("write timeout to {upstream}")))??;

        let mut len_buf = [0u8; 2];
        tokio::time::timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| Error::Transport(format!("read timeout from {upstream}")))??;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut buf = vec![0u8; len];
        tokio::time::timeout(self.timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| Error::Transport(format!("read timeout from {upstream}")))??;

        Ok(Message::from_vec(&buf)?)
    }
}

/// Build a plain recursive query for `name` / `rtype`.
pub fn build_query(name: Name, rtype: RecordType) -> Message {
    let mut msg = Message::new();
    msg.set_id(rand_id());
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(rtype);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg
}

// Message ids only need to differ between concurrent queries from this
// process; clock-derived is enough without pulling in an RNG.
fn rand_id() -> u16 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos & 0xffff) as u16 ^ (nanos >> 16) as u16
}

/// Seed cluster peers from the NS records of `domain`, resolved through
/// the configured upstreams.
pub async fn discover_peers(forwarder: &Forwarder, domain: &str) -> Result<Vec<String>, Error> {
    let name = Name::from_ascii(&format!("{}.", domain.trim_end_matches('.')))?;
    let reply = forwarder
        .exchange(&build_query(name, RecordType::NS))
        .await?;

    let peers: Vec<String> = reply
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::NS(ns) => Some(ns.0.to_string().trim_end_matches('.').to_string()),
            _ => None,
        })
        .collect();

    if peers.is_empty() {
        return Err(Error::Config(format!("no NS records found for {domain}")));
    }
    Ok(peers)
}

/// Upstreams from /etc/resolv.conf, the default when none are configured.
pub fn from_resolv_conf() -> Result<Vec<SocketAddr>, Error> {
    parse_resolv_conf(&std::fs::read_to_string("/etc/resolv.conf")?)
}

fn parse_resolv_conf(contents: &str) -> Result<Vec<SocketAddr>, Error> {
    let mut upstreams = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let mut fields = line.split_whitespace();
        if fields.next() != Some("nameserver") {
            continue;
        }
        if let Some(addr) = fields.next() {
            // Entries are bare IPs; strip an IPv6 scope id if present.
            let addr = addr.split('%').next().unwrap_or(addr);
            match addr.parse::<std::net::IpAddr>() {
                Ok(ip) => upstreams.push(SocketAddr::new(ip, 53)),
                Err(_) => warn!(%addr, "skipping unparsable nameserver entry"),
            }
        }
    }
    Ok(upstreams)
}
