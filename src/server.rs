//! DNS server setup and lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, ResponseCode};
use hickory_proto::rr::{LowerName, Record, RecordType};
use hickory_server::authority::{AuthorityObject, Catalog, MessageResponseBuilder};
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authority::RegistryAuthority;
use crate::config::DnsConfig;
use crate::error::Error;
use crate::forward::Forwarder;
use crate::metrics::{self, QueryResult, Timer};
use crate::registry::Registry;

/// Interval for emitting registry metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit registry metrics.
async fn metrics_loop(registry: Registry, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                registry.emit_metrics();
                debug!(services = registry.len(), "emitted registry metrics");
            }
            _ = cancel.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Routes questions: zone names go to the catalog, everything else to the
/// upstream forwarder, or REFUSED when none is configured.
pub struct RequestRouter {
    catalog: Catalog,
    zone: LowerName,
    forwarder: Option<Forwarder>,
}

impl RequestRouter {
    /// A router over a built catalog.
    pub fn new(catalog: Catalog, zone: LowerName, forwarder: Option<Forwarder>) -> Self {
        Self {
            catalog,
            zone,
            forwarder,
        }
    }

    async fn forward<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        forwarder: &Forwarder,
    ) -> ResponseInfo {
        let timer = Timer::start();

        let info = match request.request_info() {
            Ok(info) => info,
            Err(_) => return empty_reply(request, response_handle).await,
        };

        let mut query = Message::new();
        query.set_id(request.id());
        query.set_message_type(hickory_proto::op::MessageType::Query);
        query.set_op_code(hickory_proto::op::OpCode::Query);
        query.set_recursion_desired(request.header().recursion_desired());
        query.add_query(info.query.original().clone());
        if let Some(edns) = request.edns() {
            query.set_edns(edns.clone());
        }

        match forwarder.exchange(&query).await {
            Ok(upstream) => {
                metrics::record_query("forward", QueryResult::Forwarded, timer.elapsed());

                let mut header = Header::response_from_request(request.header());
                header.set_recursion_available(true);
                header.set_authoritative(false);
                header.set_truncated(upstream.truncated());
                header.set_response_code(upstream.response_code());

                // The OPT pseudo-record is re-emitted by the response
                // builder; never copy it from the upstream additionals.
                let additionals: Vec<&Record> = upstream
                    .additionals()
                    .iter()
                    .filter(|r| r.record_type() != RecordType::OPT)
                    .collect();

                let response = MessageResponseBuilder::from_message_request(request).build(
                    header,
                    upstream.answers().iter(),
                    upstream.name_servers().iter(),
                    std::iter::empty::<&Record>(),
                    additionals.into_iter(),
                );
                match response_handle.send_response(response).await {
                    Ok(info) => info,
                    Err(e) => {
                        error!(error = %e, "failed to send forwarded response");
                        serve_failed()
                    }
                }
            }
            Err(e) => {
                warn!(query = %info.query.name(), error = %e, "upstream forward failed");
                metrics::record_query("forward", QueryResult::Error, timer.elapsed());
                error_reply(request, response_handle, ResponseCode::ServFail).await
            }
        }
    }
}

#[async_trait]
impl RequestHandler for RequestRouter {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let name = match request.request_info() {
            Ok(info) => info.query.name().clone(),
            // No question: an empty reply.
            Err(_) => return empty_reply(request, response_handle).await,
        };

        if self.zone.zone_of(&name) {
            return self.catalog.handle_request(request, response_handle).await;
        }

        match &self.forwarder {
            Some(forwarder) => self.forward(request, response_handle, forwarder).await,
            None => {
                debug!(query = %name, "question outside zone, refusing");
                metrics::record_query("other", QueryResult::Refused, Duration::ZERO);
                error_reply(request, response_handle, ResponseCode::Refused).await
            }
        }
    }
}

async fn empty_reply<R: ResponseHandler>(request: &Request, response_handle: R) -> ResponseInfo {
    error_reply(request, response_handle, ResponseCode::NoError).await
}

async fn error_reply<R: ResponseHandler>(
    request: &Request,
    mut response_handle: R,
    code: ResponseCode,
) -> ResponseInfo {
    let response =
        MessageResponseBuilder::from_message_request(request).error_msg(request.header(), code);
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            error!(error = %e, "failed to send response");
            serve_failed()
        }
    }
}

fn serve_failed() -> ResponseInfo {
    let mut header = Header::new();
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}

/// DNS server over the service registry.
pub struct DnsServer {
    config: DnsConfig,
    registry: Registry,
}

impl DnsServer {
    /// Create a new DNS server over `registry`.
    pub fn new(config: DnsConfig, registry: Registry) -> Self {
        Self { config, registry }
    }

    /// Run the DNS server until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Error> {
        info!(
            listen_addr = %self.config.listen_addr,
            domain = %self.config.domain,
            forwarders = self.config.forwarders.len(),
            "starting DNS server"
        );

        #[allow(unused_mut)]
        let mut authority = RegistryAuthority::new(self.config.clone(), self.registry.clone())?;

        #[cfg(feature = "dnssec")]
        if let Some(basename) = &self.config.dnssec_key {
            let zone = hickory_proto::rr::Name::from(authority.origin().clone());
            let key = crate::dnssec::ZoneKey::load(basename, &zone, self.config.soa.minimum)?;
            authority.set_zone_key(key);
            self.registry.set_dnssec(true);
            info!(%zone, "DNSSEC enabled");
        }

        let origin = authority.origin().clone();
        let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
        let mut catalog = Catalog::new();
        catalog.upsert(origin.clone(), vec![authority]);

        let forwarder = if self.config.forwarders.is_empty() {
            None
        } else {
            Some(Forwarder::new(
                self.config.forwarders.clone(),
                self.config.read_timeout,
            ))
        };

        let handler = RequestRouter::new(catalog, origin, forwarder);
        let mut server = ServerFuture::new(handler);

        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, self.config.read_timeout);

        let metrics_registry = self.registry.clone();
        let metrics_cancel = cancel.clone();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_registry, metrics_cancel).await;
        });

        self.registry.emit_metrics();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
            }
        }

        let _ = metrics_handle.await;
        info!("DNS server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoaConfig;

    #[test]
    fn test_server_creation() {
        let config = DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            domain: "skydns.local".to_string(),
            self_addrs: vec!["127.0.0.1".parse().unwrap()],
            forwarders: Vec::new(),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            round_robin: true,
            dnssec_key: None,
            soa: SoaConfig::default(),
        };

        let server = DnsServer::new(config, Registry::new());
        assert!(server.registry.is_empty());
    }
}
