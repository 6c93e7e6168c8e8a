//! Shared test infrastructure for driving DNS queries through the catalog.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{AuthorityObject, Catalog, MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use skydns::authority::RegistryAuthority;
use skydns::config::{DnsConfig, SoaConfig};
use skydns::service::now_unix;
use skydns::{Registry, Service};

/// The zone every test serves.
pub const ZONE: &str = "skydns.local";

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `Catalog::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` into raw wire bytes, which are then
/// parsed back with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Config and registry builders ---

pub fn test_dns_config() -> DnsConfig {
    DnsConfig {
        listen_addr: "127.0.0.1:5353".parse().unwrap(),
        domain: ZONE.to_string(),
        self_addrs: vec!["127.0.0.1".parse().unwrap()],
        forwarders: Vec::new(),
        read_timeout: Duration::from_secs(2),
        write_timeout: Duration::from_secs(2),
        round_robin: false,
        dnssec_key: None,
        soa: SoaConfig::for_domain(ZONE),
    }
}

/// A live service announcement with the usual test attributes. Callers
/// override the fields a case cares about.
pub fn service(id: &str) -> Service {
    Service {
        id: id.to_string(),
        name: "TestService".to_string(),
        version: "1.0.0".to_string(),
        environment: "Production".to_string(),
        region: "East".to_string(),
        host: format!("server{id}"),
        port: 9000,
        ttl: 30,
        expires: now_unix() + 30,
        ..Default::default()
    }
}

/// Build a Catalog serving `registry` under the test zone.
pub fn build_catalog(config: DnsConfig, registry: Registry) -> Catalog {
    let authority =
        RegistryAuthority::new(config, registry).expect("failed to create RegistryAuthority");
    let origin = authority.origin().clone();
    let authority: Arc<dyn AuthorityObject> = Arc::new(authority);
    let mut catalog = Catalog::new();
    catalog.upsert(origin, vec![authority]);
    catalog
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Execute a query through the catalog and return the parsed response.
pub async fn execute_query(catalog: &Catalog, name: &str, record_type: RecordType) -> Message {
    let bytes = build_query_bytes(name, record_type, 42);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    let request = Request::new(msg, src, Protocol::Udp);
    let handler = TestResponseHandler::new();
    catalog.handle_request(&request, handler.clone()).await;
    handler.into_message()
}

// --- Response helpers ---

/// One SRV answer, flattened for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvAnswer {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
    pub ttl: u32,
}

/// Extract SRV answers from a response, sorted by (priority, port) so
/// assertions are independent of answer rotation.
pub fn extract_srv(msg: &Message) -> Vec<SrvAnswer> {
    let mut answers: Vec<SrvAnswer> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SRV(srv) => Some(SrvAnswer {
                priority: srv.priority(),
                weight: srv.weight(),
                port: srv.port(),
                target: srv.target().to_string(),
                ttl: r.ttl(),
            }),
            _ => None,
        })
        .collect();
    answers.sort_by_key(|a| (a.priority, a.port));
    answers
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}
