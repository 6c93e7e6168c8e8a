//! Hickory DNS authority backed by the service registry.
//!
//! SRV (and ANY) questions are answered from the name tree: equal weights
//! split across the primary answer set at priority 10, and, when the
//! question pins a concrete region, matching services from other regions
//! are appended at priority 20 as cross-region fallback. The zone apex
//! serves A/AAAA (the server's own addresses), NS and SOA.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, NS, SOA, SRV};
use hickory_proto::rr::{LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::io;
use std::net::IpAddr;
use tracing::{debug, trace};

use crate::config::DnsConfig;
use crate::error::Error;
use crate::metrics::{self, QueryResult, Timer};
use crate::registry::Registry;
use crate::service::Service;
use crate::tree::is_wildcard;

/// Priority of answers in the queried region.
const PRIMARY_PRIORITY: u16 = 10;
/// Priority of cross-region fallback answers.
const FALLBACK_PRIORITY: u16 = 20;

/// Authority serving the registry under the configured zone.
pub struct RegistryAuthority {
    origin: LowerName,
    zone: String,
    registry: Registry,
    config: Arc<DnsConfig>,
    rotor: AtomicUsize,
    #[cfg(feature = "dnssec")]
    zone_key: Option<crate::dnssec::ZoneKey>,
}

impl RegistryAuthority {
    /// Create a new authority for the given configuration and registry.
    pub fn new(config: DnsConfig, registry: Registry) -> Result<Self, hickory_proto::ProtoError> {
        let zone = config.domain.trim_end_matches('.').to_lowercase();
        let origin = Name::from_ascii(&zone)?.into();

        Ok(Self {
            origin,
            zone,
            registry,
            config: Arc::new(config),
            rotor: AtomicUsize::new(0),
            #[cfg(feature = "dnssec")]
            zone_key: None,
        })
    }

    /// Install the zone's DNSSEC key material.
    #[cfg(feature = "dnssec")]
    pub fn set_zone_key(&mut self, key: crate::dnssec::ZoneKey) {
        self.zone_key = Some(key);
    }

    /// The registry lookup key for `name`: the labels beneath the zone,
    /// empty at the apex, `None` for names outside the zone.
    fn query_key(&self, name: &LowerName) -> Option<String> {
        let name = name.to_string();
        let name = name.trim_end_matches('.');
        if name == self.zone {
            return Some(String::new());
        }
        name.strip_suffix(&format!(".{}", self.zone))
            .map(String::from)
    }

    /// Offset to rotate an answer set of `len` by, advancing between
    /// queries unless round robin is disabled.
    fn rotation(&self, len: usize) -> usize {
        if self.config.round_robin && len > 1 {
            self.rotor.fetch_add(1, Ordering::Relaxed) % len
        } else {
            0
        }
    }

    /// The SRV answer set for `key`: the primary services plus, when the
    /// question names a concrete region, the cross-region fallback.
    fn srv_answers(&self, key: &str) -> Result<Vec<(u16, u16, Service)>, Error> {
        let primary = match self.registry.get(key) {
            Ok(services) => services,
            Err(Error::NotFound) => Vec::new(),
            Err(e) => return Err(e),
        };

        let weight = if primary.is_empty() {
            0
        } else {
            (100 / primary.len()) as u16
        };
        let mut answers: Vec<(u16, u16, Service)> = primary
            .iter()
            .map(|s| (PRIMARY_PRIORITY, weight, s.clone()))
            .collect();

        // Substitute a concrete region label with `any` and take what the
        // wider query adds on top of the primary set.
        let labels: Vec<&str> = if key.is_empty() {
            Vec::new()
        } else {
            key.split('.').collect()
        };
        if labels.len() >= 4 {
            let pos = labels.len() - 4;
            let region = labels[pos];
            if !is_wildcard(region) {
                let mut widened = labels.clone();
                widened[pos] = "any";
                let extended = match self.registry.get(&widened.join(".")) {
                    Ok(services) => services,
                    Err(Error::NotFound) => Vec::new(),
                    Err(e) => return Err(e),
                };
                if extended.len() > primary.len() {
                    let weight = (100 / (extended.len() - primary.len())) as u16;
                    for service in extended {
                        if service.region.to_lowercase() == region {
                            continue;
                        }
                        answers.push((FALLBACK_PRIORITY, weight, service));
                    }
                }
            }
        }

        if answers.is_empty() {
            return Err(Error::NotFound);
        }
        Ok(answers)
    }

    /// Build the SRV record set for a question name.
    fn build_srv_records(
        &self,
        name: Name,
        answers: &[(u16, u16, Service)],
    ) -> Result<RecordSet, Error> {
        let mut record_set = RecordSet::new(name.clone(), RecordType::SRV, 0);

        // Rotate within the primary set only; fallback answers keep their
        // place behind it.
        let primary_len = answers
            .iter()
            .filter(|(priority, _, _)| *priority == PRIMARY_PRIORITY)
            .count();
        let offset = self.rotation(primary_len);

        for i in 0..answers.len() {
            let (priority, weight, service) = if i < primary_len {
                &answers[(i + offset) % primary_len]
            } else {
                &answers[i]
            };
            let target = Name::from_ascii(&format!("{}.", service.host))?;
            let mut record = Record::from_rdata(
                name.clone(),
                service.ttl,
                RData::SRV(SRV::new(*priority, *weight, service.port, target)),
            );
            record.set_dns_class(hickory_proto::rr::DNSClass::IN);
            record_set.insert(record, 0);
        }

        Ok(record_set)
    }

    /// Build apex address records for the requested family. `None` when no
    /// configured address matches the family.
    fn build_apex_addrs(&self, name: Name, rtype: RecordType) -> Option<RecordSet> {
        let mut addrs: Vec<IpAddr> = self
            .config
            .self_addrs
            .iter()
            .copied()
            .filter(|ip| match rtype {
                RecordType::A => ip.is_ipv4(),
                _ => ip.is_ipv6(),
            })
            .collect();
        if addrs.is_empty() {
            return None;
        }
        let offset = self.rotation(addrs.len());
        addrs.rotate_left(offset);

        let mut record_set = RecordSet::new(name.clone(), rtype, 0);
        for ip in addrs {
            let rdata = match ip {
                IpAddr::V4(v4) => RData::A(A::from(v4)),
                IpAddr::V6(v6) => RData::AAAA(AAAA::from(v6)),
            };
            let mut record = Record::from_rdata(name.clone(), self.config.soa.minimum, rdata);
            record.set_dns_class(hickory_proto::rr::DNSClass::IN);
            record_set.insert(record, 0);
        }
        Some(record_set)
    }

    /// Build the SOA record for this zone.
    fn build_soa_record(&self) -> RecordSet {
        let soa = SOA::new(
            Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root()),
            Name::from_ascii(&self.config.soa.rname).unwrap_or_else(|_| Name::root()),
            self.registry.serial(),
            self.config.soa.refresh as i32,
            self.config.soa.retry as i32,
            self.config.soa.expire as i32,
            self.config.soa.minimum,
        );

        let name = Name::from(self.origin.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::SOA, 0);
        let mut record = Record::from_rdata(name, self.config.soa.minimum, RData::SOA(soa));
        record.set_dns_class(hickory_proto::rr::DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    /// Build the NS record set for this zone.
    fn build_ns_record(&self) -> RecordSet {
        let name = Name::from(self.origin.clone());
        let ns_name = Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root());

        let mut record_set = RecordSet::new(name.clone(), RecordType::NS, 0);
        let mut record =
            Record::from_rdata(name, self.config.soa.minimum, RData::NS(NS(ns_name)));
        record.set_dns_class(hickory_proto::rr::DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    fn break_with(
        &self,
        rtype: &str,
        result: QueryResult,
        timer: Timer,
        record_set: RecordSet,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<LookupRecords> {
        metrics::record_query(rtype, result, timer.elapsed());
        LookupControlFlow::Break(Ok(LookupRecords::new(
            lookup_options,
            Arc::new(record_set),
        )))
    }
}

#[async_trait]
impl Authority for RegistryAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let rtype_str = format!("{rtype:?}");

        let Some(key) = self.query_key(name) else {
            // Outside the zone; the request router forwards these before
            // they reach us.
            metrics::record_query(&rtype_str, QueryResult::Refused, timer.elapsed());
            return LookupControlFlow::Break(Err(LookupError::ResponseCode(
                ResponseCode::Refused,
            )));
        };

        trace!(name = %name, key = %key, rtype = ?rtype, "registry lookup");

        match rtype {
            RecordType::SRV | RecordType::ANY => match self.srv_answers(&key) {
                Ok(answers) => {
                    let dns_name = Name::from(name.clone());
                    metrics::record_srv_answers(answers.len());
                    match self.build_srv_records(dns_name, &answers) {
                        Ok(record_set) => self.break_with(
                            &rtype_str,
                            QueryResult::Success,
                            timer,
                            record_set,
                            lookup_options,
                        ),
                        Err(e) => {
                            debug!(name = %name, error = %e, "failed to build SRV answers");
                            metrics::record_query(&rtype_str, QueryResult::Error, timer.elapsed());
                            LookupControlFlow::Break(Err(LookupError::from(io::Error::other(
                                e.to_string(),
                            ))))
                        }
                    }
                }
                Err(Error::NotFound) => {
                    debug!(name = %name, "SRV lookup: no matching services");
                    metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                    LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
                }
                Err(e) => {
                    debug!(name = %name, error = %e, "SRV lookup failed");
                    metrics::record_query(&rtype_str, QueryResult::Error, timer.elapsed());
                    LookupControlFlow::Break(Err(LookupError::from(io::Error::other(
                        e.to_string(),
                    ))))
                }
            },
            RecordType::A | RecordType::AAAA if key.is_empty() => {
                match self.build_apex_addrs(Name::from(name.clone()), rtype) {
                    Some(record_set) => self.break_with(
                        &rtype_str,
                        QueryResult::Success,
                        timer,
                        record_set,
                        lookup_options,
                    ),
                    None => {
                        metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                        LookupControlFlow::Break(Err(LookupError::ResponseCode(
                            ResponseCode::NoError,
                        )))
                    }
                }
            }
            RecordType::NS if key.is_empty() => self.break_with(
                &rtype_str,
                QueryResult::Success,
                timer,
                self.build_ns_record(),
                lookup_options,
            ),
            RecordType::SOA => self.break_with(
                &rtype_str,
                QueryResult::Success,
                timer,
                self.build_soa_record(),
                lookup_options,
            ),
            #[cfg(feature = "dnssec")]
            RecordType::DNSKEY if key.is_empty() => match &self.zone_key {
                Some(zone_key) => self.break_with(
                    &rtype_str,
                    QueryResult::Success,
                    timer,
                    zone_key.dnskey_record_set(&Name::from(self.origin.clone())),
                    lookup_options,
                ),
                None => {
                    metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                    LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
                }
            },
            _ => {
                trace!(name = %name, rtype = ?rtype, "unsupported record type");
                metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
            }
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    #[cfg(not(feature = "dnssec"))]
    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    /// Denial of existence: one NSEC spanning the gap around the missing
    /// name, derived from the registry's denial index.
    #[cfg(feature = "dnssec")]
    async fn get_nsec_records(
        &self,
        name: &LowerName,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let Some(key) = self.query_key(name) else {
            return LookupControlFlow::Break(Err(LookupError::ResponseCode(
                ResponseCode::Refused,
            )));
        };

        let (prev, next) = self.registry.neighbors(&key);
        match crate::dnssec::build_nsec(
            &prev,
            &next,
            &Name::from(self.origin.clone()),
            self.config.soa.minimum,
        ) {
            Ok(record_set) => LookupControlFlow::Break(Ok(LookupRecords::new(
                lookup_options,
                Arc::new(record_set),
            ))),
            Err(e) => {
                debug!(name = %name, error = %e, "failed to build NSEC");
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::ServFail)))
            }
        }
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates never bypass the command log.
        Err(ResponseCode::NotImp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoaConfig;
    use crate::service::now_unix;
    use std::time::Duration;

    fn test_config() -> DnsConfig {
        DnsConfig {
            listen_addr: "127.0.0.1:5353".parse().unwrap(),
            domain: "skydns.local".to_string(),
            self_addrs: vec!["127.0.0.1".parse().unwrap()],
            forwarders: Vec::new(),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
            round_robin: false,
            dnssec_key: None,
            soa: SoaConfig::default(),
        }
    }

    fn make_service(id: &str, region: &str, host: &str, port: u16, ttl: u32) -> Service {
        Service {
            id: id.to_string(),
            name: "TestService".to_string(),
            version: "1.0.0".to_string(),
            environment: "Production".to_string(),
            region: region.to_string(),
            host: host.to_string(),
            port,
            ttl,
            expires: now_unix() + ttl as i64,
            ..Default::default()
        }
    }

    fn authority_with(services: &[Service]) -> RegistryAuthority {
        let registry = Registry::new();
        for s in services {
            registry.add(s.clone()).unwrap();
        }
        RegistryAuthority::new(test_config(), registry).unwrap()
    }

    #[test]
    fn test_query_key_strips_zone() {
        let authority = authority_with(&[]);
        let name: LowerName = Name::from_ascii("testservice.production.skydns.local.")
            .unwrap()
            .into();
        assert_eq!(
            authority.query_key(&name).as_deref(),
            Some("testservice.production")
        );

        let apex: LowerName = Name::from_ascii("skydns.local.").unwrap().into();
        assert_eq!(authority.query_key(&apex).as_deref(), Some(""));

        let outside: LowerName = Name::from_ascii("example.com.").unwrap().into();
        assert_eq!(authority.query_key(&outside), None);
    }

    #[test]
    fn test_srv_answers_split_weight() {
        let authority = authority_with(&[
            make_service("100", "East", "server1", 9000, 30),
            make_service("101", "East", "server2", 9001, 31),
            make_service("102", "East", "server3", 9002, 32),
        ]);
        let answers = authority.srv_answers("testservice.production").unwrap();
        assert_eq!(answers.len(), 3);
        for (priority, weight, _) in &answers {
            assert_eq!(*priority, PRIMARY_PRIORITY);
            assert_eq!(*weight, 33);
        }
    }

    #[test]
    fn test_srv_answers_cross_region_fallback() {
        let authority = authority_with(&[
            make_service("100", "East", "server1", 9000, 30),
            make_service("101", "West", "server2", 9001, 31),
            make_service("102", "West", "server3", 9002, 32),
        ]);
        let answers = authority
            .srv_answers("east.any.testservice.production")
            .unwrap();
        assert_eq!(answers.len(), 3);

        let primary: Vec<_> = answers
            .iter()
            .filter(|(p, _, _)| *p == PRIMARY_PRIORITY)
            .collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].1, 100);
        assert_eq!(primary[0].2.region, "East");

        let fallback: Vec<_> = answers
            .iter()
            .filter(|(p, _, _)| *p == FALLBACK_PRIORITY)
            .collect();
        assert_eq!(fallback.len(), 2);
        for (_, weight, service) in &fallback {
            assert_eq!(*weight, 50);
            assert_eq!(service.region, "West");
        }
    }

    #[test]
    fn test_srv_answers_no_fallback_for_wildcard_region() {
        let authority = authority_with(&[
            make_service("100", "East", "server1", 9000, 30),
            make_service("101", "West", "server2", 9001, 31),
        ]);
        let answers = authority
            .srv_answers("any.any.testservice.production")
            .unwrap();
        assert_eq!(answers.len(), 2);
        assert!(answers.iter().all(|(p, _, _)| *p == PRIMARY_PRIORITY));
    }

    #[test]
    fn test_srv_answers_not_found() {
        let authority = authority_with(&[make_service("100", "East", "server1", 9000, 30)]);
        assert!(matches!(
            authority.srv_answers("unknown.production"),
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_lookup_srv_success() {
        let authority = authority_with(&[make_service("100", "East", "web1.site.com", 80, 4000)]);
        let name: LowerName = Name::from_ascii("testservice.production.skydns.local.")
            .unwrap()
            .into();
        let result = authority
            .lookup(&name, RecordType::SRV, LookupOptions::default())
            .await;
        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_nxdomain() {
        let authority = authority_with(&[]);
        let name: LowerName = Name::from_ascii("nothing.production.skydns.local.")
            .unwrap()
            .into();
        let result = authority
            .lookup(&name, RecordType::SRV, LookupOptions::default())
            .await;
        assert!(matches!(
            result,
            LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
        ));
    }

    #[tokio::test]
    async fn test_lookup_apex_a_and_soa() {
        let authority = authority_with(&[]);
        let apex: LowerName = Name::from_ascii("skydns.local.").unwrap().into();

        let result = authority
            .lookup(&apex, RecordType::A, LookupOptions::default())
            .await;
        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));

        let result = authority
            .lookup(&apex, RecordType::SOA, LookupOptions::default())
            .await;
        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));

        let result = authority
            .lookup(&apex, RecordType::NS, LookupOptions::default())
            .await;
        assert!(matches!(result, LookupControlFlow::Break(Ok(_))));
    }
}
