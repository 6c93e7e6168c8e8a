//! DNSSEC answer material.
//!
//! The registry keeps the denial index; this module turns its output into
//! records: the zone's DNSKEY loaded from a BIND-style public key file, and
//! NSEC records spanning the gap around a denied name. RRSIG production is
//! behind [`AnswerSigner`] so the crypto lives with the key owner, not here.

use std::fs;
use std::path::Path;

use base64::Engine;
use hickory_proto::dnssec::rdata::{DNSSECRData, DNSKEY, NSEC};
use hickory_proto::dnssec::{Algorithm, PublicKeyBuf};
use hickory_proto::rr::{Name, RData, Record, RecordSet, RecordType};

use crate::error::Error;

/// Produces RRSIGs covering answer record sets. Implementations hold the
/// private key; the engine only attaches whatever they return.
pub trait AnswerSigner: Send + Sync {
    /// Sign `rrset`, returning the covering RRSIG record, or `None` when
    /// the set cannot be signed.
    fn sign(&self, rrset: &RecordSet) -> Option<Record>;
}

/// The zone's public key, served for DNSKEY questions at the apex.
#[derive(Debug, Clone)]
pub struct ZoneKey {
    dnskey: DNSKEY,
    ttl: u32,
}

impl ZoneKey {
    /// Load `<basename>.key`, a single BIND public key line:
    /// `<zone>. IN DNSKEY <flags> <protocol> <algorithm> <base64...>`.
    ///
    /// The owner name must match the served zone.
    pub fn load(basename: &str, zone: &Name, ttl: u32) -> Result<Self, Error> {
        let path = format!("{basename}.key");
        let contents = fs::read_to_string(Path::new(&path))?;
        Self::parse(&contents, zone, ttl)
            .ok_or_else(|| Error::Config(format!("no DNSKEY for zone {zone} in {path}")))
    }

    fn parse(contents: &str, zone: &Name, ttl: u32) -> Option<Self> {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            // owner [ttl] IN DNSKEY flags protocol algorithm key...
            let dnskey_at = fields.iter().position(|f| *f == "DNSKEY")?;
            if fields.len() < dnskey_at + 4 {
                continue;
            }
            let owner = Name::from_ascii(fields[0]).ok()?;
            if owner.to_lowercase() != zone.to_lowercase() {
                continue;
            }
            let flags: u16 = fields[dnskey_at + 1].parse().ok()?;
            let algorithm = Algorithm::from_u8(fields[dnskey_at + 3].parse().ok()?);
            let key_b64: String = fields[dnskey_at + 4..].concat();
            let key_bytes = base64::engine::general_purpose::STANDARD
                .decode(key_b64)
                .ok()?;

            let dnskey = DNSKEY::new(
                flags & 0x0100 != 0,
                flags & 0x0001 != 0,
                false,
                algorithm,
                PublicKeyBuf::new(key_bytes, algorithm),
            );
            return Some(Self { dnskey, ttl });
        }
        None
    }

    /// The DNSKEY RRset for the zone apex.
    pub fn dnskey_record_set(&self, origin: &Name) -> RecordSet {
        let mut record_set = RecordSet::new(origin.clone(), RecordType::DNSKEY, 0);
        let mut record = Record::from_rdata(
            origin.clone(),
            self.ttl,
            RData::DNSSEC(DNSSECRData::DNSKEY(self.dnskey.clone())),
        );
        record.set_dns_class(hickory_proto::rr::DNSClass::IN);
        record_set.insert(record, 0);
        record_set
    }
}

/// Build the NSEC record spanning the denial gap `(prev, next)` as produced
/// by the registry's denial index. Empty bounds stand in for the zone apex.
pub fn build_nsec(prev: &str, next: &str, zone: &Name, ttl: u32) -> Result<RecordSet, Error> {
    let owner = bound_name(prev, zone)?;
    let next_name = bound_name(next, zone)?;

    let nsec = NSEC::new(
        next_name,
        vec![RecordType::SRV, RecordType::RRSIG, RecordType::NSEC],
    );
    let mut record_set = RecordSet::new(owner.clone(), RecordType::NSEC, 0);
    let mut record = Record::from_rdata(owner, ttl, RData::DNSSEC(DNSSECRData::NSEC(nsec)));
    record.set_dns_class(hickory_proto::rr::DNSClass::IN);
    record_set.insert(record, 0);
    Ok(record_set)
}

/// A denial bound joined onto the zone. Bounds come dot-suffixed from the
/// index ("name."), or empty for the apex.
fn bound_name(bound: &str, zone: &Name) -> Result<Name, Error> {
    if bound.is_empty() {
        return Ok(zone.clone());
    }
    let relative = Name::from_ascii(bound.trim_end_matches('.'))?;
    Ok(relative.append_domain(zone)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bound_name_joins_zone() {
        let zone = Name::from_ascii("skydns.local.").unwrap();
        let name = bound_name("testservice.production.", &zone).unwrap();
        assert_eq!(name.to_string(), "testservice.production.skydns.local.");
        assert_eq!(bound_name("", &zone).unwrap(), zone);
    }

    #[test]
    fn test_parse_dnskey_line() {
        let zone = Name::from_ascii("skydns.local.").unwrap();
        let contents = "skydns.local. IN DNSKEY 256 3 5 AwEAAaXfO+DOBMJsQ5H4TfiabwSpqE4cGL0Qlvh5hrQumrjr9eNSdIOj\n";
        let key = ZoneKey::parse(contents, &zone, 3600);
        assert!(key.is_some());
    }

    #[test]
    fn test_parse_rejects_other_owner() {
        let zone = Name::from_ascii("skydns.local.").unwrap();
        let contents = "example.com. IN DNSKEY 256 3 5 AwEAAaXfO+DOBMJsQ5H4\n";
        assert!(ZoneKey::parse(contents, &zone, 3600).is_none());
    }
}
