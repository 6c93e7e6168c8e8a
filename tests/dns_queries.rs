//! End-to-end DNS query behaviour through the catalog: SRV answer sets,
//! weights, cross-region priorities, apex records and negative answers.

mod common;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{RData, RecordType};
use skydns::service::now_unix;
use skydns::Registry;

use common::*;

#[tokio::test]
async fn test_announce_then_lookup() {
    let registry = Registry::new();
    let mut s = service("1001");
    s.host = "web1.site.com".to_string();
    s.port = 80;
    s.ttl = 4000;
    s.expires = now_unix() + 4000;
    registry.add(s).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(&catalog, "testservice.production.skydns.local.", RecordType::SRV).await;

    assert_response_code(&msg, ResponseCode::NoError);
    let answers = extract_srv(&msg);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].target, "web1.site.com.");
    assert_eq!(answers[0].port, 80);
    assert_eq!(answers[0].priority, 10);
    assert_eq!(answers[0].weight, 100);
    assert!(answers[0].ttl >= 3998 && answers[0].ttl <= 4000);
}

#[tokio::test]
async fn test_weight_splits_across_answer_set() {
    let registry = Registry::new();
    for (id, port) in [("101", 9001), ("104", 9004), ("105", 9005)] {
        let mut s = service(id);
        s.port = port;
        registry.add(s).unwrap();
    }

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(&catalog, "testservice.production.skydns.local.", RecordType::SRV).await;

    let answers = extract_srv(&msg);
    assert_eq!(answers.len(), 3);
    for answer in &answers {
        assert_eq!(answer.priority, 10);
        assert_eq!(answer.weight, 33);
    }
}

#[tokio::test]
async fn test_cross_region_priorities() {
    let registry = Registry::new();
    for (id, region, port) in [
        ("1001", "East", 9001),
        ("1002", "East", 9002),
        ("1003", "West", 9003),
        ("1004", "West", 9004),
    ] {
        let mut s = service(id);
        s.region = region.to_string();
        s.port = port;
        registry.add(s).unwrap();
    }

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(
        &catalog,
        "east.any.testservice.production.skydns.local.",
        RecordType::SRV,
    )
    .await;

    let answers = extract_srv(&msg);
    assert_eq!(answers.len(), 4);

    let east: Vec<_> = answers.iter().filter(|a| a.priority == 10).collect();
    assert_eq!(east.len(), 2);
    for answer in &east {
        assert_eq!(answer.weight, 50);
        assert!(answer.port == 9001 || answer.port == 9002);
    }

    let west: Vec<_> = answers.iter().filter(|a| a.priority == 20).collect();
    assert_eq!(west.len(), 2);
    for answer in &west {
        assert_eq!(answer.weight, 50);
        assert!(answer.port == 9003 || answer.port == 9004);
    }
}

#[tokio::test]
async fn test_partial_names_pad_with_wildcards() {
    let registry = Registry::new();
    let mut dev = service("200");
    dev.environment = "Development".to_string();
    registry.add(dev).unwrap();
    registry.add(service("201")).unwrap();
    registry.add(service("202")).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);

    let msg = execute_query(&catalog, "production.skydns.local.", RecordType::SRV).await;
    assert_eq!(extract_srv(&msg).len(), 2);

    let msg = execute_query(&catalog, "any.skydns.local.", RecordType::SRV).await;
    assert_eq!(extract_srv(&msg).len(), 3);
}

#[tokio::test]
async fn test_queries_are_case_insensitive() {
    let registry = Registry::new();
    registry.add(service("300")).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(
        &catalog,
        "TESTSERVICE.Production.skydns.local.",
        RecordType::SRV,
    )
    .await;

    assert_eq!(extract_srv(&msg).len(), 1);
}

#[tokio::test]
async fn test_any_qtype_answers_like_srv() {
    let registry = Registry::new();
    registry.add(service("400")).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(&catalog, "testservice.production.skydns.local.", RecordType::ANY).await;

    assert_eq!(extract_srv(&msg).len(), 1);
}

#[tokio::test]
async fn test_unknown_name_is_nxdomain() {
    let registry = Registry::new();
    registry.add(service("500")).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(&catalog, "ghost.production.skydns.local.", RecordType::SRV).await;

    assert_response_code(&msg, ResponseCode::NXDomain);
    assert!(msg.answers().is_empty());
}

#[tokio::test]
async fn test_nearly_expired_services_are_not_served() {
    let registry = Registry::new();
    let mut s = service("600");
    s.expires = now_unix() + 1;
    registry.add(s).unwrap();

    let catalog = build_catalog(test_dns_config(), registry);
    let msg = execute_query(&catalog, "testservice.production.skydns.local.", RecordType::SRV).await;

    assert!(extract_srv(&msg).is_empty());
}

#[tokio::test]
async fn test_apex_a_record() {
    let catalog = build_catalog(test_dns_config(), Registry::new());
    let msg = execute_query(&catalog, "skydns.local.", RecordType::A).await;

    assert_response_code(&msg, ResponseCode::NoError);
    let ips: Vec<_> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::A(a) => Some(std::net::Ipv4Addr::from(*a)),
            _ => None,
        })
        .collect();
    assert_eq!(ips, vec!["127.0.0.1".parse::<std::net::Ipv4Addr>().unwrap()]);
}

#[tokio::test]
async fn test_apex_soa_and_ns() {
    let registry = Registry::new();
    registry.add(service("700")).unwrap();
    let serial = registry.serial();

    let catalog = build_catalog(test_dns_config(), registry);

    let msg = execute_query(&catalog, "skydns.local.", RecordType::SOA).await;
    let soas: Vec<_> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::SOA(soa) => Some(soa.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(soas.len(), 1);
    assert_eq!(soas[0].serial(), serial);
    assert_eq!(soas[0].mname().to_string(), "ns1.skydns.local.");

    let msg = execute_query(&catalog, "skydns.local.", RecordType::NS).await;
    let ns: Vec<_> = msg
        .answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::NS(ns) => Some(ns.0.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(ns, vec!["ns1.skydns.local.".to_string()]);
}
