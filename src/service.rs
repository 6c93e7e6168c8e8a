//! Service and callback records.
//!
//! A service is announced over the HTTP API, replicated through the command
//! bus, and looked up as SRV records. The JSON field names (`UUID`, `Name`,
//! `TTL`, ...) are the wire format announced clients already speak.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall clock as unix seconds.
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A registered service announcement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Service {
    /// Opaque unique identifier, filled in from the request path.
    #[serde(rename = "UUID")]
    pub id: String,
    /// Logical service name.
    pub name: String,
    /// Service version; dots become dashes in the registry key.
    pub version: String,
    /// Deployment environment (e.g. "Production").
    pub environment: String,
    /// Region the instance runs in.
    pub region: String,
    /// Target host for SRV answers; dots become dashes in the registry key.
    pub host: String,
    /// Target port for SRV answers.
    pub port: u16,
    /// Lease duration in seconds.
    #[serde(rename = "TTL")]
    pub ttl: u32,
    /// Absolute expiry as unix seconds, computed by the submitter.
    pub expires: i64,
    /// Permanent records are never expired by the lease controller.
    pub no_expire: bool,
    /// Callbacks to invoke when this service is removed, keyed by callback id.
    #[serde(skip)]
    pub callbacks: HashMap<String, Callback>,
}

impl Service {
    /// Seconds left on the lease, clamped to zero. Permanent records report
    /// their configured TTL unchanged.
    pub fn remaining_ttl(&self) -> u32 {
        self.remaining_ttl_at(now_unix())
    }

    /// [`Self::remaining_ttl`] against an explicit clock.
    pub fn remaining_ttl_at(&self, now: i64) -> u32 {
        if self.no_expire {
            return self.ttl;
        }
        if self.expires <= now {
            return 0;
        }
        (self.expires - now) as u32
    }

    /// The six-label registry key: `id.host'.region.version'.name.environment`,
    /// lowercased, with dots in host and version replaced by dashes.
    pub fn registry_key(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}.{}",
            self.id,
            sanitize_label(&self.host),
            self.region,
            sanitize_label(&self.version),
            self.name,
            self.environment
        )
        .to_lowercase()
    }

    /// The registry key split into its six labels, id first.
    pub fn key_labels(&self) -> Vec<String> {
        self.registry_key().split('.').map(String::from).collect()
    }
}

/// Replace label-breaking dots so multi-label values stay one label.
pub fn sanitize_label(label: &str) -> String {
    label.replace('.', "-")
}

/// A callback registration: who to notify when matching services go away.
///
/// The naming fields select the services to attach to; `reply` and `port`
/// are where the notification is delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Callback {
    /// Callback identifier, filled in from the request path.
    #[serde(rename = "UUID")]
    pub id: String,
    /// Service name to match.
    pub name: String,
    /// Service version to match.
    pub version: String,
    /// Environment to match.
    pub environment: String,
    /// Region to match.
    pub region: String,
    /// Host to match.
    pub host: String,
    /// Host to deliver the notification to.
    pub reply: String,
    /// Port to deliver the notification to.
    pub port: u16,
}

impl Callback {
    /// Wildcard registry query selecting the services this callback matches.
    /// Empty fields match everything in their position.
    pub fn selector(&self) -> String {
        let field = |s: &str| {
            if s.is_empty() {
                "*".to_string()
            } else {
                s.to_string()
            }
        };
        format!(
            "*.{}.{}.{}.{}.{}",
            field(&sanitize_label(&self.host)),
            field(&self.region),
            field(&sanitize_label(&self.version)),
            field(&self.name),
            field(&self.environment)
        )
        .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service() -> Service {
        Service {
            id: "123".to_string(),
            name: "TestService".to_string(),
            version: "1.0.0".to_string(),
            environment: "Production".to_string(),
            region: "Test".to_string(),
            host: "localhost".to_string(),
            port: 9000,
            ttl: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_key_format() {
        let key = make_service().registry_key();
        assert_eq!(key, "123.localhost.test.1-0-0.testservice.production");
    }

    #[test]
    fn test_registry_key_sanitizes_host_dots() {
        let mut s = make_service();
        s.host = "web1.site.com".to_string();
        assert_eq!(
            s.registry_key(),
            "123.web1-site-com.test.1-0-0.testservice.production"
        );
    }

    #[test]
    fn test_remaining_ttl_counts_down() {
        let mut s = make_service();
        s.expires = 1000;
        assert_eq!(s.remaining_ttl_at(996), 4);
        assert_eq!(s.remaining_ttl_at(1000), 0);
        assert_eq!(s.remaining_ttl_at(2000), 0);
    }

    #[test]
    fn test_remaining_ttl_permanent() {
        let mut s = make_service();
        s.no_expire = true;
        s.expires = 0;
        assert_eq!(s.remaining_ttl_at(i64::MAX), 4);
    }

    #[test]
    fn test_wire_field_names() {
        let s = make_service();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["UUID"], "123");
        assert_eq!(json["Name"], "TestService");
        assert_eq!(json["TTL"], 4);
        assert_eq!(json["NoExpire"], false);
        assert!(json.get("callbacks").is_none());
    }

    #[test]
    fn test_deserialize_partial_body() {
        // Announce bodies omit UUID and Expires; both default.
        let s: Service = serde_json::from_str(
            r#"{"Name":"TestService","Version":"1.0.0","Environment":"Production",
                "Region":"East","Host":"web1.site.com","Port":80,"TTL":4000}"#,
        )
        .unwrap();
        assert_eq!(s.id, "");
        assert_eq!(s.port, 80);
        assert_eq!(s.ttl, 4000);
        assert_eq!(s.expires, 0);
    }

    #[test]
    fn test_callback_selector() {
        let cb = Callback {
            id: "101".to_string(),
            name: "TestService".to_string(),
            version: "1.0.0".to_string(),
            environment: "Production".to_string(),
            region: "Test".to_string(),
            host: "localhost".to_string(),
            reply: "localhost".to_string(),
            port: 9650,
        };
        assert_eq!(cb.selector(), "*.localhost.test.1-0-0.testservice.production");
    }

    #[test]
    fn test_callback_selector_wildcards_empty_fields() {
        let cb = Callback {
            name: "TestService".to_string(),
            environment: "Production".to_string(),
            ..Default::default()
        };
        assert_eq!(cb.selector(), "*.*.*.*.testservice.production");
    }
}
