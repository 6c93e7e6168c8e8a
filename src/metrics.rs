//! Metrics instrumentation for skydns.
//!
//! All metrics are prefixed with `skydns.`

use metrics::{counter, gauge, histogram};
use std::time::Instant;

/// Record a DNS query.
pub fn record_query(record_type: &str, result: QueryResult, duration: std::time::Duration) {
    let result_str = match result {
        QueryResult::Success => "success",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Refused => "refused",
        QueryResult::Forwarded => "forwarded",
        QueryResult::Error => "error",
    };

    counter!("skydns.query.count", "type" => record_type.to_string(), "result" => result_str)
        .increment(1);
    histogram!("skydns.query.duration.seconds", "type" => record_type.to_string())
        .record(duration.as_secs_f64());
}

/// Query result type for metrics.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query returned records.
    Success,
    /// Name not found in the zone.
    NxDomain,
    /// Question outside the zone with no forwarders configured.
    Refused,
    /// Question relayed to an upstream resolver.
    Forwarded,
    /// Query failed with an error.
    Error,
}

/// Record an HTTP API request by operation and outcome status.
pub fn record_api_request(operation: ApiOperation, status: u16) {
    let op_str = match operation {
        ApiOperation::AddService => "add_service",
        ApiOperation::GetService => "get_service",
        ApiOperation::UpdateTtl => "update_ttl",
        ApiOperation::RemoveService => "remove_service",
        ApiOperation::ListServices => "list_services",
        ApiOperation::AddCallback => "add_callback",
    };

    counter!("skydns.api.request.count", "operation" => op_str, "status" => status.to_string())
        .increment(1);
}

/// HTTP API operations.
#[derive(Debug, Clone, Copy)]
pub enum ApiOperation {
    /// PUT /skydns/services/{id}
    AddService,
    /// GET /skydns/services/{id}
    GetService,
    /// PATCH /skydns/services/{id}
    UpdateTtl,
    /// DELETE /skydns/services/{id}
    RemoveService,
    /// GET /skydns/services/
    ListServices,
    /// PUT /skydns/callbacks/{id}
    AddCallback,
}

/// Record a command accepted by the bus.
pub fn record_command(name: &str) {
    counter!("skydns.command.count", "command" => name.to_string()).increment(1);
}

/// Record a lease expired by the controller.
pub fn record_expired_lease() {
    counter!("skydns.lease.expired.count").increment(1);
}

/// Record an upstream forward attempt.
pub fn record_forward(upstream: &str, ok: bool) {
    counter!(
        "skydns.forward.count",
        "upstream" => upstream.to_string(),
        "result" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record a callback delivery attempt.
pub fn record_callback_delivery(ok: bool) {
    counter!("skydns.callback.delivery.count", "result" => if ok { "ok" } else { "error" })
        .increment(1);
}

/// Record registry gauges (call periodically or on change).
pub fn record_registry_state(services: usize, serial: u32) {
    gauge!("skydns.registry.services.count").set(services as f64);
    gauge!("skydns.registry.serial").set(serial as f64);
}

/// Record the size of a served SRV answer set.
pub fn record_srv_answers(count: usize) {
    histogram!("skydns.query.srv.answers").record(count as f64);
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
