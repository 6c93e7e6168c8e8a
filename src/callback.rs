//! Callback delivery.
//!
//! The registry invokes callbacks while holding its lock, so invocation is
//! a channel send; this module drains the channel and performs the actual
//! HTTP notification off the lock. One failing delivery never blocks the
//! others, and removal proceeds regardless of delivery outcome.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics;
use crate::service::{Callback, Service};

/// One callback to deliver: the registration plus the service payload that
/// was removed or expired.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The callback registration being honored.
    pub callback: Callback,
    /// The service that went away, sent as the notification body.
    pub service: Service,
}

/// Channel end handed to the registry.
pub type Sink = mpsc::UnboundedSender<Invocation>;

/// Spawns the delivery task and returns the sink to plug into the registry.
///
/// Notifications are POSTed as the service JSON to
/// `http://{reply}:{port}/skydns/callbacks/{id}`. Errors are logged and
/// dropped.
pub fn spawn_dispatcher(cancel: CancellationToken) -> Sink {
    let (tx, mut rx) = mpsc::unbounded_channel::<Invocation>();

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        loop {
            tokio::select! {
                invocation = rx.recv() => {
                    let Some(invocation) = invocation else { break };
                    deliver(&client, invocation).await;
                }
                _ = cancel.cancelled() => {
                    debug!("callback dispatcher shutting down");
                    break;
                }
            }
        }
    });

    tx
}

async fn deliver(client: &reqwest::Client, invocation: Invocation) {
    let url = format!(
        "http://{}:{}/skydns/callbacks/{}",
        invocation.callback.reply, invocation.callback.port, invocation.callback.id
    );
    debug!(
        callback = %invocation.callback.id,
        service = %invocation.service.id,
        %url,
        "delivering callback"
    );
    match client.post(&url).json(&invocation.service).send().await {
        Ok(resp) if resp.status().is_success() => {
            metrics::record_callback_delivery(true);
        }
        Ok(resp) => {
            metrics::record_callback_delivery(false);
            warn!(callback = %invocation.callback.id, status = %resp.status(), "callback rejected");
        }
        Err(e) => {
            metrics::record_callback_delivery(false);
            warn!(callback = %invocation.callback.id, error = %e, "callback delivery failed");
        }
    }
}
