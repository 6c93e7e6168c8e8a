//! The service registry: name tree, id index and denial index behind one
//! mutex.
//!
//! Every operation takes the lock for its full duration; replicas applying
//! the same command log therefore converge on identical state. Reads clone
//! the records they return, with `TTL` rewritten to the remaining lease.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::callback;
use crate::denial::DenialIndex;
use crate::error::Error;
use crate::service::{now_unix, Callback, Service};
use crate::tree::Node;

/// Shared handle to the registry state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    tree: Node,
    /// id -> registry key labels, so id lookups skip the tree walk.
    ids: HashMap<String, Vec<String>>,
    denial: DenialIndex,
    dnssec: bool,
    serial: u32,
    callbacks: Option<callback::Sink>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A new empty registry that drops callback invocations.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tree: Node::new(),
                ids: HashMap::new(),
                denial: DenialIndex::new(),
                dnssec: false,
                serial: 0,
                callbacks: None,
            })),
        }
    }

    /// A registry that forwards callback invocations to `sink`.
    pub fn with_callback_sink(sink: callback::Sink) -> Self {
        let registry = Self::new();
        registry.inner.lock().callbacks = Some(sink);
        registry
    }

    /// Register a service. Fails with [`Error::AlreadyExists`] when the id
    /// is taken.
    pub fn add(&self, service: Service) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.ids.contains_key(&service.id) {
            return Err(Error::AlreadyExists);
        }
        let path = service.key_labels();
        debug!(id = %service.id, key = %service.registry_key(), "adding service");
        inner.tree.add(&path, service.clone())?;
        inner.ids.insert(service.id.clone(), path);
        if inner.dnssec {
            for owner in owner_names(&service) {
                inner.denial.add(&owner);
            }
        }
        inner.serial = inner.serial.wrapping_add(1);
        Ok(())
    }

    /// Remove a service record. The id is all that identifies it.
    pub fn remove(&self, service: &Service) -> Result<(), Error> {
        self.remove_by_id(&service.id)
    }

    /// Remove the service registered under `id`, invoking its callbacks.
    pub fn remove_by_id(&self, id: &str) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let path = inner.ids.get(id).cloned().ok_or(Error::NotFound)?;
        let service = inner
            .tree
            .leaf(&path)
            .cloned()
            .ok_or(Error::NotFound)?;

        inner.ids.remove(id);

        debug!(
            id = %service.id,
            callbacks = service.callbacks.len(),
            "removing service"
        );
        if let Some(sink) = &inner.callbacks {
            let mut payload = service.clone();
            payload.callbacks.clear();
            for cb in service.callbacks.values() {
                if sink
                    .send(callback::Invocation {
                        callback: cb.clone(),
                        service: payload.clone(),
                    })
                    .is_err()
                {
                    warn!(callback = %cb.id, "callback dispatcher gone, dropping invocation");
                }
            }
        }

        if inner.dnssec {
            for owner in owner_names(&service) {
                inner.denial.remove(&owner);
            }
        }
        inner.tree.remove(&path)?;
        inner.serial = inner.serial.wrapping_add(1);
        Ok(())
    }

    /// Refresh a lease: store the new `ttl` and the submitter-computed
    /// `expires`. Idempotent for identical arguments.
    pub fn update_ttl(&self, id: &str, ttl: u32, expires: i64) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let path = inner.ids.get(id).cloned().ok_or(Error::NotFound)?;
        let service = inner.tree.leaf_mut(&path).ok_or(Error::NotFound)?;
        service.ttl = ttl;
        service.expires = expires;
        inner.serial = inner.serial.wrapping_add(1);
        Ok(())
    }

    /// Fetch a service by id with `TTL` rewritten to the remaining lease.
    /// Records within a second of expiry are already gone.
    pub fn get_by_id(&self, id: &str) -> Result<Service, Error> {
        let inner = self.inner.lock();
        let path = inner.ids.get(id).ok_or(Error::NotFound)?;
        let service = inner.tree.leaf(path).ok_or(Error::NotFound)?;
        let remaining = service.remaining_ttl();
        if remaining < 1 {
            return Err(Error::NotFound);
        }
        let mut service = service.clone();
        service.ttl = remaining;
        Ok(service)
    }

    /// Wildcard query over the tree.
    ///
    /// `domain` is lowercased, a trailing dot is stripped, and fewer than
    /// six labels are padded with `*` on the left, so `testservice.production`
    /// means `*.*.*.*.testservice.production`.
    pub fn get(&self, domain: &str) -> Result<Vec<Service>, Error> {
        let domain = domain.to_lowercase();
        let domain = domain.strip_suffix('.').unwrap_or(&domain);
        let mut labels: Vec<String> = domain.split('.').map(String::from).collect();
        if labels.len() < 6 {
            let mut padded = vec!["*".to_string(); 6 - labels.len()];
            padded.append(&mut labels);
            labels = padded;
        }
        let inner = self.inner.lock();
        inner.tree.get(&labels, now_unix())
    }

    /// Ids of every expirable service whose lease has run out.
    pub fn get_expired(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let now = now_unix();
        let mut expired = Vec::new();
        inner.tree.for_each(&mut |service| {
            if !service.no_expire && service.expires <= now {
                expired.push(service.id.clone());
            }
        });
        expired
    }

    /// Attach a callback to the service registered under `id`.
    pub fn add_callback(&self, id: &str, cb: Callback) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        let path = inner.ids.get(id).cloned().ok_or(Error::NotFound)?;
        let service = inner.tree.leaf_mut(&path).ok_or(Error::NotFound)?;
        service.callbacks.insert(cb.id.clone(), cb);
        Ok(())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.inner.lock().tree.size()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Denial-index neighbors of `key`, for NSEC synthesis.
    pub fn neighbors(&self, key: &str) -> (String, String) {
        self.inner.lock().denial.neighbors(&key.to_lowercase())
    }

    /// Enable or disable denial-index maintenance, returning the prior
    /// setting. Enabling does not backfill; callers enable it at boot.
    pub fn set_dnssec(&self, enabled: bool) -> bool {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.dnssec, enabled)
    }

    /// SOA serial, bumped on every mutation.
    pub fn serial(&self) -> u32 {
        self.inner.lock().serial
    }

    /// Histogram of services per environment, in stored label case.
    pub fn environments(&self) -> BTreeMap<String, usize> {
        self.histogram(|s| s.environment.clone())
    }

    /// Histogram of services per region, in stored label case.
    pub fn regions(&self) -> BTreeMap<String, usize> {
        self.histogram(|s| s.region.clone())
    }

    fn histogram<F: Fn(&Service) -> String>(&self, label: F) -> BTreeMap<String, usize> {
        let inner = self.inner.lock();
        let mut counts = BTreeMap::new();
        inner.tree.for_each(&mut |service| {
            *counts.entry(label(service)).or_insert(0) += 1;
        });
        counts
    }

    /// Publish registry gauges.
    pub fn emit_metrics(&self) {
        let inner = self.inner.lock();
        crate::metrics::record_registry_state(inner.tree.size(), inner.serial);
    }
}

/// The four owner names a service contributes to the denial index.
fn owner_names(service: &Service) -> [String; 4] {
    let environment = service.environment.to_lowercase();
    let name = service.name.to_lowercase();
    let version = service.version.to_lowercase();
    let region = service.region.to_lowercase();
    [
        format!("{region}.{version}.{name}.{environment}"),
        format!("{version}.{name}.{environment}"),
        format!("{name}.{environment}"),
        environment,
    ]
}
