//! Labelled name tree holding the registered services.
//!
//! Keys are the six registry labels, id first. Paths are walked from the
//! rightmost label (environment) down to the id, so lookups read the same
//! direction as the DNS names they come from. Any label of a query may be a
//! wildcard, matching every child at that level.

use std::collections::HashMap;

use crate::error::Error;
use crate::service::Service;

/// Services whose lease has less than this many seconds left are not served;
/// a client could not use the answer before it expires.
pub const MIN_SERVE_TTL: u32 = 2;

/// True for the labels that match everything at their position.
pub fn is_wildcard(label: &str) -> bool {
    matches!(label, "*" | "any" | "all")
}

/// One level of the name tree.
///
/// `size` counts the services in the subtree; the root's size is the number
/// of services in the registry. Only leaves reached by a full key hold a
/// service.
#[derive(Debug, Default)]
pub struct Node {
    children: HashMap<String, Node>,
    size: usize,
    service: Option<Service>,
}

impl Node {
    /// A new empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of services stored below this node.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Insert a service at the leaf addressed by `path` (id first).
    /// Fails with [`Error::AlreadyExists`] if the leaf is taken.
    pub fn add(&mut self, path: &[String], service: Service) -> Result<(), Error> {
        let Some((label, rest)) = path.split_last() else {
            return Err(Error::InvalidInput("empty registry key".to_string()));
        };

        if rest.is_empty() {
            if self.children.contains_key(label) {
                return Err(Error::AlreadyExists);
            }
            self.children.insert(
                label.clone(),
                Node {
                    children: HashMap::new(),
                    size: 1,
                    service: Some(service),
                },
            );
            self.size += 1;
            return Ok(());
        }

        let result = self
            .children
            .entry(label.clone())
            .or_default()
            .add(rest, service);
        match result {
            Ok(()) => {
                self.size += 1;
                Ok(())
            }
            Err(e) => {
                // Drop any intermediate node the failed insert created.
                if let Some(child) = self.children.get(label) {
                    if child.size == 0 && child.children.is_empty() {
                        self.children.remove(label);
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete the leaf addressed by `path`, pruning emptied intermediate
    /// nodes on the way back up.
    pub fn remove(&mut self, path: &[String]) -> Result<(), Error> {
        let Some((label, rest)) = path.split_last() else {
            return Err(Error::NotFound);
        };

        if rest.is_empty() {
            match self.children.get(label) {
                Some(child) if child.service.is_some() => {
                    self.children.remove(label);
                    self.size -= 1;
                    Ok(())
                }
                _ => Err(Error::NotFound),
            }
        } else {
            let child = self.children.get_mut(label).ok_or(Error::NotFound)?;
            child.remove(rest)?;
            self.size -= 1;
            if child.size == 0 {
                self.children.remove(label);
            }
            Ok(())
        }
    }

    /// Collect every service matching `path`, wildcards included, that still
    /// has at least [`MIN_SERVE_TTL`] seconds of lease left. The returned
    /// records carry their remaining TTL.
    ///
    /// [`Error::NotFound`] surfaces only when no branch matched at all; a
    /// matching leaf filtered out by TTL yields an empty result.
    pub fn get(&self, path: &[String], now: i64) -> Result<Vec<Service>, Error> {
        let mut out = Vec::new();
        self.collect(path, now, &mut out)?;
        Ok(out)
    }

    fn collect(&self, path: &[String], now: i64, out: &mut Vec<Service>) -> Result<(), Error> {
        let Some((label, rest)) = path.split_last() else {
            return Err(Error::NotFound);
        };

        if rest.is_empty() {
            if is_wildcard(label) {
                if self.children.is_empty() {
                    return Err(Error::NotFound);
                }
                for child in self.children.values() {
                    child.push_leaf(now, out);
                }
                Ok(())
            } else {
                match self.children.get(label) {
                    Some(child) => {
                        child.push_leaf(now, out);
                        Ok(())
                    }
                    None => Err(Error::NotFound),
                }
            }
        } else if is_wildcard(label) {
            if self.children.is_empty() {
                return Err(Error::NotFound);
            }
            let mut matched = false;
            for child in self.children.values() {
                if child.collect(rest, now, out).is_ok() {
                    matched = true;
                }
            }
            if matched {
                Ok(())
            } else {
                Err(Error::NotFound)
            }
        } else {
            match self.children.get(label) {
                Some(child) => child.collect(rest, now, out),
                None => Err(Error::NotFound),
            }
        }
    }

    fn push_leaf(&self, now: i64, out: &mut Vec<Service>) {
        if let Some(service) = &self.service {
            let remaining = service.remaining_ttl_at(now);
            if remaining >= MIN_SERVE_TTL {
                let mut service = service.clone();
                service.ttl = remaining;
                out.push(service);
            }
        }
    }

    /// Borrow the service at the leaf addressed by `path`, if present.
    pub fn leaf(&self, path: &[String]) -> Option<&Service> {
        let (label, rest) = path.split_last()?;
        let child = self.children.get(label)?;
        if rest.is_empty() {
            child.service.as_ref()
        } else {
            child.leaf(rest)
        }
    }

    /// Mutably borrow the service at the leaf addressed by `path`.
    pub fn leaf_mut(&mut self, path: &[String]) -> Option<&mut Service> {
        let (label, rest) = path.split_last()?;
        let child = self.children.get_mut(label)?;
        if rest.is_empty() {
            child.service.as_mut()
        } else {
            child.leaf_mut(rest)
        }
    }

    /// Visit every stored service.
    pub fn for_each<F: FnMut(&Service)>(&self, f: &mut F) {
        if let Some(service) = &self.service {
            f(service);
        }
        for child in self.children.values() {
            child.for_each(f);
        }
    }
}
