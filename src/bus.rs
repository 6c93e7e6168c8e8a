//! The replicated command bus.
//!
//! [`CommandBus`] is the contract every mutation goes through: a submit
//! either comes back applied on a majority including the local replica, or
//! fails with [`Error::NotLeader`] (carrying a leader hint when one is
//! known) or a transport error. Cluster transports live behind this trait;
//! the implementation here is [`StandaloneBus`], the single-replica bus
//! backed by an append-only journal that is replayed on startup.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::command::Command;
use crate::error::Error;
use crate::metrics;
use crate::registry::Registry;

/// Journal file name under the data directory.
const JOURNAL_FILE: &str = "commands.log";

/// Submission side of the replicated log.
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// Replicate and apply `cmd`. Returns once the command is applied
    /// locally, or with [`Error::NotLeader`] / [`Error::Transport`].
    async fn submit(&self, cmd: Command) -> Result<(), Error>;

    /// Whether this replica currently leads the cluster.
    fn is_leader(&self) -> bool;

    /// HTTP address of the current leader, when known and not us.
    fn leader_hint(&self) -> Option<String>;
}

/// Single-replica bus: always the leader, journal on local disk.
pub struct StandaloneBus {
    registry: Registry,
    journal: Mutex<File>,
    path: PathBuf,
}

impl StandaloneBus {
    /// Open (or create) the journal under `data_dir`, replaying any
    /// existing entries into `registry`.
    ///
    /// The data directory itself must exist; a missing one is a fatal
    /// bootstrap error rather than something to silently create.
    pub fn open(data_dir: &Path, registry: Registry) -> Result<Self, Error> {
        if !data_dir.is_dir() {
            return Err(Error::Config(format!(
                "data directory does not exist: {}",
                data_dir.display()
            )));
        }
        let path = data_dir.join(JOURNAL_FILE);

        if path.exists() {
            let replayed = replay(&path, &registry)?;
            info!(entries = replayed, services = registry.len(), "replayed command journal");
        }

        let journal = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            registry,
            journal: Mutex::new(journal),
            path,
        })
    }

    /// Path of the journal file.
    pub fn journal_path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CommandBus for StandaloneBus {
    async fn submit(&self, cmd: Command) -> Result<(), Error> {
        let line = serde_json::to_string(&cmd)?;
        {
            let mut journal = self.journal.lock();
            journal.write_all(line.as_bytes())?;
            journal.write_all(b"\n")?;
            journal.flush()?;
        }
        metrics::record_command(cmd.name());
        cmd.apply(&self.registry)
    }

    fn is_leader(&self) -> bool {
        true
    }

    fn leader_hint(&self) -> Option<String> {
        None
    }
}

/// Apply every journal entry in order. Apply failures are logged and
/// skipped; a line that failed at submission time fails the same way here.
fn replay(path: &Path, registry: &Registry) -> Result<usize, Error> {
    let reader = BufReader::new(File::open(path)?);
    let mut applied = 0;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let cmd: Command = serde_json::from_str(&line).map_err(|e| {
            Error::Config(format!(
                "corrupt journal entry at {}:{}: {e}",
                path.display(),
                lineno + 1
            ))
        })?;
        match cmd.apply(registry) {
            Ok(()) => applied += 1,
            Err(e) => debug!(command = cmd.name(), error = %e, "skipping journal entry"),
        }
    }
    Ok(applied)
}

/// A bus whose replica lost (or never had) leadership. Used where a
/// follower's behaviour is needed without a cluster transport, e.g. in
/// redirect tests.
pub struct FollowerBus {
    leader: Option<String>,
}

impl FollowerBus {
    /// A follower pointing at `leader`'s HTTP address (or at nothing).
    pub fn new(leader: Option<String>) -> Self {
        Self { leader }
    }
}

#[async_trait]
impl CommandBus for FollowerBus {
    async fn submit(&self, _cmd: Command) -> Result<(), Error> {
        Err(Error::NotLeader {
            leader: self.leader.clone(),
        })
    }

    fn is_leader(&self) -> bool {
        false
    }

    fn leader_hint(&self) -> Option<String> {
        self.leader.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{now_unix, Service};

    fn make_service(id: &str) -> Service {
        Service {
            id: id.to_string(),
            name: "TestService".to_string(),
            version: "1.0.0".to_string(),
            environment: "Production".to_string(),
            region: "Test".to_string(),
            host: "localhost".to_string(),
            port: 9000,
            ttl: 600,
            expires: now_unix() + 600,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_applies_locally() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let bus = StandaloneBus::open(dir.path(), registry.clone()).unwrap();

        bus.submit(Command::AddService {
            service: make_service("1"),
        })
        .await
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert!(bus.is_leader());
        assert!(bus.leader_hint().is_none());
    }

    #[tokio::test]
    async fn test_submit_surfaces_registry_errors() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let bus = StandaloneBus::open(dir.path(), registry.clone()).unwrap();

        let cmd = Command::AddService {
            service: make_service("1"),
        };
        bus.submit(cmd.clone()).await.unwrap();
        assert!(matches!(
            bus.submit(cmd).await,
            Err(Error::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn test_replay_reconstructs_registry() {
        let dir = tempfile::tempdir().unwrap();

        {
            let registry = Registry::new();
            let bus = StandaloneBus::open(dir.path(), registry.clone()).unwrap();
            bus.submit(Command::AddService {
                service: make_service("1"),
            })
            .await
            .unwrap();
            bus.submit(Command::AddService {
                service: make_service("2"),
            })
            .await
            .unwrap();
            bus.submit(Command::RemoveService {
                id: "1".to_string(),
            })
            .await
            .unwrap();
        }

        // A fresh replica replays the same log to the same state.
        let registry = Registry::new();
        let _bus = StandaloneBus::open(dir.path(), registry.clone()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_id("2").is_ok());
        assert!(registry.get_by_id("1").is_err());
    }

    #[test]
    fn test_missing_data_dir_is_fatal() {
        let err = StandaloneBus::open(Path::new("/nonexistent/skydns-data"), Registry::new());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_follower_rejects_with_hint() {
        let bus = FollowerBus::new(Some("10.0.0.1:8080".to_string()));
        assert!(!bus.is_leader());
        let err = bus
            .submit(Command::RemoveService {
                id: "1".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            Error::NotLeader { leader } => assert_eq!(leader.as_deref(), Some("10.0.0.1:8080")),
            other => panic!("expected NotLeader, got {other}"),
        }
    }
}
