//! Replicated User/File Registry
//!
//! The authoritative local copy of replicated cluster facts: which users
//! are connected to which server, and which files exist on which server.
//! Facts form sets keyed by the whole value; diffs are idempotent, so they
//! are safe to apply in any order and any number of times.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Opaque server instance identifier, stable for the process lifetime
pub type ServerId = String;

/// "This user is currently connected to that server"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserFact {
    pub username: String,
    pub server_id: ServerId,
}

impl UserFact {
    pub fn new(username: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            server_id: server_id.into(),
        }
    }
}

/// "This file exists on that server with this checksum"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFact {
    pub filename: String,
    pub server_id: ServerId,
    pub checksum: String,
}

impl FileFact {
    pub fn new(
        filename: impl Into<String>,
        server_id: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            server_id: server_id.into(),
            checksum: checksum.into(),
        }
    }
}

/// A complete point-in-time copy of one server's registry, used to
/// bootstrap another
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub users: Vec<UserFact>,
    pub files: Vec<FileFact>,
}

/// A single incremental, idempotent mutation propagated to peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diff {
    UserAdded(UserFact),
    UserRemoved(UserFact),
    FileAdded(FileFact),
    FileRemoved(FileFact),
}

impl Diff {
    /// Get the diff variant name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Diff::UserAdded(_) => "UserAdded",
            Diff::UserRemoved(_) => "UserRemoved",
            Diff::FileAdded(_) => "FileAdded",
            Diff::FileRemoved(_) => "FileRemoved",
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    users: HashSet<UserFact>,
    files: HashSet<FileFact>,
}

/// The replicated in-memory registry.
///
/// Both fact sets live behind a single lock so that a snapshot is atomic
/// with respect to any concurrent diff: it observes a state that existed
/// at some instant, never a partial mix of the two halves. Callers only
/// ever see cloned data; the backing sets never escape.
#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one incremental mutation.
    ///
    /// Idempotent: adding an already-present fact or removing an absent
    /// one is a no-op, never an error.
    pub async fn apply_diff(&self, diff: &Diff) {
        let mut inner = self.inner.write().await;
        match diff {
            Diff::UserAdded(user) => {
                inner.users.insert(user.clone());
            }
            Diff::UserRemoved(user) => {
                inner.users.remove(user);
            }
            Diff::FileAdded(file) => {
                inner.files.insert(file.clone());
            }
            Diff::FileRemoved(file) => {
                inner.files.remove(file);
            }
        }
    }

    /// Replace the entire registry contents with an incoming snapshot.
    ///
    /// This is a full replace, not a merge: prior local contents are
    /// discarded. A snapshot that arrives out of order with respect to
    /// in-flight diffs can therefore erase newer local knowledge; this is
    /// a known consistency gap of the anti-entropy protocol, kept as-is.
    pub async fn integrate_snapshot(&self, snapshot: RegistrySnapshot) {
        let mut inner = self.inner.write().await;
        inner.users = snapshot.users.into_iter().collect();
        inner.files = snapshot.files.into_iter().collect();
    }

    /// Take a point-in-time snapshot of both fact sets
    pub async fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.inner.read().await;
        RegistrySnapshot {
            users: inner.users.iter().cloned().collect(),
            files: inner.files.iter().cloned().collect(),
        }
    }

    /// All currently known user facts, cluster-wide
    pub async fn users(&self) -> Vec<UserFact> {
        self.inner.read().await.users.iter().cloned().collect()
    }

    /// All currently known file facts, cluster-wide
    pub async fn files(&self) -> Vec<FileFact> {
        self.inner.read().await.files.iter().cloned().collect()
    }

    /// Number of (users, files) facts
    pub async fn len(&self) -> (usize, usize) {
        let inner = self.inner.read().await;
        (inner.users.len(), inner.files.len())
    }

    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.read().await;
        inner.users.is_empty() && inner.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn user(name: &str, srv: &str) -> UserFact {
        UserFact::new(name, srv)
    }

    fn file(name: &str, srv: &str, sum: &str) -> FileFact {
        FileFact::new(name, srv, sum)
    }

    #[tokio::test]
    async fn test_apply_diff_idempotent_all_variants() {
        let registry = Registry::new();

        let diffs = vec![
            Diff::UserAdded(user("alice", "srv-1")),
            Diff::FileAdded(file("notes.txt", "srv-1", "abc123")),
        ];

        for d in &diffs {
            registry.apply_diff(d).await;
            registry.apply_diff(d).await;
        }
        assert_eq!(registry.len().await, (1, 1));

        // Removing twice is equally a no-op the second time
        let removals = vec![
            Diff::UserRemoved(user("alice", "srv-1")),
            Diff::FileRemoved(file("notes.txt", "srv-1", "abc123")),
        ];
        for d in &removals {
            registry.apply_diff(d).await;
            registry.apply_diff(d).await;
        }
        assert_eq!(registry.len().await, (0, 0));
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = Registry::new();
        registry
            .apply_diff(&Diff::UserRemoved(user("ghost", "srv-9")))
            .await;
        registry
            .apply_diff(&Diff::FileRemoved(file("ghost.bin", "srv-9", "0")))
            .await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_username_on_two_servers_is_two_facts() {
        let registry = Registry::new();
        registry.apply_diff(&Diff::UserAdded(user("bob", "srv-1"))).await;
        registry.apply_diff(&Diff::UserAdded(user("bob", "srv-2"))).await;
        assert_eq!(registry.len().await.0, 2);
    }

    #[tokio::test]
    async fn test_integrate_snapshot_is_full_replace() {
        let registry = Registry::new();
        registry.apply_diff(&Diff::UserAdded(user("old", "srv-1"))).await;
        registry
            .apply_diff(&Diff::FileAdded(file("old.txt", "srv-1", "aa")))
            .await;

        let incoming = RegistrySnapshot {
            users: vec![user("new", "srv-2")],
            files: vec![],
        };
        registry.integrate_snapshot(incoming).await;

        let users = registry.users().await;
        assert_eq!(users, vec![user("new", "srv-2")]);
        assert!(registry.files().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let registry = Registry::new();
        registry.apply_diff(&Diff::UserAdded(user("alice", "srv-1"))).await;
        registry.apply_diff(&Diff::UserAdded(user("bob", "srv-2"))).await;
        registry
            .apply_diff(&Diff::FileAdded(file("a.txt", "srv-1", "c1")))
            .await;

        let fresh = Registry::new();
        fresh.integrate_snapshot(registry.snapshot().await).await;

        let original: HashSet<_> = registry.users().await.into_iter().collect();
        let restored: HashSet<_> = fresh.users().await.into_iter().collect();
        assert_eq!(original, restored);

        let original: HashSet<_> = registry.files().await.into_iter().collect();
        let restored: HashSet<_> = fresh.files().await.into_iter().collect();
        assert_eq!(original, restored);
    }

    #[tokio::test]
    async fn test_convergence_after_dump_and_diff_exchange() {
        // Two registries seeded with disjoint local facts
        let r1 = Registry::new();
        let r2 = Registry::new();
        r1.apply_diff(&Diff::UserAdded(user("alice", "srv-1"))).await;
        r2.apply_diff(&Diff::UserAdded(user("bob", "srv-2"))).await;

        // R2 bootstraps from R1's full dump
        r2.integrate_snapshot(r1.snapshot().await).await;

        // Both then exchange all diffs generated since
        let d1 = Diff::UserAdded(user("carol", "srv-1"));
        let d2 = Diff::UserAdded(user("bob", "srv-2"));
        for d in [&d1, &d2] {
            r1.apply_diff(d).await;
            r2.apply_diff(d).await;
        }

        let s1: HashSet<_> = r1.users().await.into_iter().collect();
        let s2: HashSet<_> = r2.users().await.into_iter().collect();
        assert_eq!(s1, s2);
        assert_eq!(s1.len(), 3);
    }
}
