// Observed network path tracking
//
// Accumulates the path candidates every session reports, per session and as
// a process-lifetime global union. Diagnostic data for the UI's path-pinning
// widget; never authoritative, cleared only by process restart.

use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::stream::types::SessionId;

#[derive(Default)]
struct RegistryState {
    per_session: HashMap<SessionId, BTreeSet<String>>,
    union: BTreeSet<String>,
}

/// Registry of network paths observed across all sessions
#[derive(Default)]
pub struct PathRegistry {
    state: RwLock<RegistryState>,
}

impl PathRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge newly observed paths for a session into the per-session set and
    /// the global union
    ///
    /// Idempotent: re-recording already known paths changes nothing. Returns
    /// the number of paths that were new to the global union.
    pub async fn record_observed<I>(&self, session: SessionId, paths: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.state.write().await;
        let session_paths = state.per_session.entry(session).or_default();

        let mut fresh = Vec::new();
        for path in paths {
            if session_paths.insert(path.clone()) {
                fresh.push(path);
            }
        }

        let mut newly_global = 0;
        for path in fresh {
            if state.union.insert(path.clone()) {
                log::debug!("New network path observed: {path}");
                newly_global += 1;
            }
        }
        newly_global
    }

    /// Paths observed by one session so far
    pub async fn session_paths(&self, session: SessionId) -> BTreeSet<String> {
        self.state
            .read()
            .await
            .per_session
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every path observed in this process lifetime
    pub async fn global_union(&self) -> BTreeSet<String> {
        self.state.read().await.union.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_dedup_within_session() {
        let registry = PathRegistry::new();
        let session = Uuid::new_v4();

        registry
            .record_observed(session, vec!["192.168.2.1".to_string()])
            .await;
        registry
            .record_observed(session, vec!["192.168.2.1".to_string()])
            .await;

        assert_eq!(registry.global_union().await.len(), 1);
        assert_eq!(registry.session_paths(session).await.len(), 1);
    }

    #[tokio::test]
    async fn test_union_across_sessions() {
        let registry = PathRegistry::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        registry
            .record_observed(a, vec!["192.168.2.1".to_string(), "10.0.0.1".to_string()])
            .await;
        let fresh = registry
            .record_observed(b, vec!["10.0.0.1".to_string(), "172.16.0.1".to_string()])
            .await;

        // Only the path unseen globally counts as fresh.
        assert_eq!(fresh, 1);
        assert_eq!(registry.global_union().await.len(), 3);
        assert_eq!(registry.session_paths(b).await.len(), 2);
    }

    #[tokio::test]
    async fn test_union_survives_session_scope() {
        let registry = PathRegistry::new();
        let session = Uuid::new_v4();
        registry
            .record_observed(session, vec!["192.168.2.1".to_string()])
            .await;

        // The union is process-lifetime diagnostics, not tied to the
        // session living on in the registry.
        assert!(registry.global_union().await.contains("192.168.2.1"));
    }
}
