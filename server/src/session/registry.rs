//! Registry of live tracker sessions

use super::connection::SessionHandle;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Tracks every connected tracker by IMEI
///
/// At most one entry exists per IMEI. A later handshake for the same IMEI
/// replaces the earlier entry; the replaced session keeps running until it
/// fails or times out on its own.
pub struct SessionRegistry {
    /// Map of imei -> session handle
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session, returning the entry it replaced
    pub async fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(handle.imei.clone(), handle)
    }

    /// Get the session handle for a specific tracker
    pub async fn get(&self, imei: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(imei).cloned()
    }

    /// Remove whatever session is registered under `imei`
    pub async fn unregister(&self, imei: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(imei)
    }

    /// Remove the entry for `imei` only if it still belongs to `session_id`
    ///
    /// Used by session teardown so a replaced session does not evict its
    /// successor.
    pub async fn unregister_session(&self, imei: &str, session_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(imei) {
            Some(entry) if entry.id == session_id => {
                sessions.remove(imei);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of all registered sessions, in no particular order
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.values().cloned().collect()
    }

    /// Get the number of connected trackers
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_handle;

    #[tokio::test]
    async fn test_get_returns_latest_registration() {
        let registry = SessionRegistry::new();
        let (first, _peer1) = test_handle("352093086403655").await;
        let (second, _peer2) = test_handle("352093086403655").await;

        assert!(registry.register(first.clone()).await.is_none());
        let replaced = registry.register(second.clone()).await.expect("first entry replaced");
        assert_eq!(replaced.id, first.id);

        let current = registry.get("352093086403655").await.expect("registered");
        assert_eq!(current.id, second.id);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_then_get_is_none() {
        let registry = SessionRegistry::new();
        let (handle, _peer) = test_handle("352093086403655").await;

        registry.register(handle).await;
        assert!(registry.unregister("352093086403655").await.is_some());
        assert!(registry.get("352093086403655").await.is_none());
        assert!(registry.unregister("352093086403655").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_session_cannot_evict_successor() {
        let registry = SessionRegistry::new();
        let (old, _peer1) = test_handle("352093086403655").await;
        let (new, _peer2) = test_handle("352093086403655").await;

        registry.register(old.clone()).await;
        registry.register(new.clone()).await;

        assert!(!registry.unregister_session("352093086403655", old.id).await);
        assert!(registry.get("352093086403655").await.is_some());
        assert!(registry.unregister_session("352093086403655", new.id).await);
        assert!(registry.get("352093086403655").await.is_none());
    }

    #[tokio::test]
    async fn test_identities_are_case_sensitive() {
        let registry = SessionRegistry::new();
        let (lower, _peer1) = test_handle("tracker-a").await;
        let (upper, _peer2) = test_handle("TRACKER-A").await;

        registry.register(lower).await;
        registry.register(upper).await;
        assert_eq!(registry.count().await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_registry() {
        let registry = SessionRegistry::new();
        for imei in ["a", "b", "c"] {
            let (handle, _peer) = test_handle(imei).await;
            registry.register(handle).await;
        }

        let snapshot = registry.snapshot().await;
        registry.unregister("a").await;

        let mut imeis: Vec<_> = snapshot.iter().map(|h| h.imei.as_str()).collect();
        imeis.sort_unstable();
        assert_eq!(imeis, ["a", "b", "c"]);
        assert_eq!(registry.count().await, 2);
    }
}
