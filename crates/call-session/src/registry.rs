//! Call-ID keyed session table (§5): a `dashmap` the same way the teacher's
//! dialog layer indexes transactions, so lookups don't need a global lock.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::session::Session;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Look up a session by Call-ID, creating one with `config` if absent.
    pub fn get_or_create(&self, call_id: &str, config: SessionConfig) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(config))))
            .clone()
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(call_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, call_id: &str) {
        self.sessions.remove(call_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_session_for_the_same_call_id() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("call-1", SessionConfig::default());
        let b = registry.get_or_create("call-1", SessionConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_drops_the_session_from_the_table() {
        let registry = SessionRegistry::new();
        registry.get_or_create("call-1", SessionConfig::default());
        assert_eq!(registry.len(), 1);
        registry.remove("call-1");
        assert!(registry.is_empty());
    }
}
