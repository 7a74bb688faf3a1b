//! Server aggregate
//!
//! [`Server`] owns all process-wide state: the broadcast-hub table keyed by
//! stream path, the live session table, and the lifecycle event channel
//! external consumers (webhooks, HLS trigger, metrics) subscribe to.
//! Transport adapters receive an `Arc<Server>` and go through it for
//! everything shared.

pub mod config;
pub mod listener;

pub use config::{AuthConfig, ServerConfig};
pub use listener::run_rtmp_listener;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::broadcast::BroadcastHub;
use crate::session::{Event, SessionInfo};

/// Capacity of the lifecycle event channel; slow consumers lag, they never
/// block the media path.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared server state: configuration, hub and session registries, events.
pub struct Server {
    config: ServerConfig,
    broadcasts: Mutex<HashMap<String, Arc<Mutex<BroadcastHub>>>>,
    sessions: Mutex<HashMap<u64, SessionInfo>>,
    events: broadcast::Sender<Event>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            broadcasts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Subscribe to lifecycle events (prePlay, postPublish, ...).
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Get or create the hub for a stream path. Hubs are created on first
    /// publish or first play-before-publish and persist after the publisher
    /// departs.
    pub fn hub(&self, stream_path: &str) -> Arc<Mutex<BroadcastHub>> {
        let mut broadcasts = self.broadcasts.lock();
        broadcasts
            .entry(stream_path.to_string())
            .or_insert_with(|| {
                tracing::debug!(stream = %stream_path, "creating broadcast hub");
                Arc::new(Mutex::new(BroadcastHub::new(
                    self.config.auth.clone(),
                    self.events.clone(),
                )))
            })
            .clone()
    }

    /// Look up an existing hub without creating one.
    pub fn find_hub(&self, stream_path: &str) -> Option<Arc<Mutex<BroadcastHub>>> {
        self.broadcasts.lock().get(stream_path).cloned()
    }

    /// Number of known stream paths.
    pub fn stream_count(&self) -> usize {
        self.broadcasts.lock().len()
    }

    /// Insert or refresh a session snapshot.
    pub fn register_session(&self, info: &SessionInfo) {
        self.sessions.lock().insert(info.id, info.clone());
    }

    pub fn unregister_session(&self, id: u64) {
        self.sessions.lock().remove(&id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Protocol;

    #[test]
    fn test_hub_get_or_create() {
        let server = Server::new(ServerConfig::default());
        assert!(server.find_hub("/live/demo").is_none());

        let hub = server.hub("/live/demo");
        assert_eq!(server.stream_count(), 1);

        // Same path resolves to the same hub
        let again = server.hub("/live/demo");
        assert!(Arc::ptr_eq(&hub, &again));

        assert!(server.find_hub("/live/demo").is_some());
    }

    #[test]
    fn test_hub_persists_after_publisher_leaves() {
        let server = Server::new(ServerConfig::default());
        let hub = server.hub("/live/demo");

        let mut publisher = SessionInfo::new(Protocol::Rtmp, "127.0.0.1:5000");
        publisher.set_stream("live", "demo", HashMap::new());
        hub.lock().post_publish(&publisher).unwrap();
        hub.lock().done_publish(&publisher);

        // Hub survives; a later publisher reuses it
        assert_eq!(server.stream_count(), 1);
        let again = server.hub("/live/demo");
        assert!(Arc::ptr_eq(&hub, &again));
        assert!(!again.lock().has_publisher());
    }

    #[test]
    fn test_session_registry() {
        let server = Server::new(ServerConfig::default());
        let info = SessionInfo::new(Protocol::Rtmp, "127.0.0.1:5000");
        server.register_session(&info);
        assert_eq!(server.session_count(), 1);
        server.unregister_session(info.id);
        assert_eq!(server.session_count(), 0);
    }
}
