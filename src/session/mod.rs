//! Session descriptors, lifecycle events and transport adapters
//!
//! A session is one transport connection (RTMP socket or FLV-over-HTTP
//! response). The protocol engines never see the transport; adapters here
//! own the I/O and bridge engine callbacks into the broadcast layer.

pub mod flv;
pub mod rtmp;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wire protocol a session speaks; decides which pre-muxed form of each
/// packet the hub delivers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Rtmp,
    Flv,
}

/// Lifecycle event names, emitted for external notification consumers
/// (webhooks, the HLS trigger, metrics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PrePlay,
    PostPlay,
    DonePlay,
    PrePublish,
    PostPublish,
    DonePublish,
}

/// A lifecycle event with a snapshot of the session it concerns.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub session: SessionInfo,
}

/// Descriptor for one session, also the lifecycle event payload.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Process-unique session id.
    pub id: u64,
    /// Peer address, empty for internal sessions (which skip play auth and
    /// lifecycle events).
    pub ip: String,
    pub protocol: Protocol,
    pub app: String,
    pub name: String,
    /// `/app/name`, the broadcast hub key.
    pub stream_path: String,
    /// Query-string parameters from the stream address (`sign`, ...).
    pub query: HashMap<String, String>,
    /// Unix milliseconds at session creation.
    pub create_time: u64,
    /// Unix milliseconds at session end, 0 while live.
    pub end_time: u64,
    pub in_bytes: u64,
    pub out_bytes: u64,
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Unix time in seconds, used by the signed-expiry auth check.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl SessionInfo {
    /// Allocate a descriptor with a fresh id.
    pub fn new(protocol: Protocol, ip: impl Into<String>) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            ip: ip.into(),
            protocol,
            app: String::new(),
            name: String::new(),
            stream_path: String::new(),
            query: HashMap::new(),
            create_time: now_millis(),
            end_time: 0,
            in_bytes: 0,
            out_bytes: 0,
        }
    }

    /// Fill stream addressing once publish/play names it.
    pub fn set_stream(
        &mut self,
        app: impl Into<String>,
        name: impl Into<String>,
        query: HashMap<String, String>,
    ) {
        self.app = app.into();
        self.name = name.into();
        self.stream_path = format!("/{}/{}", self.app, self.name);
        self.query = query;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_unique() {
        let a = SessionInfo::new(Protocol::Rtmp, "127.0.0.1:9999");
        let b = SessionInfo::new(Protocol::Flv, "");
        assert_ne!(a.id, b.id);
        assert!(a.create_time > 0);
    }

    #[test]
    fn test_set_stream_builds_path() {
        let mut info = SessionInfo::new(Protocol::Rtmp, "");
        info.set_stream("live", "demo", HashMap::new());
        assert_eq!(info.stream_path, "/live/demo");
    }
}
