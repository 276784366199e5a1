//! Browser↔server channel protocol definitions.
//!
//! The in-page client opens a single duplex channel back to the server and
//! declares which account it serves. All messages are JSON text frames.
//!
//! Frame directions:
//! - `PageEvent`    — page → server per-request response fragments
//! - `DispatchFrame` — server → page request to execute
//! - `ControlFrame` — server → page out-of-band control (log level, …)

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

pub const MAX_PAYLOAD_BYTES: usize = 8_388_608; // 8 MB

/// How long a dropped channel may stay unbound before its queues are closed
/// and a lightweight reconnect is attempted.
pub const RECONNECT_GRACE_MS: u64 = 10_000;
/// Upper bound on a single lightweight-reconnect attempt.
pub const LIGHTWEIGHT_RECONNECT_TIMEOUT_MS: u64 = 50_000;
/// How long to wait for the in-page client to report a working channel.
pub const CHANNEL_INIT_TIMEOUT_MS: u64 = 60_000;
/// Navigation budget for the studio application.
pub const NAVIGATION_TIMEOUT_MS: u64 = 180_000;
/// Health timer tick.
pub const HEALTH_TICK_MS: u64 = 4_000;
/// Park the cursor at (1,1) every this many health ticks.
pub const CURSOR_PARK_INTERVAL_TICKS: u64 = 15;
/// Persist refreshed credentials every this many health ticks (24 h at 4 s).
pub const CREDENTIAL_SAVE_INTERVAL_TICKS: u64 = 21_600;
/// Short pause after closing a session so the OS releases its ports.
pub const SESSION_CLEANUP_PAUSE_MS: u64 = 200;
/// How long a dispatched request may wait for its first response fragment.
pub const FIRST_FRAGMENT_TIMEOUT_MS: u64 = 60_000;
/// How long an inbound request waits for a switch transition to settle.
pub const BUSY_RETRY_MS: u64 = 250;
pub const BUSY_RETRY_ATTEMPTS: u32 = 8;

// ── Close reasons ────────────────────────────────────────────────────────────

pub mod close_reasons {
    /// Channel declared a missing or negative account index.
    pub const INVALID_INDEX: &str = "invalid-index";
    /// A newer channel for the same account took over.
    pub const REPLACED: &str = "replaced";
    /// The account was removed while the channel was live.
    pub const ACCOUNT_REMOVED: &str = "account-removed";
}

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const UPSTREAM_UNAVAILABLE: &str = "UPSTREAM_UNAVAILABLE";
    pub const REGION_BLOCKED: &str = "REGION_BLOCKED";
    pub const UNREACHABLE: &str = "UNREACHABLE";
    pub const AUTH_EXPIRED: &str = "AUTH_EXPIRED";
    pub const BUSY: &str = "BUSY";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── Page → server events ─────────────────────────────────────────────────────

/// A response fragment reported by the in-page client.
///
/// Fragments are routed to the per-request message queue by `request_id` and
/// delivered to the waiting HTTP handler in channel order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PageEvent {
    /// Upstream response status and headers; fixes the outbound status.
    ResponseHeaders {
        request_id: String,
        status: u16,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        headers: serde_json::Map<String, serde_json::Value>,
    },
    /// One body fragment, in the internal dialect.
    Chunk {
        request_id: String,
        data: serde_json::Value,
    },
    /// Terminal error reported by the page.
    Error {
        request_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        message: String,
    },
    /// End of stream; translated into the queue terminal.
    StreamClose { request_id: String },
}

impl PageEvent {
    pub fn request_id(&self) -> &str {
        match self {
            Self::ResponseHeaders { request_id, .. }
            | Self::Chunk { request_id, .. }
            | Self::Error { request_id, .. }
            | Self::StreamClose { request_id } => request_id,
        }
    }
}

// ── Server → page frames ─────────────────────────────────────────────────────

/// A request for the in-page client to execute against the studio backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchFrame {
    pub request_id: String,
    pub body: serde_json::Value,
    pub stream: bool,
}

/// Out-of-band control message, broadcast to every live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ControlFrame {
    SetLogLevel { level: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_event_roundtrip() {
        let raw = r#"{"event_type":"chunk","request_id":"r-1","data":{"candidates":[]}}"#;
        let ev: PageEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.request_id(), "r-1");
        match ev {
            PageEvent::Chunk { data, .. } => assert!(data.get("candidates").is_some()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn stream_close_parses() {
        let ev: PageEvent =
            serde_json::from_str(r#"{"event_type":"stream_close","request_id":"r-2"}"#).unwrap();
        assert!(matches!(ev, PageEvent::StreamClose { .. }));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let res = serde_json::from_str::<PageEvent>(
            r#"{"event_type":"telemetry","request_id":"r-3"}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn dispatch_frame_serializes_stream_flag() {
        let frame = DispatchFrame {
            request_id: "r-9".into(),
            body: serde_json::json!({"contents": []}),
            stream: true,
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains(r#""stream":true"#));
    }
}
