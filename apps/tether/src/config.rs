use std::env;
use std::time::Duration;

use crate::transcript::{TRANSCRIPT_MAX_BYTES, TRANSCRIPT_MAX_ENTRIES};

/// Client configuration.
///
/// Protocol timings default to the values the server pairs with; they are
/// overridable for tests, not meant as user knobs.
#[derive(Debug, Clone)]
pub struct Config {
    /// Session service base URL (`TETHER_SESSION_SERVER`).
    pub session_server: String,
    /// Optimistic local echo of printable keystrokes (`TETHER_LOCAL_ECHO`).
    /// Off by default.
    pub local_echo: bool,
    /// Heartbeat cadence while the socket is open.
    pub heartbeat_interval: Duration,
    /// Delay before the single reconnect attempt after an unexpected close.
    pub reconnect_delay: Duration,
    /// Echo predictions older than this are treated as never acknowledged.
    pub echo_timeout: Duration,
    /// Maximum outstanding echo predictions.
    pub echo_cap: usize,
    pub transcript_max_entries: usize,
    pub transcript_max_bytes: usize,
    /// Hydration renders at most this many entries per slice...
    pub hydration_slice_entries: usize,
    /// ...or until this much wall time has elapsed, whichever first.
    pub hydration_slice_budget: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let session_server = env::var("TETHER_SESSION_SERVER")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        let local_echo = env::var("TETHER_LOCAL_ECHO")
            .map(|v| v != "0" && !v.is_empty())
            .unwrap_or(false);
        Self {
            session_server,
            local_echo,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_server: "http://127.0.0.1:8080".to_string(),
            local_echo: false,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_millis(1000),
            echo_timeout: Duration::from_secs(5),
            echo_cap: 128,
            transcript_max_entries: TRANSCRIPT_MAX_ENTRIES,
            transcript_max_bytes: TRANSCRIPT_MAX_BYTES,
            hydration_slice_entries: 200,
            hydration_slice_budget: Duration::from_millis(12),
        }
    }
}
