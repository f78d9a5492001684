//! Output replay and transcript hydration.
//!
//! On every (re)connect the server streams buffered history before live
//! output. The first replay on a brand-new connection resets the terminal
//! so stale pre-reconnect content never interleaves with authoritative
//! history; once replay completes, the full NDJSON transcript is fetched
//! over REST and folded into the local store in time-sliced batches so a
//! large history never stalls the driver.

use std::time::Instant;

use tracing::{debug, warn};

use crate::protocol::ReplayPayload;
use crate::session::SessionApi;
use crate::tab::{Tab, UiEvent};
use crate::transcript::TranscriptEntry;

/// Per-socket replay bookkeeping, reset when a socket opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayState {
    /// True from socket open until the server marks replay complete.
    pub pending: bool,
    pub complete: bool,
    pub chunk_count: u32,
    pub truncated: bool,
}

impl ReplayState {
    pub fn for_new_socket() -> Self {
        Self {
            pending: true,
            complete: false,
            chunk_count: 0,
            truncated: false,
        }
    }
}

/// Fold one `output_replay` envelope into the tab.
///
/// Returns true when replay just completed and transcript hydration should
/// be kicked off.
pub fn apply_replay(tab: &mut Tab, payload: ReplayPayload) -> bool {
    // The first chunks seen while pending are the authoritative start of
    // history: on a tab that has never completed a replay, whatever the
    // terminal currently shows predates this history and must go.
    if tab.replay.pending
        && tab.replay.chunk_count == 0
        && !tab.has_ever_connected
        && !payload.chunks.is_empty()
    {
        debug!(target: "tether::replay", tab = %tab.id, "resetting terminal for replayed history");
        tab.sink.reset();
        tab.transcript.reset();
    }

    for chunk in &payload.chunks {
        let bytes = match chunk.decoded_data() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target: "tether::replay", tab = %tab.id, error = %err, "dropping replay chunk");
                continue;
            }
        };
        tab.replay.chunk_count += 1;
        tab.deliver_output(bytes, chunk.direction(), true, chunk.record);
    }

    if payload.truncated && !tab.replay.truncated {
        tab.replay.truncated = true;
        debug!(
            target: "tether::replay",
            tab = %tab.id,
            generated = ?payload.generated,
            "server trimmed replay scrollback"
        );
        tab.emit(UiEvent::ReplayTruncated);
    }

    if payload.complete {
        tab.replay.pending = false;
        tab.replay.complete = true;
        tab.has_ever_connected = true;
        return !tab.transcript_hydrated;
    }
    false
}

/// Fetch and fold the session's full transcript.
///
/// Idempotent per session: runs at most once to completion, refuses to run
/// concurrently, and discards its result if the socket was superseded
/// while the fetch was in flight. Failures leave whatever was hydrated so
/// far in place; a later replay completion may retry.
pub async fn hydrate_transcript(tab: &mut Tab, api: &SessionApi) {
    if tab.transcript_hydrated || tab.transcript_hydrating {
        return;
    }
    let Some(session_id) = tab.session().map(|s| s.id.clone()) else {
        return;
    };
    tab.transcript_hydrating = true;
    let generation = tab.socket_generation;

    let body = match api.transcript(&session_id, None).await {
        Ok(body) => body,
        Err(err) => {
            warn!(target: "tether::replay", tab = %tab.id, error = %err, "transcript fetch failed");
            tab.transcript_hydrating = false;
            return;
        }
    };

    if tab.socket_generation != generation {
        debug!(target: "tether::replay", tab = %tab.id, "discarding stale transcript fetch");
        tab.transcript_hydrating = false;
        return;
    }

    // The server transcript is the authoritative superset of everything
    // replay already recorded; rebuild the local store from it.
    tab.transcript.reset();

    let slice_entries = tab.config.hydration_slice_entries;
    let slice_budget = tab.config.hydration_slice_budget;
    let mut slice_start = Instant::now();
    let mut in_slice = 0usize;
    let mut hydrated = 0usize;
    let mut skipped = 0usize;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match TranscriptEntry::parse_line(line) {
            Ok(entry) => {
                tab.transcript.record(entry);
                hydrated += 1;
                in_slice += 1;
            }
            Err(err) => {
                warn!(target: "tether::replay", tab = %tab.id, error = %err, "skipping bad transcript line");
                skipped += 1;
                continue;
            }
        }

        if in_slice >= slice_entries || slice_start.elapsed() >= slice_budget {
            tokio::task::yield_now().await;
            in_slice = 0;
            slice_start = Instant::now();
        }
    }

    debug!(
        target: "tether::replay",
        tab = %tab.id,
        hydrated,
        skipped,
        "transcript hydrated"
    );
    tab.transcript_hydrated = true;
    tab.transcript_hydrating = false;
}
