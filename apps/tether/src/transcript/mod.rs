//! Local transcript retention.
//!
//! Every stdin/stdout/status event for a session is appended here, bounded
//! by entry count and an estimated byte footprint so a chatty session can
//! scroll back and be diagnosed without growing without limit. The same
//! entry model is the NDJSON line format served by the transcript endpoint,
//! so hydration parses straight into it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Entry-count cap for the transcript ring.
pub const TRANSCRIPT_MAX_ENTRIES: usize = 5000;

/// Estimated-byte cap for the transcript ring (~1 MiB).
pub const TRANSCRIPT_MAX_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Stdin,
    Stdout,
    Stderr,
    Status,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Stdin => "stdin",
            Direction::Stdout => "stdout",
            Direction::Stderr => "stderr",
            Direction::Status => "status",
        }
    }
}

/// One transcript line, locally recorded or hydrated from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay: Option<bool>,
}

impl TranscriptEntry {
    pub fn now(direction: Direction) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            direction,
            encoding: None,
            data: None,
            message: None,
            replay: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = Some(replay);
        self
    }

    /// Cheap serialized-size proxy: the caps bound memory, they do not
    /// account it precisely.
    fn estimated_bytes(&self) -> usize {
        self.data.as_deref().map_or(0, str::len)
            + self.message.as_deref().map_or(0, str::len)
            + self.direction.as_str().len()
    }

    /// Parse one NDJSON transcript line.
    pub fn parse_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Byte- and count-bounded ring of transcript entries, oldest evicted
/// first.
#[derive(Debug)]
pub struct TranscriptStore {
    entries: VecDeque<TranscriptEntry>,
    estimated_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new(TRANSCRIPT_MAX_ENTRIES, TRANSCRIPT_MAX_BYTES)
    }
}

impl TranscriptStore {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            estimated_bytes: 0,
            max_entries,
            max_bytes,
        }
    }

    /// Append an entry, then evict from the head until both caps hold.
    pub fn record(&mut self, entry: TranscriptEntry) {
        self.estimated_bytes += entry.estimated_bytes();
        self.entries.push_back(entry);

        while self.entries.len() > self.max_entries || self.estimated_bytes > self.max_bytes {
            match self.entries.pop_front() {
                Some(evicted) => {
                    self.estimated_bytes =
                        self.estimated_bytes.saturating_sub(evicted.estimated_bytes());
                }
                None => break,
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &TranscriptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Drop everything; used when replay resets history on first connect.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.estimated_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout_entry(data: &str) -> TranscriptEntry {
        TranscriptEntry::now(Direction::Stdout).with_data(data)
    }

    #[test]
    fn records_in_order() {
        let mut store = TranscriptStore::default();
        store.record(stdout_entry("one"));
        store.record(stdout_entry("two"));
        let data: Vec<_> = store.entries().map(|e| e.data.clone().unwrap()).collect();
        assert_eq!(data, vec!["one", "two"]);
    }

    #[test]
    fn entry_cap_evicts_oldest_first() {
        let mut store = TranscriptStore::new(3, usize::MAX);
        for i in 0..5 {
            store.record(stdout_entry(&i.to_string()));
        }
        assert_eq!(store.len(), 3);
        let first = store.entries().next().unwrap();
        assert_eq!(first.data.as_deref(), Some("2"));
    }

    #[test]
    fn byte_cap_evicts_until_satisfied() {
        // Each entry estimates 36 bytes: 30 of data plus "stdout".
        let mut store = TranscriptStore::new(usize::MAX, 80);
        store.record(stdout_entry(&"a".repeat(30)));
        store.record(stdout_entry(&"b".repeat(30)));
        // Third entry pushes the estimate past the cap; the head must go.
        store.record(stdout_entry(&"c".repeat(30)));
        assert!(store.estimated_bytes() <= 80);
        assert_eq!(store.len(), 2);
        let first = store.entries().next().unwrap();
        assert!(first.data.as_deref().unwrap().starts_with('b'));
    }

    #[test]
    fn caps_hold_after_arbitrary_sequences() {
        let mut store = TranscriptStore::default();
        for i in 0..7000 {
            store.record(stdout_entry(&"x".repeat(1 + i % 700)));
        }
        assert!(store.len() <= TRANSCRIPT_MAX_ENTRIES);
        assert!(store.estimated_bytes() <= TRANSCRIPT_MAX_BYTES);
    }

    #[test]
    fn oversized_single_entry_does_not_wedge_the_store() {
        let mut store = TranscriptStore::new(10, 16);
        store.record(stdout_entry(&"x".repeat(64)));
        // The lone over-budget entry is evicted rather than looping.
        assert!(store.is_empty());
        store.record(stdout_entry("ok"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reset_clears_entries_and_estimate() {
        let mut store = TranscriptStore::default();
        store.record(stdout_entry("data"));
        store.reset();
        assert!(store.is_empty());
        assert_eq!(store.estimated_bytes(), 0);
    }

    #[test]
    fn ndjson_line_roundtrip() {
        let entry = TranscriptEntry::now(Direction::Stdin)
            .with_data("ls\n")
            .with_replay(false);
        let line = serde_json::to_string(&entry).unwrap();
        let parsed = TranscriptEntry::parse_line(&line).unwrap();
        assert_eq!(parsed.direction, Direction::Stdin);
        assert_eq!(parsed.data.as_deref(), Some("ls\n"));
        assert_eq!(parsed.replay, Some(false));
    }

    #[test]
    fn parse_line_rejects_garbage() {
        assert!(TranscriptEntry::parse_line("not json").is_err());
        assert!(TranscriptEntry::parse_line(r#"{"direction":"stdout"}"#).is_err());
    }
}
