//! Terminal sink seam.
//!
//! Cell and glyph rendering belongs to an external emulator widget; the
//! protocol core only needs somewhere to push bytes, clear history before a
//! replay, and pull focus when a session starts.

use std::io::{self, Write as _};
use std::sync::{Arc, Mutex};

pub trait TerminalSink: Send {
    fn write(&mut self, bytes: &[u8]);

    /// Clear the visible terminal before rendering authoritative history.
    fn reset(&mut self);

    fn focus(&mut self) {}
}

/// Writes straight to stdout; the CLI's sink.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl TerminalSink for StdoutSink {
    fn write(&mut self, bytes: &[u8]) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn reset(&mut self) {
        let mut stdout = io::stdout();
        // Clear screen and home the cursor.
        let _ = stdout.write_all(b"\x1b[2J\x1b[H");
        let _ = stdout.flush();
    }
}

#[derive(Debug, Default)]
pub struct CaptureRecord {
    pub written: Vec<u8>,
    pub resets: usize,
    pub focuses: usize,
}

/// Records sink calls for inspection; the test-side sink.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    record: Arc<Mutex<CaptureRecord>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<u8> {
        self.record.lock().unwrap().written.clone()
    }

    pub fn written_utf8(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }

    pub fn resets(&self) -> usize {
        self.record.lock().unwrap().resets
    }
}

impl TerminalSink for CaptureSink {
    fn write(&mut self, bytes: &[u8]) {
        self.record.lock().unwrap().written.extend_from_slice(bytes);
    }

    fn reset(&mut self) {
        let mut record = self.record.lock().unwrap();
        record.written.clear();
        record.resets += 1;
    }

    fn focus(&mut self) {
        self.record.lock().unwrap().focuses += 1;
    }
}
