use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use podscope_common::pcap::{write_global_header, write_packet_record};

/// Rolling pcap byte buffer shared between the capture loop and the flush
/// task. The global header is written once at creation, so the first chunk
/// swapped out carries it and every later chunk is records only.
pub struct PcapBuffer {
    bytes: Mutex<Vec<u8>>,
}

impl PcapBuffer {
    pub fn new() -> Self {
        let mut bytes = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = write_global_header(&mut bytes);
        Self { bytes: Mutex::new(bytes) }
    }

    /// Appends one raw frame as a pcap record.
    pub fn append_packet(&self, frame: &[u8], ts: DateTime<Utc>) {
        let mut bytes = self.lock();
        let _ = write_packet_record(&mut *bytes, frame, ts);
    }

    /// Atomically swaps the accumulated bytes out, leaving the buffer empty.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PcapBuffer {
    fn default() -> Self {
        Self::new()
    }
}
