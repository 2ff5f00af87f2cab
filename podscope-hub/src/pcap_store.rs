//! Per-agent pcap append files and whole-session merge.
//!
//! Each agent ships its chunks with its own 24-byte global header at the
//! start of the first chunk, so files are appended verbatim and the merge
//! skips the first 24 bytes of every file behind one fresh header.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use podscope_common::pcap::{write_global_header, GLOBAL_HEADER_LEN};

pub struct PcapAggregator {
    dir: PathBuf,
    max_bytes: u64,
    inner: Mutex<AggInner>,
}

struct AggInner {
    files: HashMap<String, File>,
    total: u64,
}

impl PcapAggregator {
    /// Creates the aggregation directory if needed.
    pub fn new<P: AsRef<Path>>(dir: P, max_bytes: u64) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_bytes,
            inner: Mutex::new(AggInner { files: HashMap::new(), total: 0 }),
        })
    }

    /// Appends a chunk to the agent's file, opening it on first sight.
    ///
    /// The soft size cap refuses (drops) writes that would exceed it; an I/O
    /// error fails only this write and leaves other agents' files alone.
    pub fn write(&self, agent_id: &str, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        if inner.total + bytes.len() as u64 > self.max_bytes {
            warn!(
                agent = %agent_id,
                total = inner.total,
                max = self.max_bytes,
                "pcap size cap reached, dropping chunk"
            );
            return Ok(());
        }
        let path = self.file_path(agent_id);
        let file = match inner.files.entry(agent_id.to_string()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                e.insert(file)
            }
        };
        file.write_all(bytes)?;
        inner.total += bytes.len() as u64;
        Ok(())
    }

    /// One pcap stream for the whole session: a fresh global header followed
    /// by every per-agent file from byte offset 24. Read order is
    /// unspecified and the result is not globally time-ordered.
    pub fn session_pcap(&self) -> io::Result<Vec<u8>> {
        let inner = self.lock();
        let mut out = Vec::new();
        write_global_header(&mut out)?;
        for agent_id in inner.files.keys() {
            let path = self.file_path(agent_id);
            match std::fs::read(&path) {
                Ok(bytes) if bytes.len() > GLOBAL_HEADER_LEN => {
                    out.extend_from_slice(&bytes[GLOBAL_HEADER_LEN..]);
                }
                Ok(_) => {}
                Err(e) => warn!(agent = %agent_id, error = %e, "skipping unreadable pcap file"),
            }
        }
        Ok(out)
    }

    /// Session pcap for one stream. Stream-level filtering is not
    /// implemented; callers get the whole session.
    pub fn stream_pcap(&self, _stream_id: &str) -> io::Result<Vec<u8>> {
        self.session_pcap()
    }

    /// Truncates every per-agent file and resets the size counter.
    pub fn reset(&self) -> io::Result<()> {
        let mut inner = self.lock();
        for (agent_id, file) in &inner.files {
            if let Err(e) = file.set_len(0) {
                warn!(agent = %agent_id, error = %e, "failed to truncate pcap file");
            }
        }
        inner.total = 0;
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.lock().total
    }

    /// Closes all per-agent files; called when the session ends.
    pub fn close(&self) {
        self.lock().files.clear();
    }

    fn file_path(&self, agent_id: &str) -> PathBuf {
        // Agent ids come off the wire; keep them filesystem-safe.
        let safe: String = agent_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
            .collect();
        self.dir.join(format!("agent-{safe}.pcap"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AggInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
