//! Minimal libpcap file codec.
//!
//! All multi-byte fields are little-endian, matching the classic
//! `0xA1B2C3D4` microsecond-resolution format. Record timestamps are
//! truncated (never rounded) to microseconds.

use std::io::{self, Read, Write};

use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

pub const MAGIC: u32 = 0xA1B2_C3D4;
pub const VERSION_MAJOR: u16 = 2;
pub const VERSION_MINOR: u16 = 4;
pub const SNAPLEN: u32 = 65_535;
pub const LINKTYPE_ETHERNET: u32 = 1;
/// Size of the file-level header in bytes.
pub const GLOBAL_HEADER_LEN: usize = 24;
/// Size of the per-record header in bytes.
pub const RECORD_HEADER_LEN: usize = 16;

/// Errors produced while decoding a pcap stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad pcap magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("truncated pcap {0}")]
    Truncated(&'static str),
}

/// Decoded file-level header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub linktype: u32,
}

/// One decoded packet record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRecord {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl PacketRecord {
    /// Record timestamp at microsecond resolution.
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(i64::from(self.ts_sec), self.ts_usec.saturating_mul(1000))
            .single()
            .unwrap_or_default()
    }
}

/// Writes the canonical 24-byte global header.
pub fn write_global_header<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(&MAGIC.to_le_bytes())?;
    w.write_all(&VERSION_MAJOR.to_le_bytes())?;
    w.write_all(&VERSION_MINOR.to_le_bytes())?;
    w.write_all(&0i32.to_le_bytes())?; // thiszone
    w.write_all(&0u32.to_le_bytes())?; // sigfigs
    w.write_all(&SNAPLEN.to_le_bytes())?;
    w.write_all(&LINKTYPE_ETHERNET.to_le_bytes())?;
    Ok(())
}

/// Writes one packet record: 16-byte header then the payload verbatim.
///
/// Included and original lengths both equal the payload length; no
/// truncation happens at this layer.
pub fn write_packet_record<W: Write>(w: &mut W, payload: &[u8], ts: DateTime<Utc>) -> io::Result<()> {
    let ts_sec = ts.timestamp() as u32;
    let ts_usec = ts.timestamp_subsec_nanos() / 1000;
    let len = payload.len() as u32;
    w.write_all(&ts_sec.to_le_bytes())?;
    w.write_all(&ts_usec.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?; // incl_len
    w.write_all(&len.to_le_bytes())?; // orig_len
    w.write_all(payload)?;
    Ok(())
}

/// Reads and validates a global header from the start of a stream.
pub fn read_global_header<R: Read>(r: &mut R) -> Result<GlobalHeader, DecodeError> {
    let mut buf = [0u8; GLOBAL_HEADER_LEN];
    match read_fully(r, &mut buf)? {
        n if n == GLOBAL_HEADER_LEN => {}
        _ => return Err(DecodeError::Truncated("global header")),
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    Ok(GlobalHeader {
        magic,
        version_major: u16::from_le_bytes([buf[4], buf[5]]),
        version_minor: u16::from_le_bytes([buf[6], buf[7]]),
        thiszone: i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        sigfigs: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
        snaplen: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
        linktype: u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]),
    })
}

/// Iterates packet records of a pcap stream until EOF.
///
/// A header or payload cut short mid-record aborts iteration with
/// [`DecodeError::Truncated`]; a clean EOF at a record boundary ends it.
pub struct PcapReader<R> {
    inner: R,
    header: GlobalHeader,
}

impl<R: Read> PcapReader<R> {
    /// Consumes and validates the global header.
    pub fn new(mut inner: R) -> Result<Self, DecodeError> {
        let header = read_global_header(&mut inner)?;
        Ok(Self { inner, header })
    }

    pub fn global_header(&self) -> &GlobalHeader {
        &self.header
    }

    /// Next record, or `None` on clean EOF.
    pub fn next_record(&mut self) -> Result<Option<PacketRecord>, DecodeError> {
        let mut hdr = [0u8; RECORD_HEADER_LEN];
        match read_fully(&mut self.inner, &mut hdr)? {
            0 => return Ok(None),
            n if n == RECORD_HEADER_LEN => {}
            _ => return Err(DecodeError::Truncated("record header")),
        }
        let ts_sec = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]);
        let ts_usec = u32::from_le_bytes([hdr[4], hdr[5], hdr[6], hdr[7]]);
        let incl_len = u32::from_le_bytes([hdr[8], hdr[9], hdr[10], hdr[11]]);
        let orig_len = u32::from_le_bytes([hdr[12], hdr[13], hdr[14], hdr[15]]);
        let mut data = vec![0u8; incl_len as usize];
        if read_fully(&mut self.inner, &mut data)? != data.len() {
            return Err(DecodeError::Truncated("record payload"));
        }
        Ok(Some(PacketRecord { ts_sec, ts_usec, orig_len, data }))
    }
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
