use std::io::Cursor;

use chrono::{DateTime, Utc};
use podscope_common::pcap::{
    read_global_header, write_global_header, write_packet_record, DecodeError, PcapReader,
    GLOBAL_HEADER_LEN, LINKTYPE_ETHERNET, MAGIC, RECORD_HEADER_LEN, SNAPLEN,
};

#[test]
fn global_header_exact_bytes() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = Vec::new();
    write_global_header(&mut buf)?;
    let expected: [u8; GLOBAL_HEADER_LEN] = [
        0xD4, 0xC3, 0xB2, 0xA1, // magic, little-endian
        0x02, 0x00, 0x04, 0x00, // version 2.4
        0x00, 0x00, 0x00, 0x00, // thiszone
        0x00, 0x00, 0x00, 0x00, // sigfigs
        0xFF, 0xFF, 0x00, 0x00, // snaplen 65535
        0x01, 0x00, 0x00, 0x00, // linktype ethernet
    ];
    assert_eq!(buf, expected);
    Ok(())
}

#[test]
fn global_header_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = Vec::new();
    write_global_header(&mut buf)?;
    let hdr = read_global_header(&mut Cursor::new(&buf))?;
    assert_eq!(hdr.magic, MAGIC);
    assert_eq!(hdr.version_major, 2);
    assert_eq!(hdr.version_minor, 4);
    assert_eq!(hdr.snaplen, SNAPLEN);
    assert_eq!(hdr.linktype, LINKTYPE_ETHERNET);
    Ok(())
}

#[test]
fn microseconds_are_truncated_not_rounded() -> Result<(), Box<dyn std::error::Error + Send + Sync>>
{
    let ts: DateTime<Utc> = "2024-06-15T10:30:45.123456789Z".parse()?;
    let mut buf = Vec::new();
    write_packet_record(&mut buf, b"xyz", ts)?;
    let ts_usec = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    assert_eq!(ts_usec, 123_456);
    Ok(())
}

#[test]
fn packet_record_round_trip() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ts: DateTime<Utc> = "2024-06-15T10:30:45.123456789Z".parse()?;
    let payload = b"\x00\x01\x02hello".to_vec();

    let mut buf = Vec::new();
    write_global_header(&mut buf)?;
    write_packet_record(&mut buf, &payload, ts)?;

    let mut reader = PcapReader::new(Cursor::new(&buf))?;
    let record = reader.next_record()?.ok_or("missing record")?;
    assert_eq!(record.data, payload);
    assert_eq!(record.orig_len as usize, payload.len());
    assert!(record.ts_usec < 1_000_000);
    // Microsecond precision survives the trip; the sub-microsecond tail is gone.
    let expected: DateTime<Utc> = "2024-06-15T10:30:45.123456Z".parse()?;
    assert_eq!(record.timestamp(), expected);
    assert!(reader.next_record()?.is_none());
    Ok(())
}

#[test]
fn bad_magic_is_rejected() {
    let mut buf = vec![0u8; GLOBAL_HEADER_LEN];
    buf[0] = 0xDE;
    buf[1] = 0xAD;
    match read_global_header(&mut Cursor::new(&buf)) {
        Err(DecodeError::BadMagic(_)) => {}
        other => panic!("expected BadMagic, got {other:?}"),
    }
}

#[test]
fn truncated_record_aborts_iteration() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = Vec::new();
    write_global_header(&mut buf)?;
    write_packet_record(&mut buf, b"full packet", Utc::now())?;
    // Cut the second record short in the middle of its header.
    buf.extend_from_slice(&[0u8; RECORD_HEADER_LEN / 2]);

    let mut reader = PcapReader::new(Cursor::new(&buf))?;
    assert!(reader.next_record()?.is_some());
    match reader.next_record() {
        Err(DecodeError::Truncated(_)) => Ok(()),
        other => panic!("expected Truncated, got {other:?}"),
    }
}
