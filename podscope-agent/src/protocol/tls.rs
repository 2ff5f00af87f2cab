//! TLS ClientHello recognition.
//!
//! Walks the handshake by hand: record header, handshake header, legacy
//! version, random, session id, cipher suites (big-endian, TLS wire order),
//! compression methods, then extensions looking for server_name (0x0000).
//! Length fields are clamped to the buffer; anything cut short simply ends
//! the walk with whatever was read so far.

use podscope_common::flow::{Flow, Protocol, TlsInfo};

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXT_SERVER_NAME: u16 = 0x0000;

/// Single-shot ClientHello parse; a success promotes TLS to HTTPS.
pub fn parse(flow: &mut Flow) {
    if flow.tls_parse_attempted {
        return;
    }
    flow.tls_parse_attempted = true;
    if let Some(info) = parse_client_hello(&flow.client_payload) {
        flow.tls = Some(info);
        flow.protocol = Protocol::Https;
    }
}

/// Parses a ClientHello out of `buf`, tolerating truncation after the
/// version field: short buffers yield the version with empty SNI and no
/// cipher suites rather than an error.
pub fn parse_client_hello(buf: &[u8]) -> Option<TlsInfo> {
    // record header + handshake header + 2-byte legacy version
    if buf.len() < RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN + 2 {
        return None;
    }
    if buf[0] != CONTENT_TYPE_HANDSHAKE || buf[RECORD_HEADER_LEN] != HANDSHAKE_CLIENT_HELLO {
        return None;
    }

    let mut off = RECORD_HEADER_LEN + HANDSHAKE_HEADER_LEN;
    let mut info = TlsInfo {
        version: version_string(buf[off], buf[off + 1]),
        sni: String::new(),
        cipher_suites: Vec::new(),
        encrypted: true,
    };
    off += 2;

    // 32-byte client random, then 1-byte session-id length + session id.
    off += 32;
    if off >= buf.len() {
        return Some(info);
    }
    let session_id_len = buf[off] as usize;
    off += 1 + session_id_len;

    // Cipher suites: 2-byte length, big-endian u16 entries, clamped to buffer.
    if off + 2 > buf.len() {
        return Some(info);
    }
    let declared = u16::from_be_bytes([buf[off], buf[off + 1]]) as usize;
    off += 2;
    let cipher_len = declared.min(buf.len() - off);
    for pair in buf[off..off + cipher_len].chunks_exact(2) {
        info.cipher_suites.push(u16::from_be_bytes([pair[0], pair[1]]));
    }
    off += cipher_len;

    // Compression methods: 1-byte length + methods.
    if off >= buf.len() {
        return Some(info);
    }
    let compression_len = buf[off] as usize;
    off += 1 + compression_len;

    // Extensions: 2-byte total length, clamped to buffer.
    if off + 2 > buf.len() {
        return Some(info);
    }
    let declared = u16::from_be_bytes([buf[off], buf[off + 1]]) as usize;
    off += 2;
    let ext_end = (off + declared).min(buf.len());

    while off + 4 <= ext_end {
        let ext_type = u16::from_be_bytes([buf[off], buf[off + 1]]);
        let ext_size = u16::from_be_bytes([buf[off + 2], buf[off + 3]]) as usize;
        off += 4;
        if ext_type == EXT_SERVER_NAME {
            // 2-byte list length, 1-byte name type (host_name = 0), 2-byte
            // name length, then the name itself. Names past the buffer end
            // are ignored.
            if off + 5 <= buf.len() && buf[off + 2] == 0x00 {
                let name_len = u16::from_be_bytes([buf[off + 3], buf[off + 4]]) as usize;
                let start = off + 5;
                if start + name_len <= buf.len() {
                    if let Ok(name) = std::str::from_utf8(&buf[start..start + name_len]) {
                        info.sni = name.to_string();
                    }
                }
            }
            break;
        }
        off += ext_size;
    }

    Some(info)
}

fn version_string(major: u8, minor: u8) -> String {
    match (major, minor) {
        (3, 1) => "TLS 1.0".to_string(),
        (3, 2) => "TLS 1.1".to_string(),
        (3, 3) => "TLS 1.2".to_string(),
        _ => format!("TLS {major}.{minor}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_strings_map_known_values() {
        assert_eq!(version_string(3, 1), "TLS 1.0");
        assert_eq!(version_string(3, 3), "TLS 1.2");
        assert_eq!(version_string(3, 4), "TLS 3.4");
    }
}
