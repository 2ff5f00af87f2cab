//! Protocol recognition over per-flow payload buffers.
//!
//! The recognizer is a step function over the protocol tag: flows start as
//! plain TCP, detection may promote them to HTTP, TLS, or HTTPS, and the
//! per-protocol parsers fill in the `http`/`tls` sub-objects. Parse failures
//! are silent; buffers are append-only so a partial parse retries naturally
//! as more bytes arrive.

pub mod http;
pub mod tls;

use podscope_common::flow::{Flow, Protocol};

const HTTP_PREFIXES: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"HTTP/",
];

const HTTPS_PORTS: &[u16] = &[443, 8443];

/// Advances a flow's protocol state after a payload update.
pub fn advance(flow: &mut Flow) {
    if flow.protocol == Protocol::Tcp {
        detect(flow);
    }
    match flow.protocol {
        Protocol::Http => http::parse(flow),
        Protocol::Tls => tls::parse(flow),
        Protocol::Tcp | Protocol::Https => {}
    }
}

/// First-data protocol detection, in precedence order: TLS record magic,
/// HTTP token, well-known HTTPS port, else stays TCP.
fn detect(flow: &mut Flow) {
    let buf = if flow.client_payload.is_empty() {
        &flow.server_payload
    } else {
        &flow.client_payload
    };
    if buf.len() >= 6 && buf[0] == 0x16 && buf[1] == 0x03 {
        flow.protocol = Protocol::Tls;
    } else if HTTP_PREFIXES.iter().any(|p| buf.starts_with(p)) {
        flow.protocol = Protocol::Http;
    } else if HTTPS_PORTS.contains(&flow.dst_port) {
        flow.protocol = Protocol::Https;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn flow_to(dst_port: u16) -> Flow {
        Flow::new("10.0.0.1", 40000, "10.0.0.2", dst_port, Utc::now())
    }

    #[test]
    fn tls_magic_wins_over_port() {
        let mut flow = flow_to(443);
        flow.client_payload = vec![0x16, 0x03, 0x01, 0x00, 0x10, 0x01];
        detect(&mut flow);
        assert_eq!(flow.protocol, Protocol::Tls);
    }

    #[test]
    fn http_token_wins_over_port() {
        let mut flow = flow_to(8443);
        flow.client_payload = b"GET / HTTP/1.1\r\n".to_vec();
        detect(&mut flow);
        assert_eq!(flow.protocol, Protocol::Http);
    }

    #[test]
    fn https_port_is_the_fallback() {
        let mut flow = flow_to(443);
        flow.client_payload = vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x00];
        detect(&mut flow);
        assert_eq!(flow.protocol, Protocol::Https);
    }

    #[test]
    fn unknown_payload_on_other_port_stays_tcp() {
        let mut flow = flow_to(5432);
        flow.client_payload = vec![0x00, 0x01, 0x02];
        detect(&mut flow);
        assert_eq!(flow.protocol, Protocol::Tcp);
    }

    #[test]
    fn server_first_response_detects_http() {
        let mut flow = flow_to(8080);
        flow.server_payload = b"HTTP/1.1 200 OK\r\n".to_vec();
        detect(&mut flow);
        assert_eq!(flow.protocol, Protocol::Http);
    }
}
