//! HTTP/1.1 request/response recognition via httparse.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use podscope_common::flow::{Flow, HttpInfo};

const MAX_HEADERS: usize = 64;

/// Attempts the request parse (client buffer) until one succeeds, then the
/// response parse (server buffer) until a status is known.
pub fn parse(flow: &mut Flow) {
    if flow.http.is_none() {
        if let Some(info) = parse_request(&flow.client_payload) {
            flow.http = Some(info);
        }
    }
    if let Some(http) = flow.http.as_mut() {
        if http.status_code == 0 && !flow.server_payload.is_empty() {
            apply_response(http, &flow.server_payload);
        }
    }
}

fn parse_request(buf: &[u8]) -> Option<HttpInfo> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let httparse::Status::Complete(_) = req.parse(buf).ok()? else {
        return None;
    };

    let method = req.method?.to_string();
    let path = req.path?.to_string();
    let header_map = collect_headers(req.headers);
    let host = header_map.get("host").cloned().unwrap_or_default();
    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path
    } else {
        format!("http://{host}{path}")
    };
    let content_type = header_map.get("content-type").cloned().unwrap_or_default();
    let content_length = header_map
        .get("content-length")
        .and_then(|v| v.parse().ok());

    Some(HttpInfo {
        method,
        url,
        host,
        status_code: 0,
        status_text: String::new(),
        request_headers: header_map,
        response_headers: HashMap::new(),
        content_type,
        content_length,
    })
}

fn apply_response(http: &mut HttpInfo, buf: &[u8]) {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let Ok(httparse::Status::Complete(_)) = resp.parse(buf) else {
        return;
    };
    let Some(code) = resp.code else {
        return;
    };

    http.status_code = code;
    http.status_text = resp.reason.unwrap_or_default().to_string();
    http.response_headers = collect_headers(resp.headers);
    if let Some(ct) = http.response_headers.get("content-type") {
        http.content_type = ct.clone();
    }
    if let Some(cl) = http.response_headers.get("content-length") {
        http.content_length = cl.parse().ok();
    }
}

/// Lowercase names; repeated headers join their values with ", ".
fn collect_headers(headers: &[httparse::Header<'_>]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for h in headers {
        let name = h.name.to_ascii_lowercase();
        let value = String::from_utf8_lossy(h.value).into_owned();
        match map.entry(name) {
            Entry::Occupied(mut e) => {
                let joined: &mut String = e.get_mut();
                joined.push_str(", ");
                joined.push_str(&value);
            }
            Entry::Vacant(e) => {
                e.insert(value);
            }
        }
    }
    map
}
