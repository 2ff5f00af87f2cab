use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use podscope_agent::flow_table::{FlowSink, FlowTable, TcpFlags};
use podscope_common::flow::{flow_key, Flow, FlowStatus};

type Collected = Arc<Mutex<Vec<Flow>>>;

fn collecting_table() -> (Arc<FlowTable>, Collected) {
    let store: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&store);
    let sink: FlowSink = Arc::new(move |flow| {
        sink_store.lock().unwrap().push(flow);
    });
    (Arc::new(FlowTable::new(sink)), store)
}

const SYN: TcpFlags = TcpFlags { syn: true, ack: false, fin: false, rst: false };
const SYN_ACK: TcpFlags = TcpFlags { syn: true, ack: true, fin: false, rst: false };
const ACK: TcpFlags = TcpFlags { syn: false, ack: true, fin: false, rst: false };
const FIN: TcpFlags = TcpFlags { syn: false, ack: true, fin: true, rst: false };
const RST: TcpFlags = TcpFlags { syn: false, ack: false, fin: false, rst: true };

#[test]
fn both_directions_collapse_into_one_flow() {
    let (table, _store) = collecting_table();
    let t0 = Utc::now();

    table.process_packet("10.0.0.5", "192.168.1.10", 80, 45678, SYN_ACK, t0, &[]);
    table.process_packet("192.168.1.10", "10.0.0.5", 45678, 80, ACK, t0, b"hello");
    assert_eq!(table.len(), 1);

    let key = flow_key("10.0.0.5", 80, "192.168.1.10", 45678);
    let flow = table.get(&key).expect("flow present");
    // Orientation follows the first packet seen, not the connection initiator.
    assert_eq!(flow.src_ip, "10.0.0.5");
    assert_eq!(flow.src_port, 80);
    // The reverse-direction payload lands on the server side of the counters.
    assert_eq!(flow.bytes_received, 5);
    assert_eq!(flow.bytes_sent, 0);
}

#[test]
fn fin_after_handshake_completes_with_closed() {
    let (table, store) = collecting_table();
    let t0 = Utc::now();

    table.process_packet("10.0.0.1", "10.0.0.2", 40000, 80, SYN, t0, &[]);
    table.process_packet(
        "10.0.0.2",
        "10.0.0.1",
        80,
        40000,
        SYN_ACK,
        t0 + Duration::milliseconds(3),
        &[],
    );
    table.process_packet(
        "10.0.0.1",
        "10.0.0.2",
        40000,
        80,
        ACK,
        t0 + Duration::milliseconds(5),
        b"ping",
    );
    assert!(store.lock().unwrap().is_empty());

    table.process_packet(
        "10.0.0.2",
        "10.0.0.1",
        80,
        40000,
        FIN,
        t0 + Duration::milliseconds(50),
        &[],
    );

    let completed = store.lock().unwrap();
    assert_eq!(completed.len(), 1);
    let flow = &completed[0];
    assert_eq!(flow.status, Some(FlowStatus::Closed));
    assert_eq!(flow.duration_ms, Some(50));
    assert_eq!(flow.tcp_handshake_ms, Some(3.0));
    assert_eq!(table.len(), 0);
}

#[test]
fn rst_completes_immediately_with_reset() {
    let (table, store) = collecting_table();
    let t0 = Utc::now();

    table.process_packet("10.0.0.1", "10.0.0.2", 40000, 80, SYN, t0, &[]);
    table.process_packet("10.0.0.2", "10.0.0.1", 80, 40000, RST, t0, &[]);

    let completed = store.lock().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, Some(FlowStatus::Reset));
    assert_eq!(table.len(), 0);
}

#[test]
fn idle_flows_time_out_exactly_once() {
    let (table, store) = collecting_table();
    let t0 = Utc::now();

    table.process_packet("10.0.0.1", "10.0.0.2", 40000, 80, SYN, t0, &[]);
    table.process_packet("10.0.0.3", "10.0.0.2", 40001, 80, SYN, t0, &[]);
    assert_eq!(table.len(), 2);

    // Inside the idle window nothing expires.
    table.expire_idle(t0 + Duration::seconds(29));
    assert_eq!(table.len(), 2);
    assert!(store.lock().unwrap().is_empty());

    let later = t0 + Duration::seconds(31);
    table.expire_idle(later);
    assert_eq!(table.len(), 0);
    assert_eq!(store.lock().unwrap().len(), 2);
    assert!(store
        .lock()
        .unwrap()
        .iter()
        .all(|f| f.status == Some(FlowStatus::Timeout)));

    // Completion already consumed the entries; a second scan finds nothing.
    table.expire_idle(later);
    assert_eq!(store.lock().unwrap().len(), 2);
}

#[test]
fn data_packets_update_counters_and_first_data_time() {
    let (table, _store) = collecting_table();
    let t0 = Utc::now();

    table.process_packet("10.0.0.1", "10.0.0.2", 40000, 80, SYN, t0, &[]);
    table.process_packet("10.0.0.1", "10.0.0.2", 40000, 80, ACK, t0 + Duration::milliseconds(2), b"abc");
    table.process_packet("10.0.0.2", "10.0.0.1", 80, 40000, ACK, t0 + Duration::milliseconds(4), b"defgh");

    let key = flow_key("10.0.0.1", 40000, "10.0.0.2", 80);
    let flow = table.get(&key).expect("flow present");
    assert_eq!(flow.first_data_time, Some(t0 + Duration::milliseconds(2)));
    assert_eq!(flow.bytes_sent, 3);
    assert_eq!(flow.packets_sent, 1);
    assert_eq!(flow.bytes_received, 5);
    assert_eq!(flow.packets_received, 1);
}

#[test]
fn hub_endpoint_traffic_is_tagged() {
    let store: Collected = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&store);
    let sink: FlowSink = Arc::new(move |flow| {
        sink_store.lock().unwrap().push(flow);
    });
    let table = FlowTable::new(sink).with_hub_endpoint("10.0.0.9:8080");
    let t0 = Utc::now();

    table.process_packet("10.0.0.1", "10.0.0.9", 40000, 8080, SYN, t0, &[]);
    table.process_packet("10.0.0.1", "10.0.0.7", 40001, 80, SYN, t0, &[]);

    let hub_flow = table
        .get(&flow_key("10.0.0.1", 40000, "10.0.0.9", 8080))
        .expect("hub flow");
    assert!(hub_flow.is_agent_traffic);
    assert_eq!(hub_flow.traffic_category.as_deref(), Some("agent-hub"));

    let workload_flow = table
        .get(&flow_key("10.0.0.1", 40001, "10.0.0.7", 80))
        .expect("workload flow");
    assert!(!workload_flow.is_agent_traffic);
    assert!(workload_flow.traffic_category.is_none());
}
