#![forbid(unsafe_code)]

pub mod api;
pub mod flow;
pub mod pcap;

pub use flow::{flow_key, new_flow_id, Flow, FlowStatus, HttpInfo, Protocol, TlsInfo};
pub use pcap::{read_global_header, write_global_header, write_packet_record, PcapReader};
