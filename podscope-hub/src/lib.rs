#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod pcap_store;
pub mod ring;
pub mod server;
pub mod session;
pub mod ws;

pub use config::HubConfig;
pub use error::{HubError, Result};
pub use pcap_store::PcapAggregator;
pub use ring::FlowRing;
pub use server::router;
pub use session::Session;
