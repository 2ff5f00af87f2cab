#![forbid(unsafe_code)]

pub mod capture;
pub mod config;
pub mod error;
pub mod flow_table;
pub mod hub_client;
pub mod protocol;

pub use capture::{CaptureLoop, FilterControl};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use flow_table::{FlowSink, FlowTable, PodIdentity, TcpFlags};
pub use hub_client::{HubClient, HEARTBEAT_INTERVAL};
