use thiserror::Error;

/// Errors that can occur in the capture agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hub rejected request: {0}")]
    Hub(String),

    /// A bounded send queue was full; the caller decides what to drop.
    #[error("channel full: {0}")]
    ChannelFull(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
