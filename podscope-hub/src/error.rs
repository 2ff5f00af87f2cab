use thiserror::Error;

/// Errors that can occur in the session hub
#[derive(Error, Debug)]
pub enum HubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid BPF filter: {0}")]
    InvalidFilter(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HubError>;
