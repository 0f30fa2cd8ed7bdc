use thiserror::Error;

#[derive(Clone, Error, Debug)]
pub enum CoinError {
    // Construction-time errors
    #[error("Invalid transaction value: {0}")]
    InvalidTransactionValue(String),
    #[error("Invalid transaction address: {0}")]
    InvalidTransactionAddress(String),
    #[error("Invalid block structure: {0}")]
    InvalidBlockStructure(String),

    // Wire errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    // Network-path errors
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Network i/o error: {0}")]
    Network(String),
}

impl From<std::io::Error> for CoinError {
    fn from(err: std::io::Error) -> Self {
        CoinError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for CoinError {
    fn from(err: serde_json::Error) -> Self {
        CoinError::MalformedMessage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoinError>;
