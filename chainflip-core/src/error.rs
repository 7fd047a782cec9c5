use crate::overlay::ActionKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainFlipError>;

#[derive(Error, Debug)]
pub enum ChainFlipError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Network connection error: {0}")]
    NetworkConnection(#[from] reqwest::Error),

    #[error("Contract reverted: {0}")]
    Reverted(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Action already pending: {0}")]
    AlreadyPending(ActionKey),

    #[error("No pending action for {0}")]
    NotPending(ActionKey),

    #[error("Bet below minimum: need {minimum} wei, got {offered} wei")]
    BetTooLow { minimum: u128, offered: u128 },

    #[error("Match not found: {0}")]
    MatchNotFound(u64),

    #[error("Invalid match state: {0}")]
    InvalidMatchState(String),

    #[error("No account connected")]
    NoAccount,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChainFlipError {
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn reverted(msg: impl Into<String>) -> Self {
        Self::Reverted(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure came from the user or the contract refusing the
    /// write, as opposed to the client being unable to reach the node.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Reverted(_) | Self::Rejected(_))
    }
}
