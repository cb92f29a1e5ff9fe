use thiserror::Error;

use crate::protocol::NodeId;

#[derive(Error, Debug)]
pub enum DictatorError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unknown message kind {0}")]
    UnknownKind(i32),

    #[error("Cannot find command handler for {0:?}")]
    NoHandler(String),

    #[error("Command response addressed to {addressee}, not to this node")]
    NotAddressed { addressee: NodeId },

    #[error("Command response arrived outside of a tenure")]
    NoActiveTenure,

    #[error("Command handler failed: {0}")]
    Handler(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Outbound channel full, packet dropped")]
    OutboundFull,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DictatorError>;
