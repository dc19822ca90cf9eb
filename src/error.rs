use std::io;

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, MqError>;

/// Errors produced by the ring buffer / composite queue / registry stack.
/// The dispatcher turns every variant into a RESP error reply; none of
/// them is allowed to panic a connection task.
#[derive(Debug, Error)]
pub enum MqError {
    #[error("Empty")]
    Empty,

    #[error("No space left")]
    NoSpace,

    #[error("Packet too large")]
    PacketTooLarge,

    #[error("invalid queue name: {0}")]
    InvalidQueueName(String),

    #[error("backing file header capacity does not match file size: {0}")]
    CorruptBackingFile(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl MqError {
    /// True for errors RPOP/BRPOP treat as "nothing to deliver" rather than
    /// a hard failure worth surfacing as a RESP error.
    pub fn is_empty(&self) -> bool {
        matches!(self, MqError::Empty)
    }
}
