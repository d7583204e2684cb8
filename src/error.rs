//! Error types for the sampling pipeline

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("block size {0} is not a power of 2 (>= 4)")]
    BlockSize(usize),
    #[error("could not create the {queue} queue with capacity {capacity}")]
    QueueAllocation { queue: &'static str, capacity: usize },
    #[error("could not spawn the {task} task")]
    Spawn {
        task: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("the {0} task panicked")]
    TaskPanicked(&'static str),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed acknowledgement: {0}")]
    MalformedAck(#[source] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("could not install the Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}
