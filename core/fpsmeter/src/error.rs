//! Errors of the measurement engine.
//!
//! None of these errors is fatal: the engine turns them into a fallback
//! (frame sampling instead of node polling) or into the [`UNAVAILABLE`](crate::node::UNAVAILABLE)
//! sentinel, and logs them.

use std::{io, num::ParseFloatError, path::PathBuf};

use thiserror::Error;

/// The fps node cannot be used, probed once at construction.
#[derive(Debug, Error)]
pub enum NodeError {
    /// No node has been configured.
    #[error("no fps node configured")]
    NotConfigured,
    /// The node does not exist or cannot be opened for reading.
    #[error("{0:?} does not exist or is not readable")]
    Unavailable(PathBuf, #[source] io::Error),
}

/// Error that can occur during one poll cycle of the node.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("I/O error while reading from fps node {0:?}")]
    Io(PathBuf, #[source] io::Error),
    #[error("invalid content in fps node {0:?}")]
    Parse(PathBuf, #[source] ParseFpsError),
}

/// The content of the node is not a frame rate.
#[derive(Debug, Error, PartialEq)]
pub enum ParseFpsError {
    #[error("empty line")]
    Empty,
    #[error("not a number: {0:?}")]
    NotANumber(String, #[source] ParseFloatError),
    #[error("not a finite number: {0:?}")]
    NotFinite(String),
}
