use std::{io, time::Duration};

use thiserror::Error;

/// Any error this library might encounter.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `start` was called before a callback was registered.
    #[error("no callback set, use set_callback to configure a data handler")]
    PreconditionFailed,

    /// The host could not list its serial ports.
    #[error("failed to enumerate ports: {0}")]
    Enumeration(String),

    /// A port could not be opened (busy, missing, no permission).
    #[error("could not open port {port}: {reason}")]
    PortUnavailable { port: String, reason: String },

    /// Underlying IO problem.
    #[error("serial IO error: {0}")]
    Io(#[from] io::Error),

    /// The listener task did not exit in time after being stopped.
    #[error("listener did not exit within {0:?}")]
    JoinTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
