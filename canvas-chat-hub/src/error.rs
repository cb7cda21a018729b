use std::{io, net::SocketAddr};

use thiserror::Error;

/// Failures surfaced by the hub's public operations.
///
/// Only [`HubError::Bind`] is fatal to a server. Everything that happens to an
/// individual session after it was accepted is handled inside that session.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to send frame")]
    Send(#[source] io::Error),

    #[error("not connected")]
    NotConnected,
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;
