use std::io;

use thiserror::Error;

pub type PeerResult<T> = Result<T, PeerError>;

/// Failures while starting the reference peer.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid tls configuration: {0}")]
    Tls(#[from] rustls::Error),
}
