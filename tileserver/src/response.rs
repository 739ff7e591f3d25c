//! Per-request outcomes and the one-shot sink that delivers them.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a tile could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// Unknown map, zoom outside the map's range, or tile outside the grid.
    #[error("{0}")]
    NotFound(String),

    /// The bundle exists but is shorter than its header or an entry claims.
    #[error("bundle corrupt: {0}")]
    BundleCorrupt(String),

    /// The renderer reported completion but no usable bundle exists.
    #[error("render failed: {0}")]
    RenderFailed(String),

    /// No completion arrived before the waiter's deadline.
    #[error("render timed out")]
    RenderTimeout,

    /// The render service could not be reached or the server is stopping.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl TileError {
    /// HTTP status for this error: 404 for client errors, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            TileError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

/// Result delivered to a waiting request: the tile image or the reason it
/// could not be served.
pub type TileResponse = Result<Bytes, TileError>;

/// Receiving half of a [`ResponseSink`].
pub type ResponseReceiver = oneshot::Receiver<TileResponse>;

/// Completes exactly once with a [`TileResponse`].
///
/// `resolve` consumes the sink, so a second resolution cannot be expressed.
/// A sink dropped without resolving closes the receiver, which callers treat
/// as an internal error.
#[derive(Debug)]
pub struct ResponseSink {
    tx: oneshot::Sender<TileResponse>,
}

impl ResponseSink {
    /// Delivers the response. Returns `false` if the requester went away.
    pub fn resolve(self, response: TileResponse) -> bool {
        self.tx.send(response).is_ok()
    }

    /// Whether the requester has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a sink and the receiver it resolves.
pub fn response_channel() -> (ResponseSink, ResponseReceiver) {
    let (tx, rx) = oneshot::channel();
    (ResponseSink { tx }, rx)
}
