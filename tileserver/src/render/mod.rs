//! Transport to the external renderer.
//!
//! The dispatcher only needs to send render requests; replies arrive on the
//! same socket and are fed back to [`TileDispatcher::on_datagram`] by the
//! transport's receive loop.
//!
//! [`TileDispatcher::on_datagram`]: crate::dispatcher::TileDispatcher::on_datagram

mod udp;

pub use udp::{UdpRenderChannel, MAX_DATAGRAM_SIZE};

use std::future::Future;
use std::io;
use std::pin::Pin;

use thiserror::Error;

use crate::protocol::EnqueueRequest;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from the render transport.
#[derive(Debug, Error)]
pub enum RenderChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes went out than the encoded message holds.
    #[error("datagram truncated: sent {sent} of {len} bytes")]
    Truncated { sent: usize, len: usize },

    #[error("message too large: {len} bytes (max: {max})")]
    MessageTooLarge { len: usize, max: usize },
}

/// Sends render requests to the renderer.
///
/// Fire and forget: success means the request left this process, not that
/// the renderer received it.
pub trait RenderChannel: Send + Sync {
    fn send(&self, request: EnqueueRequest) -> BoxFuture<'_, Result<(), RenderChannelError>>;
}
