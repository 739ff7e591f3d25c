//! UDP transport to the Tirex master.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{BoxFuture, RenderChannel, RenderChannelError};
use crate::dispatcher::TileDispatcher;
use crate::protocol::EnqueueRequest;

/// Largest control message accepted or sent.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024 - 1;

/// Render channel over a single UDP socket.
///
/// Requests go out to the master from this socket and the master replies to
/// the same address, so one socket serves both directions.
pub struct UdpRenderChannel {
    socket: UdpSocket,
    master: SocketAddr,
}

impl UdpRenderChannel {
    /// Binds the control socket.
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - Local address; port 0 picks an ephemeral port
    /// * `master` - Address of the Tirex master
    pub async fn bind(bind_addr: SocketAddr, master: SocketAddr) -> Result<Self, RenderChannelError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        debug!(local = %socket.local_addr()?, master = %master, "Bound render control socket");
        Ok(Self { socket, master })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RenderChannelError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn master(&self) -> SocketAddr {
        self.master
    }

    /// Receives completion notices until `shutdown` fires.
    ///
    /// Each datagram is handled on its own task so a slow bundle read never
    /// holds up the socket.
    pub async fn run(self: Arc<Self>, dispatcher: Arc<TileDispatcher>, shutdown: CancellationToken) {
        info!(master = %self.master, "Render channel listening for completions");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Render channel shutting down");
                    break;
                }

                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            trace!(peer = %peer, len, "Received control datagram");
                            let datagram = Bytes::copy_from_slice(&buf[..len]);
                            let dispatcher = Arc::clone(&dispatcher);
                            tokio::spawn(async move {
                                dispatcher.on_datagram(&datagram).await;
                            });
                        }
                        Err(e) => {
                            // ICMP port unreachable from an earlier send surfaces here on some
                            // platforms; the socket stays usable.
                            warn!(error = %e, "Control socket receive failed");
                        }
                    }
                }
            }
        }
    }
}

impl RenderChannel for UdpRenderChannel {
    fn send(&self, request: EnqueueRequest) -> BoxFuture<'_, Result<(), RenderChannelError>> {
        Box::pin(async move {
            let payload = request.encode();
            let len = payload.len();
            if len > MAX_DATAGRAM_SIZE {
                return Err(RenderChannelError::MessageTooLarge {
                    len,
                    max: MAX_DATAGRAM_SIZE,
                });
            }

            let sent = self.socket.send_to(payload.as_bytes(), self.master).await?;
            if sent != len {
                return Err(RenderChannelError::Truncated { sent, len });
            }
            trace!(id = %request.id, fingerprint = %request.fingerprint(), "Sent enqueue request");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::BundleAddress;
    use crate::protocol::Message;
    use std::time::Duration;

    #[tokio::test]
    async fn test_send_reaches_master() {
        let master = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = UdpRenderChannel::bind(
            "127.0.0.1:0".parse().unwrap(),
            master.local_addr().unwrap(),
        )
        .await
        .unwrap();

        let request = EnqueueRequest::new("nodets-1-1", 8, BundleAddress::containing("osm", 10, 13, 5));
        channel.send(request).await.unwrap();

        let mut buf = [0u8; 1024];
        let (len, from) = tokio::time::timeout(Duration::from_secs(2), master.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, channel.local_addr().unwrap());

        let msg = Message::parse(&buf[..len]).unwrap();
        assert_eq!(msg.get("type"), Some("metatile_enqueue_request"));
        assert_eq!(msg.get("x"), Some("8"));
        assert_eq!(msg.get("y"), Some("0"));
        assert_eq!(msg.get("z"), Some("10"));
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let channel = UdpRenderChannel::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        )
        .await
        .unwrap();

        let map = "m".repeat(MAX_DATAGRAM_SIZE);
        let request = EnqueueRequest::new("n1", 8, BundleAddress::containing(map, 1, 0, 0));
        let err = channel.send(request).await.unwrap_err();
        assert!(matches!(err, RenderChannelError::MessageTooLarge { .. }));
    }
}
