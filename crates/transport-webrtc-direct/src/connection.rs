use std::sync::Arc;

use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use time::OffsetDateTime;
use tracing::{debug, warn};
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::Result;
use crate::noise::SecureSession;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outbound,
}

/// An authenticated webrtc-direct connection handed to the caller after a
/// successful dial. The handshake data channel carries the secure session.
pub struct Connection {
    remote_addr: Multiaddr,
    direction: Direction,
    local_peer: PeerId,
    remote_peer: PeerId,
    opened_at: OffsetDateTime,
    peer_connection: Arc<RTCPeerConnection>,
    session: SecureSession,
}

impl Connection {
    pub(crate) fn outbound(
        remote_addr: Multiaddr,
        local_peer: PeerId,
        peer_connection: Arc<RTCPeerConnection>,
        session: SecureSession,
    ) -> Self {
        Self {
            remote_addr,
            direction: Direction::Outbound,
            local_peer,
            remote_peer: session.remote_peer(),
            opened_at: OffsetDateTime::now_utc(),
            peer_connection,
            session,
        }
    }

    /// The dialed address; identifies the connection.
    pub fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    pub fn opened_at(&self) -> OffsetDateTime {
        self.opened_at
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub fn session(&mut self) -> &mut SecureSession {
        &mut self.session
    }

    /// Closes the secure stream and releases the peer connection.
    pub async fn close(mut self) -> Result<()> {
        self.session.close().await;
        if let Err(err) = self.peer_connection.close().await {
            warn!(
                target: "webrtc_direct",
                addr = %self.remote_addr,
                error = %err,
                "peer connection close failed"
            );
            return Err(crate::error::to_setup_error(err));
        }
        debug!(target: "webrtc_direct", addr = %self.remote_addr, "connection closed");
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("direction", &self.direction)
            .field("local_peer", &self.local_peer)
            .field("remote_peer", &self.remote_peer)
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}
