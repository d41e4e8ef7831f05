use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use libp2p_identity::PeerId;
use multiaddr::Multiaddr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use webrtc::api::APIBuilder;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice::network_type::NetworkType;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::address;
use crate::certificate::LocalCertificate;
use crate::config::DialConfig;
use crate::connection::Connection;
use crate::error::{Result, WebRtcDirectError, to_setup_error};
use crate::gate::HandshakeChannelGate;
use crate::identity::IdentityLatch;
use crate::noise::{NoiseSecureOutbound, SecureOutbound};
use crate::prologue::Prologue;
use crate::sdp::{NegotiationBuilder, NegotiationCredential};
use crate::stream::DataChannelDuplex;

pub const HANDSHAKE_CHANNEL_LABEL: &str = "handshake";
pub const HANDSHAKE_CHANNEL_ID: u16 = 0;

#[derive(Clone, Debug, Default)]
pub struct DialOptions {
    /// Aborts the attempt when cancelled before it succeeds.
    pub cancel: Option<CancellationToken>,
}

impl DialOptions {
    pub fn with_cancel(cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListenerOptions;

/// Dial-only webrtc-direct transport.
#[derive(Clone)]
pub struct WebRtcDirectTransport {
    config: DialConfig,
    identity: IdentityLatch,
    secure: Arc<dyn SecureOutbound>,
}

impl WebRtcDirectTransport {
    pub fn new(config: DialConfig, identity: IdentityLatch) -> Self {
        Self {
            config,
            identity,
            secure: Arc::new(NoiseSecureOutbound),
        }
    }

    /// Swaps the secure-channel implementation used after the data channel opens.
    pub fn with_secure_outbound(mut self, secure: Arc<dyn SecureOutbound>) -> Self {
        self.secure = secure;
        self
    }

    pub fn config(&self) -> &DialConfig {
        &self.config
    }

    /// Addresses this transport can dial, in input order.
    pub fn filter<'a, I>(&self, addrs: I) -> Vec<Multiaddr>
    where
        I: IntoIterator<Item = &'a Multiaddr>,
    {
        address::filter(addrs)
    }

    /// Listening is not supported; webrtc-direct here is dial-only.
    pub fn create_listener(&self, _options: ListenerOptions) -> Result<Infallible> {
        Err(WebRtcDirectError::Unimplemented("webrtc-direct listener"))
    }

    /// Establishes an authenticated connection to `target`.
    ///
    /// On any failure, including cancellation, the peer connection created
    /// for the attempt is closed before the error is returned.
    pub async fn dial(&self, target: &Multiaddr, options: DialOptions) -> Result<Connection> {
        let remote_peer = address::peer_id(target).ok_or_else(|| {
            WebRtcDirectError::InappropriateMultiaddr {
                addr: target.clone(),
            }
        })?;
        let socket = address::socket_addr(target).ok_or_else(|| {
            WebRtcDirectError::InvalidArgument(format!("{target} has no ip/udp endpoint"))
        })?;
        let cancel = options.cancel.unwrap_or_default();

        // nothing to release until the peer connection exists
        let credential = NegotiationCredential::generate();
        let (certificate, peer_connection) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WebRtcDirectError::Aborted),
            prepared = self.prepare(&credential, socket) => prepared?,
        };
        debug!(
            target: "webrtc_direct",
            addr = %target,
            peer = %remote_peer,
            "peer connection created"
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WebRtcDirectError::Aborted),
            result = self.establish(
                target,
                remote_peer,
                &certificate,
                &credential,
                Arc::clone(&peer_connection),
            ) => result,
        };

        match outcome {
            Ok(connection) => {
                info!(
                    target: "webrtc_direct",
                    addr = %target,
                    peer = %remote_peer,
                    "webrtc-direct connection established"
                );
                Ok(connection)
            }
            Err(err) => {
                warn!(
                    target: "webrtc_direct",
                    addr = %target,
                    error = %err,
                    "webrtc-direct dial failed"
                );
                if let Err(close_err) = peer_connection.close().await {
                    warn!(
                        target: "webrtc_direct",
                        addr = %target,
                        error = %close_err,
                        "failed to release peer connection"
                    );
                }
                Err(err)
            }
        }
    }

    async fn establish(
        &self,
        target: &Multiaddr,
        remote_peer: PeerId,
        certificate: &LocalCertificate,
        credential: &NegotiationCredential,
        peer_connection: Arc<RTCPeerConnection>,
    ) -> Result<Connection> {
        let channel = open_handshake_channel(&peer_connection).await?;
        let gate = HandshakeChannelGate::attach(Arc::clone(&channel), self.config.handshake_timeout);
        let negotiation = NegotiationBuilder::new(&peer_connection, credential);

        // the gate is armed before negotiation so an early open is not missed
        tokio::try_join!(gate.wait(), negotiation.negotiate(target))?;
        trace!(target: "webrtc_direct", addr = %target, "handshake channel ready");

        let local = self.identity.ready().await?;
        let local_peer = local.public().to_peer_id();
        let prologue = Prologue::for_target(certificate, target)?;

        let duplex = DataChannelDuplex::new(channel);
        let session = self
            .secure
            .secure_outbound(&local, Box::new(duplex), remote_peer, &prologue)
            .await?;

        Ok(Connection::outbound(
            target.clone(),
            local_peer,
            peer_connection,
            session,
        ))
    }

    async fn prepare(
        &self,
        credential: &NegotiationCredential,
        socket: SocketAddr,
    ) -> Result<(LocalCertificate, Arc<RTCPeerConnection>)> {
        let certificate = LocalCertificate::generate(&self.config.certificate)?;
        // a cancel raised during key generation wins before any socket is bound
        tokio::task::yield_now().await;
        let peer_connection = self
            .new_peer_connection(&certificate, credential, socket)
            .await?;
        Ok((certificate, peer_connection))
    }

    async fn new_peer_connection(
        &self,
        certificate: &LocalCertificate,
        credential: &NegotiationCredential,
        socket: SocketAddr,
    ) -> Result<Arc<RTCPeerConnection>> {
        let ice = self.config.ice_timeouts;
        let mut setting = SettingEngine::default();
        setting.set_ice_credentials(credential.as_str().to_owned(), credential.as_str().to_owned());
        setting.set_ice_timeouts(
            Some(ice.disconnected),
            Some(ice.failed),
            Some(ice.keep_alive),
        );
        setting.set_network_types(vec![if socket.is_ipv4() {
            NetworkType::Udp4
        } else {
            NetworkType::Udp6
        }]);
        setting.set_include_loopback_candidate(socket.ip().is_loopback());
        let api = APIBuilder::new().with_setting_engine(setting).build();

        let config = RTCConfiguration {
            certificates: vec![certificate.rtc_certificate()],
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(to_setup_error)?,
        );

        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                Box::pin(async move {
                    debug!(target: "webrtc_direct", ?state, "peer connection state changed");
                })
            },
        ));
        Ok(peer_connection)
    }
}

fn handshake_channel_init() -> RTCDataChannelInit {
    RTCDataChannelInit {
        ordered: Some(true),
        negotiated: Some(HANDSHAKE_CHANNEL_ID),
        ..Default::default()
    }
}

async fn open_handshake_channel(
    peer_connection: &RTCPeerConnection,
) -> Result<Arc<RTCDataChannel>> {
    peer_connection
        .create_data_channel(HANDSHAKE_CHANNEL_LABEL, Some(handshake_channel_init()))
        .await
        .map_err(to_setup_error)
}
