//! libp2p-noise (`XX`) over a [`Duplex`], bound to the connection's
//! [`Prologue`].
//!
//! Every Noise message travels as a 2-byte big-endian length followed by the
//! ciphertext, and one such frame is one data-channel message. The handshake
//! payload is a `NoiseHandshakePayload` protobuf holding the libp2p identity
//! key and its signature over the Noise static key.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use libp2p_identity::{Keypair, PeerId, PublicKey};
use prost::Message;
use snow::params::NoiseParams;
use snow::{Builder as NoiseBuilder, HandshakeState, TransportState};
use tracing::{debug, trace};

use crate::error::{Result, WebRtcDirectError};
use crate::prologue::Prologue;
use crate::stream::Duplex;

pub const NOISE_PARAMS: &str = "Noise_XX_25519_ChaChaPoly_SHA256";
const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";
const LENGTH_PREFIX_LEN: usize = 2;
const TAG_LEN: usize = 16;
/// Largest data-channel message either side sends; advertised as
/// `a=max-message-size` in the synthesized answer.
pub const MAX_MESSAGE_LEN: usize = 16_384;
const MAX_FRAME_LEN: usize = MAX_MESSAGE_LEN - LENGTH_PREFIX_LEN;
/// Largest plaintext carried by one transport frame.
pub const MAX_PLAINTEXT_LEN: usize = MAX_FRAME_LEN - TAG_LEN;

/// Runs the authenticated handshake as the dialing side.
#[async_trait]
pub trait SecureOutbound: Send + Sync {
    async fn secure_outbound(
        &self,
        local: &Keypair,
        duplex: Box<dyn Duplex>,
        remote: PeerId,
        prologue: &Prologue,
    ) -> Result<SecureSession>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseSecureOutbound;

#[async_trait]
impl SecureOutbound for NoiseSecureOutbound {
    async fn secure_outbound(
        &self,
        local: &Keypair,
        duplex: Box<dyn Duplex>,
        remote: PeerId,
        prologue: &Prologue,
    ) -> Result<SecureSession> {
        let mut framed = FramedDuplex::new(duplex);
        let (mut state, payload) = handshake_state(local, prologue, Role::Initiator)?;
        let mut buf = vec![0u8; MAX_FRAME_LEN];

        // -> e
        let len = state.write_message(&[], &mut buf).map_err(noise_error)?;
        framed.write_frame(&buf[..len]).await?;
        trace!(target: "webrtc_direct", "noise: sent e");

        // <- e, ee, s, es
        let identity = read_identity(&mut framed, &mut state).await?;
        let remote_peer = identity.to_peer_id();
        if remote_peer != remote {
            return Err(WebRtcDirectError::SecureHandshake(format!(
                "expected peer {remote}, responder authenticated as {remote_peer}"
            )));
        }
        trace!(target: "webrtc_direct", peer = %remote_peer, "noise: verified responder");

        // -> s, se
        let len = state.write_message(&payload, &mut buf).map_err(noise_error)?;
        framed.write_frame(&buf[..len]).await?;

        let transport = state.into_transport_mode().map_err(noise_error)?;
        debug!(target: "webrtc_direct", peer = %remote_peer, "noise handshake complete");
        Ok(SecureSession {
            remote_peer,
            transport,
            framed,
        })
    }
}

/// Responder half of the same handshake. The dialer never needs it; it lets
/// an in-process webrtc-direct peer answer a dial.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseSecureInbound;

impl NoiseSecureInbound {
    /// Authenticates whoever dialed; the remote peer id comes from its payload.
    pub async fn secure_inbound(
        &self,
        local: &Keypair,
        duplex: Box<dyn Duplex>,
        prologue: &Prologue,
    ) -> Result<SecureSession> {
        let mut framed = FramedDuplex::new(duplex);
        let (mut state, payload) = handshake_state(local, prologue, Role::Responder)?;

        // <- e
        let message = framed.read_frame().await?;
        let mut scratch = vec![0u8; message.len()];
        state.read_message(&message, &mut scratch).map_err(noise_error)?;

        // -> e, ee, s, es
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let len = state.write_message(&payload, &mut buf).map_err(noise_error)?;
        framed.write_frame(&buf[..len]).await?;

        // <- s, se
        let identity = read_identity(&mut framed, &mut state).await?;
        let remote_peer = identity.to_peer_id();
        let transport = state.into_transport_mode().map_err(noise_error)?;
        debug!(target: "webrtc_direct", peer = %remote_peer, "noise handshake accepted");
        Ok(SecureSession {
            remote_peer,
            transport,
            framed,
        })
    }
}

/// Encrypted session produced by a successful handshake.
pub struct SecureSession {
    remote_peer: PeerId,
    transport: TransportState,
    framed: FramedDuplex,
}

impl SecureSession {
    pub fn remote_peer(&self) -> PeerId {
        self.remote_peer
    }

    /// Encrypts and sends `data`, one data-channel message per
    /// [`MAX_PLAINTEXT_LEN`] bytes.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        for chunk in data.chunks(MAX_PLAINTEXT_LEN) {
            let len = self
                .transport
                .write_message(chunk, &mut buf)
                .map_err(noise_error)?;
            self.framed.write_frame(&buf[..len]).await?;
        }
        Ok(())
    }

    /// Next decrypted frame, or `None` once the peer closed the stream.
    pub async fn read(&mut self) -> Result<Option<Bytes>> {
        let frame = match self.framed.read_frame().await {
            Ok(frame) => frame,
            Err(WebRtcDirectError::ChannelClosed) if self.framed.is_drained() => return Ok(None),
            Err(err) => return Err(err),
        };
        let mut buf = vec![0u8; frame.len()];
        let len = self
            .transport
            .read_message(&frame, &mut buf)
            .map_err(noise_error)?;
        buf.truncate(len);
        Ok(Some(Bytes::from(buf)))
    }

    pub async fn close(&mut self) {
        self.framed.inner.close().await;
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Initiator,
    Responder,
}

/// Builds the Noise state plus our encoded identity payload.
fn handshake_state(
    local: &Keypair,
    prologue: &Prologue,
    role: Role,
) -> Result<(HandshakeState, Vec<u8>)> {
    let params: NoiseParams = NOISE_PARAMS
        .parse()
        .map_err(|err| WebRtcDirectError::SecureHandshake(format!("invalid noise params: {err}")))?;
    let builder = NoiseBuilder::new(params).prologue(prologue.as_bytes());
    let static_keys = builder.generate_keypair().map_err(noise_error)?;
    let builder = builder.local_private_key(&static_keys.private);
    let state = match role {
        Role::Initiator => builder.build_initiator().map_err(noise_error)?,
        Role::Responder => builder.build_responder().map_err(noise_error)?,
    };

    let mut signed = STATIC_KEY_DOMAIN.to_vec();
    signed.extend_from_slice(&static_keys.public);
    let signature = local
        .sign(&signed)
        .map_err(|err| WebRtcDirectError::SecureHandshake(format!("identity signing failed: {err}")))?;
    let payload = NoiseHandshakePayload {
        identity_key: local.public().encode_protobuf(),
        identity_sig: signature,
    };
    Ok((state, payload.encode_to_vec()))
}

/// Reads the handshake message carrying the remote's static key and payload.
async fn read_identity(framed: &mut FramedDuplex, state: &mut HandshakeState) -> Result<PublicKey> {
    let message = framed.read_frame().await?;
    let mut buf = vec![0u8; message.len()];
    let len = state.read_message(&message, &mut buf).map_err(noise_error)?;
    let remote_static = state
        .get_remote_static()
        .ok_or_else(|| WebRtcDirectError::SecureHandshake("remote sent no static key".into()))?
        .to_vec();
    verify_payload(&buf[..len], &remote_static)
}

/// Checks that the payload's identity key signed `remote_static`.
fn verify_payload(payload: &[u8], remote_static: &[u8]) -> Result<PublicKey> {
    let payload = NoiseHandshakePayload::decode(payload)
        .map_err(|err| WebRtcDirectError::SecureHandshake(format!("malformed handshake payload: {err}")))?;
    if payload.identity_key.is_empty() || payload.identity_sig.is_empty() {
        return Err(WebRtcDirectError::SecureHandshake(
            "handshake payload lacks identity".into(),
        ));
    }
    let identity = PublicKey::try_decode_protobuf(&payload.identity_key)
        .map_err(|err| WebRtcDirectError::SecureHandshake(format!("bad identity key: {err}")))?;
    let mut signed = STATIC_KEY_DOMAIN.to_vec();
    signed.extend_from_slice(remote_static);
    if !identity.verify(&signed, &payload.identity_sig) {
        return Err(WebRtcDirectError::SecureHandshake(
            "identity signature over static key is invalid".into(),
        ));
    }
    Ok(identity)
}

fn noise_error(err: snow::Error) -> WebRtcDirectError {
    WebRtcDirectError::SecureHandshake(format!("noise error: {err}"))
}

/// Wire form of the libp2p-noise handshake payload. Extension fields are
/// ignored on decode.
#[derive(Clone, PartialEq, Message)]
struct NoiseHandshakePayload {
    #[prost(bytes = "vec", tag = "1")]
    identity_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    identity_sig: Vec<u8>,
}

/// Length-prefixed frames over a chunked duplex. Chunk boundaries need not
/// line up with frame boundaries.
struct FramedDuplex {
    inner: Box<dyn Duplex>,
    buffer: BytesMut,
}

impl FramedDuplex {
    fn new(inner: Box<dyn Duplex>) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(WebRtcDirectError::SecureHandshake(format!(
                "frame of {} bytes exceeds {MAX_FRAME_LEN}",
                frame.len()
            )));
        }
        let len = frame.len() as u16;
        let mut out = BytesMut::with_capacity(frame.len() + LENGTH_PREFIX_LEN);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(frame);
        self.inner.send(out.freeze()).await
    }

    async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if self.buffer.len() >= LENGTH_PREFIX_LEN {
                let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
                if self.buffer.len() >= LENGTH_PREFIX_LEN + len {
                    self.buffer.advance(LENGTH_PREFIX_LEN);
                    return Ok(self.buffer.split_to(len).freeze());
                }
            }
            match self.inner.recv().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Err(WebRtcDirectError::ChannelClosed),
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::stream::{MemoryDuplex, memory_pair};

    fn prologue(tag: u8) -> Prologue {
        Prologue::from_encoded(&[0x12, 0x01, tag], &[0x12, 0x01, 0x80])
    }

    /// Records the size of every chunk handed to the inner duplex.
    struct SizeRecording {
        inner: MemoryDuplex,
        sizes: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl Duplex for SizeRecording {
        async fn send(&mut self, chunk: Bytes) -> Result<()> {
            self.sizes.lock().push(chunk.len());
            self.inner.send(chunk).await
        }

        async fn recv(&mut self) -> Option<Bytes> {
            self.inner.recv().await
        }
    }

    async fn handshake_pair(
        dialer_duplex: Box<dyn Duplex>,
        listener_duplex: Box<dyn Duplex>,
    ) -> (SecureSession, SecureSession, Keypair, Keypair) {
        let dialer = Keypair::generate_ed25519();
        let listener = Keypair::generate_ed25519();
        let listener_id = listener.public().to_peer_id();
        let shared = prologue(1);

        let responder = {
            let shared = shared.clone();
            let listener = listener.clone();
            tokio::spawn(async move {
                NoiseSecureInbound
                    .secure_inbound(&listener, listener_duplex, &shared)
                    .await
            })
        };
        let outbound = NoiseSecureOutbound
            .secure_outbound(&dialer, dialer_duplex, listener_id, &shared)
            .await
            .expect("dialer handshake");
        let inbound = responder
            .await
            .expect("responder task")
            .expect("responder handshake");
        (outbound, inbound, dialer, listener)
    }

    #[tokio::test]
    async fn dialer_and_listener_agree_when_prologues_match() {
        let (left, right) = memory_pair();
        let (mut outbound, mut inbound, dialer, listener) =
            handshake_pair(Box::new(left), Box::new(right)).await;

        assert_eq!(outbound.remote_peer(), listener.public().to_peer_id());
        assert_eq!(inbound.remote_peer(), dialer.public().to_peer_id());

        outbound.write(b"hello listener").await.expect("write");
        let received = inbound.read().await.expect("read").expect("frame");
        assert_eq!(&received[..], b"hello listener");

        inbound.write(b"hello dialer").await.expect("reply");
        let reply = outbound.read().await.expect("read").expect("frame");
        assert_eq!(&reply[..], b"hello dialer");
    }

    #[tokio::test]
    async fn large_writes_stay_within_message_limit() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let (left, right) = memory_pair();
        let recording = SizeRecording {
            inner: left,
            sizes: Arc::clone(&sizes),
        };
        let (mut outbound, mut inbound, _, _) =
            handshake_pair(Box::new(recording), Box::new(right)).await;
        sizes.lock().clear();

        let payload = vec![7u8; 65_519];
        outbound.write(&payload).await.expect("write");

        let sent = sizes.lock().clone();
        assert_eq!(sent.len(), payload.len().div_ceil(MAX_PLAINTEXT_LEN));
        assert!(sent.iter().all(|len| *len <= MAX_MESSAGE_LEN), "chunks: {sent:?}");
        assert_eq!(sent[0], MAX_MESSAGE_LEN);

        let mut received = Vec::new();
        while received.len() < payload.len() {
            let frame = inbound.read().await.expect("read").expect("frame");
            received.extend_from_slice(&frame);
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (left, _right) = memory_pair();
        let mut framed = FramedDuplex::new(Box::new(left));
        let err = framed
            .write_frame(&vec![0u8; MAX_FRAME_LEN + 1])
            .await
            .unwrap_err();
        assert!(matches!(err, WebRtcDirectError::SecureHandshake(_)));
    }

    #[tokio::test]
    async fn prologue_mismatch_fails_handshake() {
        let dialer = Keypair::generate_ed25519();
        let listener = Keypair::generate_ed25519();
        let listener_id = listener.public().to_peer_id();
        let (left, right) = memory_pair();

        let responder = tokio::spawn(async move {
            NoiseSecureInbound
                .secure_inbound(&listener, Box::new(right), &prologue(2))
                .await
        });
        let result = NoiseSecureOutbound
            .secure_outbound(&dialer, Box::new(left), listener_id, &prologue(1))
            .await;
        assert!(matches!(result, Err(WebRtcDirectError::SecureHandshake(_))));
        drop(result);
        assert!(responder.await.expect("responder task").is_err());
    }

    #[tokio::test]
    async fn unexpected_remote_identity_is_rejected() {
        let dialer = Keypair::generate_ed25519();
        let listener = Keypair::generate_ed25519();
        let impostor_expected = Keypair::generate_ed25519().public().to_peer_id();
        let (left, right) = memory_pair();
        let shared = prologue(3);

        let responder = {
            let shared = shared.clone();
            tokio::spawn(async move {
                NoiseSecureInbound
                    .secure_inbound(&listener, Box::new(right), &shared)
                    .await
            })
        };
        let result = NoiseSecureOutbound
            .secure_outbound(&dialer, Box::new(left), impostor_expected, &shared)
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, WebRtcDirectError::SecureHandshake(ref msg) if msg.contains("expected peer")));
        responder.abort();
    }

    #[tokio::test]
    async fn frames_survive_arbitrary_chunking() {
        let (mut left, right) = memory_pair();
        let mut framed = FramedDuplex::new(Box::new(right));
        // two frames split awkwardly across three chunks
        left.send(Bytes::from_static(&[0x00])).await.unwrap();
        left.send(Bytes::from_static(&[0x03, b'a', b'b'])).await.unwrap();
        left.send(Bytes::from_static(&[b'c', 0x00, 0x01, b'z'])).await.unwrap();
        assert_eq!(&framed.read_frame().await.unwrap()[..], b"abc");
        assert_eq!(&framed.read_frame().await.unwrap()[..], b"z");
    }

    #[test]
    fn payload_decoder_skips_unknown_fields() {
        let payload = NoiseHandshakePayload {
            identity_key: vec![1, 2, 3],
            identity_sig: vec![4; 200],
        };
        let mut encoded = payload.encode_to_vec();
        // field 4 (extensions), length-delimited
        encoded.extend_from_slice(&[0x22, 0x02, 0xaa, 0xbb]);
        assert_eq!(NoiseHandshakePayload::decode(&encoded[..]).unwrap(), payload);
        assert!(NoiseHandshakePayload::decode(&[0x0a, 0x05, 0x01][..]).is_err());
    }

    #[test]
    fn payload_without_identity_is_rejected() {
        let empty = NoiseHandshakePayload::default().encode_to_vec();
        assert!(matches!(
            verify_payload(&empty, &[0u8; 32]),
            Err(WebRtcDirectError::SecureHandshake(ref msg)) if msg.contains("lacks identity")
        ));
    }
}
