//! Outbound libp2p `webrtc-direct` dialing.
//!
//! A dial never talks to a signaling server: the remote's SDP answer is
//! synthesized from its multiaddr, the handshake data channel is opened
//! pre-negotiated, and a Noise handshake bound to both DTLS fingerprints
//! authenticates the remote peer.

pub mod address;
pub mod certificate;
pub mod config;
pub mod connection;
pub mod error;
pub mod gate;
pub mod identity;
pub mod noise;
pub mod prologue;
pub mod sdp;
pub mod stream;
mod transport;

pub use certificate::{CertificateFingerprint, HashAlgorithm, KeyType, LocalCertificate};
pub use config::DialConfig;
pub use connection::{Connection, Direction};
pub use error::{Result, WebRtcDirectError};
pub use identity::{IdentityLatch, IdentityPublisher};
pub use noise::{NoiseSecureInbound, NoiseSecureOutbound, SecureOutbound, SecureSession};
pub use prologue::Prologue;
pub use stream::Duplex;
pub use transport::{
    DialOptions, HANDSHAKE_CHANNEL_ID, HANDSHAKE_CHANNEL_LABEL, ListenerOptions,
    WebRtcDirectTransport,
};
