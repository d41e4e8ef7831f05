use std::time::Duration;

use multiaddr::Multiaddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WebRtcDirectError>;

/// Every way an outbound webrtc-direct attempt can fail.
///
/// All variants are terminal for the attempt that produced them.
#[derive(Debug, Error)]
pub enum WebRtcDirectError {
    #[error("multiaddr {addr} has no peer id and cannot be dialed")]
    InappropriateMultiaddr { addr: Multiaddr },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported fingerprint hash algorithm {algorithm:?}")]
    UnsupportedHashAlgorithm { algorithm: String },
    #[error("handshake data channel failed: {reason}")]
    HandshakeChannelFailed { reason: String },
    #[error("handshake data channel did not open within {deadline:?}")]
    HandshakeChannelTimeout { deadline: Duration },
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
    #[error("secure handshake failed: {0}")]
    SecureHandshake(String),
    #[error("dial aborted")]
    Aborted,
    #[error("local identity was never published")]
    IdentityUnavailable,
    #[error("webrtc setup failed: {0}")]
    Setup(String),
    #[error("data channel closed")]
    ChannelClosed,
    #[error("data channel send failed: {0}")]
    ChannelSend(String),
}

pub(crate) fn to_setup_error<E: std::fmt::Display>(err: E) -> WebRtcDirectError {
    WebRtcDirectError::Setup(err.to_string())
}
