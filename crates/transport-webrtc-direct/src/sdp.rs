//! Offer/answer construction without a signaling round trip.
//!
//! The remote answer is synthesized from the target multiaddr: its ip/udp
//! pair becomes the single host candidate and its certhash becomes the DTLS
//! fingerprint. Both sides use the same ICE credential, so nothing else has
//! to be exchanged.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use multiaddr::Multiaddr;
use rand::RngCore;
use tracing::trace;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::address;
use crate::certificate::CertificateFingerprint;
use crate::error::{Result, WebRtcDirectError, to_setup_error};
use crate::noise::MAX_MESSAGE_LEN;

const CREDENTIAL_BYTES: usize = 16;
const ICE_UFRAG_PREFIX: &str = "a=ice-ufrag:";
const ICE_PWD_PREFIX: &str = "a=ice-pwd:";

/// Random ICE username fragment that doubles as the password.
#[derive(Clone, PartialEq, Eq)]
pub struct NegotiationCredential(String);

impl NegotiationCredential {
    /// 32 lowercase hex characters.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CREDENTIAL_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NegotiationCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // also the ICE password
        f.write_str("NegotiationCredential(..)")
    }
}

/// Replaces every ICE ufrag and pwd line of `sdp` with `credential`.
pub fn munge_credentials(sdp: &str, credential: &NegotiationCredential) -> String {
    let mut out = String::with_capacity(sdp.len());
    for line in sdp.split_inclusive('\n') {
        let (body, ending) = match line.strip_suffix("\r\n") {
            Some(body) => (body, "\r\n"),
            None => match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            },
        };
        if body.starts_with(ICE_UFRAG_PREFIX) {
            out.push_str(ICE_UFRAG_PREFIX);
            out.push_str(credential.as_str());
        } else if body.starts_with(ICE_PWD_PREFIX) {
            out.push_str(ICE_PWD_PREFIX);
            out.push_str(credential.as_str());
        } else {
            out.push_str(body);
        }
        out.push_str(ending);
    }
    out
}

/// The answer an ICE-lite webrtc-direct listener at `target` would send.
pub fn answer_for_target(target: &Multiaddr, credential: &NegotiationCredential) -> Result<String> {
    let socket = address::socket_addr(target).ok_or_else(|| {
        WebRtcDirectError::InvalidArgument(format!("{target} has no ip/udp endpoint"))
    })?;
    let certhash = address::certhash(target).ok_or_else(|| {
        WebRtcDirectError::InvalidArgument(format!("{target} carries no certhash"))
    })?;
    let fingerprint = CertificateFingerprint::from_multihash(&certhash)?;
    Ok(render_answer(socket, &fingerprint, credential))
}

fn render_answer(
    socket: SocketAddr,
    fingerprint: &CertificateFingerprint,
    credential: &NegotiationCredential,
) -> String {
    let ip_version = match socket.ip() {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };
    let ip = socket.ip();
    let port = socket.port();
    let ufrag = credential.as_str();
    let algorithm = &fingerprint.algorithm;
    let value = &fingerprint.value;
    let max_message = MAX_MESSAGE_LEN;
    format!(
        "v=0\r\n\
         o=- 0 0 IN {ip_version} {ip}\r\n\
         s=-\r\n\
         t=0 0\r\n\
         a=ice-lite\r\n\
         m=application {port} UDP/DTLS/SCTP webrtc-datachannel\r\n\
         c=IN {ip_version} {ip}\r\n\
         a=mid:0\r\n\
         a=ice-options:ice2\r\n\
         a=ice-ufrag:{ufrag}\r\n\
         a=ice-pwd:{ufrag}\r\n\
         a=fingerprint:{algorithm} {value}\r\n\
         a=setup:passive\r\n\
         a=sctp-port:5000\r\n\
         a=max-message-size:{max_message}\r\n\
         a=candidate:1467250027 1 UDP 1467250027 {ip} {port} typ host\r\n\
         a=end-of-candidates\r\n"
    )
}

/// Installs a munged local offer and a synthesized remote answer on a peer
/// connection. Performs no network I/O.
pub struct NegotiationBuilder<'a> {
    peer_connection: &'a RTCPeerConnection,
    credential: &'a NegotiationCredential,
}

impl<'a> NegotiationBuilder<'a> {
    pub fn new(peer_connection: &'a RTCPeerConnection, credential: &'a NegotiationCredential) -> Self {
        Self {
            peer_connection,
            credential,
        }
    }

    pub async fn negotiate(&self, target: &Multiaddr) -> Result<()> {
        // build the answer first so a bad certhash fails before any state changes
        let answer_sdp = answer_for_target(target, self.credential)?;

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(to_setup_error)?;
        let munged = munge_credentials(&offer.sdp, self.credential);
        let offer = RTCSessionDescription::offer(munged).map_err(to_setup_error)?;
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(to_setup_error)?;
        trace!(target: "webrtc_direct", addr = %target, "local offer installed");

        let answer = RTCSessionDescription::answer(answer_sdp).map_err(to_setup_error)?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(to_setup_error)?;
        trace!(target: "webrtc_direct", addr = %target, "synthesized answer installed");
        Ok(())
    }
}
