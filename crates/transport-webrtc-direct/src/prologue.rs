use multiaddr::Multiaddr;

use crate::address;
use crate::certificate::{CertificateFingerprint, LocalCertificate};
use crate::error::{Result, WebRtcDirectError};

pub const PROLOGUE_PREFIX: &[u8] = b"libp2p-webrtc-noise:";

/// Bytes mixed into the Noise handshake that pin it to the two DTLS
/// certificates negotiated for the connection.
///
/// Both fingerprints are ordered by their multihash encoding, so dialer and
/// listener compute the same value without agreeing on roles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prologue(Vec<u8>);

impl Prologue {
    /// Prologue for an attempt using `certificate` against `target`.
    pub fn for_target(certificate: &LocalCertificate, target: &Multiaddr) -> Result<Self> {
        let remote = address::certhash(target).ok_or_else(|| {
            WebRtcDirectError::InvalidArgument(format!("{target} carries no certhash"))
        })?;
        Self::derive(certificate.fingerprints(), &remote.to_bytes())
    }

    /// Uses the first local fingerprint; `remote` is already multihash encoded.
    pub fn derive(local: &[CertificateFingerprint], remote: &[u8]) -> Result<Self> {
        let fingerprint = local.first().ok_or_else(|| {
            WebRtcDirectError::InvalidArgument("local certificate has no fingerprints".into())
        })?;
        if remote.is_empty() {
            return Err(WebRtcDirectError::InvalidArgument(
                "remote certhash is empty".into(),
            ));
        }
        let local = fingerprint.to_multihash()?.to_bytes();
        Ok(Self::from_encoded(&local, remote))
    }

    pub fn from_encoded(a: &[u8], b: &[u8]) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut bytes = Vec::with_capacity(PROLOGUE_PREFIX.len() + first.len() + second.len());
        bytes.extend_from_slice(PROLOGUE_PREFIX);
        bytes.extend_from_slice(first);
        bytes.extend_from_slice(second);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Prologue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
