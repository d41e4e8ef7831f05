use std::fmt;
use std::str::FromStr;

use multihash::Multihash;
use rcgen::KeyPair;
use webrtc::peer_connection::certificate::RTCCertificate;

use crate::error::{Result, WebRtcDirectError, to_setup_error};

const MD5_CODE: u64 = 0xd5;
const SHA2_256_CODE: u64 = 0x12;
const SHA2_512_CODE: u64 = 0x13;

/// Key pair flavours the webrtc stack accepts for DTLS certificates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyType {
    #[default]
    EcdsaP256,
    Ed25519,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::EcdsaP256 => "ecdsa-p256",
            KeyType::Ed25519 => "ed25519",
        }
    }

    fn signature_algorithm(self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            KeyType::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyType::Ed25519 => &rcgen::PKCS_ED25519,
        }
    }
}

impl FromStr for KeyType {
    type Err = WebRtcDirectError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ecdsa-p256" | "ecdsa" | "p-256" => Ok(KeyType::EcdsaP256),
            "ed25519" => Ok(KeyType::Ed25519),
            other => Err(WebRtcDirectError::InvalidArgument(format!(
                "unknown certificate key type {other:?}"
            ))),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CertificateConfig {
    pub key_type: KeyType,
}

/// Digest algorithms a DTLS fingerprint may be expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    /// Parses an SDP/W3C algorithm name (`md5`, `sha-256`, `sha-512`).
    pub fn from_name(name: &str) -> Result<Self> {
        if name.eq_ignore_ascii_case("md5") {
            Ok(HashAlgorithm::Md5)
        } else if name.eq_ignore_ascii_case("sha-256") {
            Ok(HashAlgorithm::Sha256)
        } else if name.eq_ignore_ascii_case("sha-512") {
            Ok(HashAlgorithm::Sha512)
        } else {
            Err(WebRtcDirectError::UnsupportedHashAlgorithm {
                algorithm: name.to_string(),
            })
        }
    }

    pub fn from_multihash_code(code: u64) -> Option<Self> {
        match code {
            MD5_CODE => Some(HashAlgorithm::Md5),
            SHA2_256_CODE => Some(HashAlgorithm::Sha256),
            SHA2_512_CODE => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn multihash_code(self) -> u64 {
        match self {
            HashAlgorithm::Md5 => MD5_CODE,
            HashAlgorithm::Sha256 => SHA2_256_CODE,
            HashAlgorithm::Sha512 => SHA2_512_CODE,
        }
    }

    pub fn sdp_name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha-256",
            HashAlgorithm::Sha512 => "sha-512",
        }
    }
}

/// One `(algorithm, AB:CD:..)` record describing a certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateFingerprint {
    pub algorithm: String,
    pub value: String,
}

impl CertificateFingerprint {
    pub fn new(algorithm: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            value: value.into(),
        }
    }

    /// Raw digest bytes of the colon-delimited hex value.
    pub fn digest(&self) -> Result<Vec<u8>> {
        let compact: String = self.value.chars().filter(|c| *c != ':').collect();
        hex::decode(&compact).map_err(|err| {
            WebRtcDirectError::InvalidArgument(format!(
                "fingerprint {:?} is not hex: {err}",
                self.value
            ))
        })
    }

    /// The fingerprint as a multihash, the form `/certhash` carries.
    pub fn to_multihash(&self) -> Result<Multihash<64>> {
        let algorithm = HashAlgorithm::from_name(&self.algorithm)?;
        let digest = self.digest()?;
        Multihash::wrap(algorithm.multihash_code(), &digest)
            .map_err(|err| WebRtcDirectError::InvalidArgument(err.to_string()))
    }

    /// Inverse of [`to_multihash`](Self::to_multihash), rendering the
    /// uppercase colon-delimited form used on `a=fingerprint:` lines.
    pub fn from_multihash(hash: &Multihash<64>) -> Result<Self> {
        let algorithm = HashAlgorithm::from_multihash_code(hash.code()).ok_or_else(|| {
            WebRtcDirectError::InvalidArgument(format!(
                "certhash uses unsupported multihash code {:#x}",
                hash.code()
            ))
        })?;
        let value = hash
            .digest()
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(":");
        Ok(Self::new(algorithm.sdp_name(), value))
    }
}

/// The DTLS certificate generated for a single dial attempt.
#[derive(Clone)]
pub struct LocalCertificate {
    inner: RTCCertificate,
    fingerprints: Vec<CertificateFingerprint>,
}

impl LocalCertificate {
    pub fn generate(config: &CertificateConfig) -> Result<Self> {
        let key_pair = KeyPair::generate_for(config.key_type.signature_algorithm())
            .map_err(to_setup_error)?;
        let inner = RTCCertificate::from_key_pair(key_pair).map_err(to_setup_error)?;
        let fingerprints = inner
            .get_fingerprints()
            .into_iter()
            .map(|fp| CertificateFingerprint::new(fp.algorithm, fp.value))
            .collect();
        Ok(Self {
            inner,
            fingerprints,
        })
    }

    pub fn fingerprints(&self) -> &[CertificateFingerprint] {
        &self.fingerprints
    }

    pub(crate) fn rtc_certificate(&self) -> RTCCertificate {
        self.inner.clone()
    }
}

impl fmt::Debug for LocalCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCertificate")
            .field("fingerprints", &self.fingerprints)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_map_to_multihash_codes() {
        assert_eq!(HashAlgorithm::from_name("md5").unwrap().multihash_code(), 0xd5);
        assert_eq!(HashAlgorithm::from_name("sha-256").unwrap().multihash_code(), 0x12);
        assert_eq!(HashAlgorithm::from_name("SHA-512").unwrap().multihash_code(), 0x13);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        for name in ["sha-1", "sha256", "blake3", ""] {
            let err = HashAlgorithm::from_name(name).unwrap_err();
            assert!(matches!(
                err,
                WebRtcDirectError::UnsupportedHashAlgorithm { ref algorithm } if algorithm == name
            ));
        }
    }

    #[test]
    fn fingerprint_converts_to_and_from_multihash() {
        let fingerprint = CertificateFingerprint::new("sha-256", "ab:cd:ef");
        let hash = fingerprint.to_multihash().expect("multihash");
        assert_eq!(hash.code(), 0x12);
        assert_eq!(hash.digest(), &[0xab, 0xcd, 0xef]);

        let rendered = CertificateFingerprint::from_multihash(&hash).expect("render");
        assert_eq!(rendered, CertificateFingerprint::new("sha-256", "AB:CD:EF"));
    }

    #[test]
    fn malformed_digest_is_invalid_argument() {
        let fingerprint = CertificateFingerprint::new("sha-256", "zz:01");
        assert!(matches!(
            fingerprint.to_multihash(),
            Err(WebRtcDirectError::InvalidArgument(_))
        ));
    }

    #[test]
    fn certhash_with_foreign_code_is_invalid_argument() {
        let identity = Multihash::<64>::wrap(0x00, &[1, 2, 3]).expect("identity hash");
        assert!(matches!(
            CertificateFingerprint::from_multihash(&identity),
            Err(WebRtcDirectError::InvalidArgument(_))
        ));
    }

    #[test]
    fn generated_certificate_exposes_sha256_fingerprint() {
        for key_type in [KeyType::EcdsaP256, KeyType::Ed25519] {
            let cert = LocalCertificate::generate(&CertificateConfig { key_type })
                .expect("generate certificate");
            let first = cert.fingerprints().first().expect("fingerprint");
            assert_eq!(first.algorithm, "sha-256");
            assert_eq!(first.digest().expect("hex").len(), 32);
        }
    }

    #[test]
    fn key_type_parses_from_config_strings() {
        assert_eq!("ed25519".parse::<KeyType>().unwrap(), KeyType::Ed25519);
        assert_eq!(" ECDSA-P256 ".parse::<KeyType>().unwrap(), KeyType::EcdsaP256);
        assert!("rsa".parse::<KeyType>().is_err());
    }
}
