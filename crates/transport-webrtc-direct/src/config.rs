use std::time::Duration;

use crate::certificate::{CertificateConfig, KeyType};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(10_000);
const DEFAULT_ICE_DISCONNECTED_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ICE_FAILED_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ICE_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

const HANDSHAKE_TIMEOUT_ENV: &str = "WEBRTC_DIRECT_HANDSHAKE_TIMEOUT_MS";
const KEY_TYPE_ENV: &str = "WEBRTC_DIRECT_KEY_TYPE";

/// ICE agent timers handed to the webrtc `SettingEngine`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IceTimeouts {
    pub disconnected: Duration,
    pub failed: Duration,
    pub keep_alive: Duration,
}

impl Default for IceTimeouts {
    fn default() -> Self {
        Self {
            disconnected: DEFAULT_ICE_DISCONNECTED_TIMEOUT,
            failed: DEFAULT_ICE_FAILED_TIMEOUT,
            keep_alive: DEFAULT_ICE_KEEPALIVE_INTERVAL,
        }
    }
}

/// Settings applied to every outbound dial attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DialConfig {
    /// How long the handshake data channel may take to open.
    pub handshake_timeout: Duration,
    pub certificate: CertificateConfig,
    pub ice_timeouts: IceTimeouts,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            certificate: CertificateConfig::default(),
            ice_timeouts: IceTimeouts::default(),
        }
    }
}

impl DialConfig {
    /// Defaults, overridden by `WEBRTC_DIRECT_*` environment variables when
    /// they hold valid values.
    pub fn from_env() -> Self {
        let handshake_timeout = std::env::var(HANDSHAKE_TIMEOUT_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);
        let key_type = std::env::var(KEY_TYPE_ENV)
            .ok()
            .and_then(|value| value.parse::<KeyType>().ok())
            .unwrap_or_default();
        Self {
            handshake_timeout,
            certificate: CertificateConfig { key_type },
            ..Self::default()
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_key_type(mut self, key_type: KeyType) -> Self {
        self.certificate.key_type = key_type;
        self
    }

    pub fn with_ice_timeouts(mut self, ice_timeouts: IceTimeouts) -> Self {
        self.ice_timeouts = ice_timeouts;
        self
    }
}
