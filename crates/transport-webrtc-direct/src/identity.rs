use std::sync::Arc;

use libp2p_identity::Keypair;
use tokio::sync::watch;

use crate::error::{Result, WebRtcDirectError};

/// Write side of the process-wide identity latch. Publishing happens once.
#[derive(Debug)]
pub struct IdentityPublisher {
    tx: watch::Sender<Option<Arc<Keypair>>>,
}

impl IdentityPublisher {
    /// Returns `false` if an identity was already published.
    pub fn publish(&self, keypair: Keypair) -> bool {
        let keypair = Arc::new(keypair);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(keypair);
            true
        })
    }
}

/// Read side: every dial attempt awaits [`ready`](Self::ready) before it
/// needs the local identity.
#[derive(Clone, Debug)]
pub struct IdentityLatch {
    rx: watch::Receiver<Option<Arc<Keypair>>>,
}

impl IdentityLatch {
    pub fn new() -> (IdentityPublisher, IdentityLatch) {
        let (tx, rx) = watch::channel(None);
        (IdentityPublisher { tx }, IdentityLatch { rx })
    }

    /// A latch that is ready from the start.
    pub fn ready_with(keypair: Keypair) -> Self {
        let (_, rx) = watch::channel(Some(Arc::new(keypair)));
        Self { rx }
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Waits for the published identity. Fails if the publisher is dropped
    /// without publishing.
    pub async fn ready(&self) -> Result<Arc<Keypair>> {
        let mut rx = self.rx.clone();
        let slot = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WebRtcDirectError::IdentityUnavailable)?;
        slot.clone().ok_or(WebRtcDirectError::IdentityUnavailable)
    }
}
