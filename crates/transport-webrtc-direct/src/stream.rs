use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;

use crate::error::{Result, WebRtcDirectError};

/// Chunk-oriented byte pipe the secure handshake runs over.
///
/// `recv` yields `None` once the peer side is closed; the source is not
/// restartable.
#[async_trait]
pub trait Duplex: Send {
    async fn send(&mut self, chunk: Bytes) -> Result<()>;
    async fn recv(&mut self) -> Option<Bytes>;
    async fn close(&mut self) {}
}

/// A data channel seen as a [`Duplex`]: one message in, one chunk out.
pub struct DataChannelDuplex {
    channel: Arc<RTCDataChannel>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl DataChannelDuplex {
    pub fn new(channel: Arc<RTCDataChannel>) -> Self {
        let (tx, inbound) = mpsc::unbounded_channel();
        // shared so on_close can end the source by dropping the last sender
        let sender = Arc::new(Mutex::new(Some(tx)));

        let message_sender = Arc::clone(&sender);
        let label = channel.label().to_string();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let sender = Arc::clone(&message_sender);
            Box::pin(async move {
                let guard = sender.lock();
                if let Some(tx) = guard.as_ref() {
                    if tx.send(msg.data).is_err() {
                        trace!(target: "webrtc_direct", "duplex reader gone, dropping chunk");
                    }
                }
            })
        }));

        let close_sender = Arc::clone(&sender);
        channel.on_close(Box::new(move || {
            let sender = Arc::clone(&close_sender);
            let label = label.clone();
            Box::pin(async move {
                trace!(target: "webrtc_direct", channel = %label, "data channel closed");
                sender.lock().take();
            })
        }));

        Self { channel, inbound }
    }

    pub fn channel(&self) -> &Arc<RTCDataChannel> {
        &self.channel
    }
}

#[async_trait]
impl Duplex for DataChannelDuplex {
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        self.channel.send(&chunk).await.map_err(|err| {
            warn!(target: "webrtc_direct", error = %err, len = chunk.len(), "data channel send failed");
            WebRtcDirectError::ChannelSend(err.to_string())
        })?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        if let Err(err) = self.channel.close().await {
            trace!(target: "webrtc_direct", error = %err, "data channel close failed");
        }
    }
}

/// In-process duplex half, see [`memory_pair`].
pub struct MemoryDuplex {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

/// Two connected duplexes; what one sends the other receives.
pub fn memory_pair() -> (MemoryDuplex, MemoryDuplex) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        MemoryDuplex {
            outbound: Some(a_tx),
            inbound: b_rx,
        },
        MemoryDuplex {
            outbound: Some(b_tx),
            inbound: a_rx,
        },
    )
}

#[async_trait]
impl Duplex for MemoryDuplex {
    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(WebRtcDirectError::ChannelClosed)?;
        outbound
            .send(chunk)
            .map_err(|_| WebRtcDirectError::ChannelClosed)
    }

    async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.outbound.take();
    }
}
