//! First-settle-wins wait for the handshake data channel.
//!
//! Three producers race for one outcome: the channel's `on_open` listener,
//! its `on_error` listener and a deadline timer task. They share a
//! single-assignment sender and a cancellation token; whoever takes the
//! sender first decides the outcome and cancels the token, which stops the
//! timer. Dropping the gate cancels the token too and clears the listeners.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use crate::error::{Result, WebRtcDirectError};

type Outcome = Result<()>;

struct GateState {
    outcome: Mutex<Option<oneshot::Sender<Outcome>>>,
    settled: CancellationToken,
}

impl GateState {
    fn settle(&self, outcome: Outcome) -> bool {
        let Some(sender) = self.outcome.lock().take() else {
            return false;
        };
        self.settled.cancel();
        let _ = sender.send(outcome);
        true
    }
}

/// Producer side of a [`HandshakeChannelGate`]. Each method returns whether
/// it was the one that settled the gate.
#[derive(Clone)]
pub struct GateSignal {
    state: Arc<GateState>,
}

impl GateSignal {
    pub fn open(&self) -> bool {
        self.state.settle(Ok(()))
    }

    pub fn error(&self, reason: impl Into<String>) -> bool {
        self.state.settle(Err(WebRtcDirectError::HandshakeChannelFailed {
            reason: reason.into(),
        }))
    }

    pub fn is_settled(&self) -> bool {
        self.state.settled.is_cancelled()
    }
}

pub struct HandshakeChannelGate {
    state: Arc<GateState>,
    outcome: Option<oneshot::Receiver<Outcome>>,
    channel: Option<Arc<RTCDataChannel>>,
    deadline: Duration,
}

impl HandshakeChannelGate {
    /// Starts the deadline timer immediately. Must be called within a tokio
    /// runtime.
    pub fn new(deadline: Duration) -> (Self, GateSignal) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(GateState {
            outcome: Mutex::new(Some(tx)),
            settled: CancellationToken::new(),
        });

        let timer_state = Arc::clone(&state);
        let expires_at = Instant::now() + deadline;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer_state.settled.cancelled() => {
                    trace!(target: "webrtc_direct", "handshake gate timer cancelled");
                }
                _ = sleep_until(expires_at) => {
                    if timer_state.settle(Err(WebRtcDirectError::HandshakeChannelTimeout { deadline })) {
                        debug!(
                            target: "webrtc_direct",
                            deadline_ms = deadline.as_millis() as u64,
                            "handshake channel did not open in time"
                        );
                    }
                }
            }
        });

        let signal = GateSignal {
            state: Arc::clone(&state),
        };
        let gate = Self {
            state,
            outcome: Some(rx),
            channel: None,
            deadline,
        };
        (gate, signal)
    }

    /// Gate driven by `channel`'s open and error events.
    pub fn attach(channel: Arc<RTCDataChannel>, deadline: Duration) -> Self {
        let (mut gate, signal) = Self::new(deadline);

        let on_open = signal.clone();
        channel.on_open(Box::new(move || {
            let signal = on_open.clone();
            Box::pin(async move {
                if signal.open() {
                    debug!(target: "webrtc_direct", "handshake channel open");
                }
            })
        }));

        let on_error = signal.clone();
        channel.on_error(Box::new(move |err| {
            let signal = on_error.clone();
            Box::pin(async move {
                if signal.error(err.to_string()) {
                    debug!(target: "webrtc_direct", error = %err, "handshake channel errored");
                }
            })
        }));

        // the open event may already have fired before the listener existed
        if channel.ready_state() == RTCDataChannelState::Open {
            signal.open();
        }

        gate.channel = Some(channel);
        gate
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Resolves with whichever of open, error or timeout happened first.
    pub async fn wait(mut self) -> Result<()> {
        let Some(outcome) = self.outcome.take() else {
            return Err(WebRtcDirectError::ChannelClosed);
        };
        outcome.await.unwrap_or(Err(WebRtcDirectError::ChannelClosed))
    }
}

impl Drop for HandshakeChannelGate {
    fn drop(&mut self) {
        // abandon the slot so late events cannot settle a gate nobody awaits
        self.state.outcome.lock().take();
        self.state.settled.cancel();
        if let Some(channel) = self.channel.take() {
            channel.on_open(Box::new(|| Box::pin(async {})));
            channel.on_error(Box::new(|_| Box::pin(async {})));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEADLINE: Duration = Duration::from_millis(10_000);

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_at_deadline() {
        let (gate, signal) = HandshakeChannelGate::new(DEADLINE);
        let started = Instant::now();
        let err = gate.wait().await.unwrap_err();
        assert!(matches!(
            err,
            WebRtcDirectError::HandshakeChannelTimeout { deadline } if deadline == DEADLINE
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= DEADLINE, "settled early: {elapsed:?}");
        assert!(elapsed < DEADLINE + Duration::from_millis(5), "settled late: {elapsed:?}");
        assert!(signal.is_settled());
        assert!(!signal.open());
    }

    #[tokio::test(start_paused = true)]
    async fn open_wins_and_disarms_timer() {
        let (gate, signal) = HandshakeChannelGate::new(DEADLINE);
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(signal.open());
        gate.wait().await.expect("gate opens");

        tokio::time::advance(DEADLINE * 2).await;
        tokio::task::yield_now().await;
        assert!(!signal.error("late failure"));
        assert!(!signal.open());
    }

    #[tokio::test(start_paused = true)]
    async fn error_before_open_fails() {
        let (gate, signal) = HandshakeChannelGate::new(DEADLINE);
        assert!(signal.error("sctp association failed"));
        assert!(!signal.open());
        let err = gate.wait().await.unwrap_err();
        assert!(matches!(
            err,
            WebRtcDirectError::HandshakeChannelFailed { ref reason } if reason == "sctp association failed"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn open_signalled_from_another_task() {
        let (gate, signal) = HandshakeChannelGate::new(DEADLINE);
        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(9_999)).await;
            signal.open()
        });
        let started = Instant::now();
        gate.wait().await.expect("opened before deadline");
        assert!(started.elapsed() < DEADLINE);
        assert!(opener.await.expect("opener task"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_gate_ignores_late_events() {
        let (gate, signal) = HandshakeChannelGate::new(DEADLINE);
        drop(gate);
        assert!(signal.is_settled());
        tokio::time::advance(DEADLINE * 2).await;
        tokio::task::yield_now().await;
        assert!(!signal.open());
        assert!(!signal.error("after abandon"));
    }
}
