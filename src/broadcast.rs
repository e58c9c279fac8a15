//! Control-signal plumbing between the session core and client handlers.
//!
//! A client that wants control signals registers a [`ControlSink`] at
//! attach time; the receiving half lives wherever that client dispatches
//! its handlers. Delivery is fire-and-forget with a bounded courtesy
//! wait: the broadcaster hands the signal over, waits a little for the
//! acknowledgement, and moves on. Whatever the handler does with the
//! signal never becomes the broadcaster's problem.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::ConsoleError;

/// Depth of a client's pending-signal queue.
const CONTROL_QUEUE_DEPTH: usize = 16;

/// Signals mirrored onto client control handlers. Raw values are
/// wire-stable and match the classic console numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtrlSignal {
    CtrlC,
    Break,
    Close,
    Logoff,
    Shutdown,
}

impl CtrlSignal {
    pub fn as_raw(self) -> u32 {
        match self {
            CtrlSignal::CtrlC => 0,
            CtrlSignal::Break => 1,
            CtrlSignal::Close => 2,
            CtrlSignal::Logoff => 5,
            CtrlSignal::Shutdown => 6,
        }
    }
}

impl TryFrom<u32> for CtrlSignal {
    type Error = ConsoleError;

    fn try_from(raw: u32) -> Result<Self, ConsoleError> {
        match raw {
            0 => Ok(CtrlSignal::CtrlC),
            1 => Ok(CtrlSignal::Break),
            2 => Ok(CtrlSignal::Close),
            5 => Ok(CtrlSignal::Logoff),
            6 => Ok(CtrlSignal::Shutdown),
            other => Err(ConsoleError::InvalidParameter(format!(
                "control signal {other} is not recognized"
            ))),
        }
    }
}

/// One signal handed to a client's dispatch context. Fire `ack` once the
/// handler ran; dropping it unacknowledged tells the broadcaster the
/// delivery was abandoned.
#[derive(Debug)]
pub struct ControlDelivery {
    pub signal: CtrlSignal,
    pub ack: oneshot::Sender<()>,
}

/// Sending half of a client's control queue, stored in the session's
/// membership entry.
#[derive(Clone, Debug)]
pub struct ControlSink {
    tx: mpsc::Sender<ControlDelivery>,
}

/// How a single delivery ended. None of these fail a broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler acknowledged within the wait window.
    Acknowledged,
    /// The client's dispatch context is gone.
    SinkClosed,
    /// The delivery was accepted but the acknowledgement was dropped.
    AckDropped,
    /// The wait window elapsed first.
    TimedOut,
}

impl ControlSink {
    /// Builds the sink plus the receiver the client's dispatch loop
    /// drains.
    pub fn channel() -> (ControlSink, mpsc::Receiver<ControlDelivery>) {
        let (tx, rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        (ControlSink { tx }, rx)
    }

    /// Hands `signal` to the client and waits up to `wait` for the
    /// acknowledgement. The wait bounds the whole exchange; a zero wait
    /// still dispatches the signal when the queue has room.
    pub async fn deliver(&self, signal: CtrlSignal, wait: Duration) -> DeliveryOutcome {
        let (ack_tx, ack_rx) = oneshot::channel();
        let attempt = async {
            let delivery = ControlDelivery {
                signal,
                ack: ack_tx,
            };
            if self.tx.send(delivery).await.is_err() {
                return DeliveryOutcome::SinkClosed;
            }
            match ack_rx.await {
                Ok(()) => DeliveryOutcome::Acknowledged,
                Err(_) => DeliveryOutcome::AckDropped,
            }
        };
        match tokio::time::timeout(wait, attempt).await {
            Ok(outcome) => outcome,
            Err(_) => DeliveryOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_values_match_console_numbering() {
        assert_eq!(CtrlSignal::CtrlC.as_raw(), 0);
        assert_eq!(CtrlSignal::Break.as_raw(), 1);
        assert_eq!(CtrlSignal::Close.as_raw(), 2);
        assert_eq!(CtrlSignal::Logoff.as_raw(), 5);
        assert_eq!(CtrlSignal::Shutdown.as_raw(), 6);

        for raw in [0, 1, 2, 5, 6] {
            let sig = CtrlSignal::try_from(raw).unwrap();
            assert_eq!(sig.as_raw(), raw);
        }
        assert!(matches!(
            CtrlSignal::try_from(3),
            Err(ConsoleError::InvalidParameter(_))
        ));
    }

    #[test]
    fn signal_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CtrlSignal::CtrlC).unwrap(),
            "\"ctrl_c\""
        );
        assert_eq!(
            serde_json::to_string(&CtrlSignal::Shutdown).unwrap(),
            "\"shutdown\""
        );
    }

    #[tokio::test]
    async fn acknowledged_within_window() {
        let (sink, mut rx) = ControlSink::channel();
        tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(delivery.signal, CtrlSignal::Break);
            let _ = delivery.ack.send(());
        });

        let outcome = sink.deliver(CtrlSignal::Break, Duration::from_secs(1)).await;
        assert_eq!(outcome, DeliveryOutcome::Acknowledged);
    }

    #[tokio::test]
    async fn closed_sink_is_reported_not_propagated() {
        let (sink, rx) = ControlSink::channel();
        drop(rx);
        let outcome = sink.deliver(CtrlSignal::Close, Duration::from_secs(1)).await;
        assert_eq!(outcome, DeliveryOutcome::SinkClosed);
    }

    #[tokio::test]
    async fn silent_handler_times_out() {
        let (sink, mut rx) = ControlSink::channel();
        let hold = tokio::spawn(async move {
            // Take the delivery but never ack, keeping the oneshot alive.
            let delivery = rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(delivery);
        });

        let outcome = sink
            .deliver(CtrlSignal::CtrlC, Duration::from_millis(50))
            .await;
        assert_eq!(outcome, DeliveryOutcome::TimedOut);
        hold.abort();
    }

    #[tokio::test]
    async fn dropped_ack_is_distinguished_from_timeout() {
        let (sink, mut rx) = ControlSink::channel();
        tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            drop(delivery.ack);
        });

        let outcome = sink.deliver(CtrlSignal::Logoff, Duration::from_secs(1)).await;
        assert_eq!(outcome, DeliveryOutcome::AckDropped);
    }

    #[tokio::test]
    async fn zero_wait_still_dispatches() {
        let (sink, mut rx) = ControlSink::channel();
        let outcome = sink.deliver(CtrlSignal::Shutdown, Duration::ZERO).await;
        assert_eq!(outcome, DeliveryOutcome::TimedOut);

        let queued = rx.try_recv().expect("signal should be queued despite zero wait");
        assert_eq!(queued.signal, CtrlSignal::Shutdown);
    }
}
