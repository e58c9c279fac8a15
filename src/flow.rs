//! Output flow control for a session.
//!
//! Several independent reasons can hold output at once (a keyboard
//! freeze, a scrollbar drag, an in-progress selection); writers proceed
//! only when every reason is cleared. The release condition is created
//! lazily on the first pause and discarded by the unpause that clears
//! the last reason, so each pause cycle waits on a fresh condition and
//! a stale wake can never leak into the next cycle.

use bitflags::bitflags;
use tokio::sync::watch;

bitflags! {
    /// Independent reasons a session's output is held.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PauseFlags: u32 {
        const KEYBOARD = 0x1;
        const SCROLLBAR = 0x2;
        const SELECTION = 0x4;
    }
}

/// Pause state plus the condition writers wait on. Lives inside the
/// session state, so every method here runs under the session lock.
#[derive(Debug, Default)]
pub(crate) struct FlowGate {
    flags: PauseFlags,
    release: Option<watch::Sender<()>>,
}

impl FlowGate {
    pub(crate) fn flags(&self) -> PauseFlags {
        self.flags
    }

    pub(crate) fn is_paused(&self) -> bool {
        !self.flags.is_empty()
    }

    pub(crate) fn pause(&mut self, reasons: PauseFlags) {
        self.flags |= reasons;
        if self.release.is_none() {
            let (tx, _) = watch::channel(());
            self.release = Some(tx);
        }
    }

    /// Clears reasons; returns true when this call opened the gate and
    /// woke the waiters.
    pub(crate) fn unpause(&mut self, reasons: PauseFlags) -> bool {
        self.flags &= !reasons;
        if self.flags.is_empty() {
            if let Some(release) = self.release.take() {
                let _ = release.send(());
                return true;
            }
        }
        false
    }

    /// Subscription for a writer that found the gate closed; `None`
    /// means the gate is open. Recreates the condition if a paused gate
    /// lost it.
    pub(crate) fn subscribe(&mut self) -> Option<watch::Receiver<()>> {
        if self.flags.is_empty() {
            return None;
        }
        let release = self.release.get_or_insert_with(|| watch::channel(()).0);
        Some(release.subscribe())
    }

    /// Drops the condition without touching the flag word. Any waiter
    /// wakes with a closed-channel result and re-checks the flags.
    pub(crate) fn close(&mut self) {
        self.release = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    // Same loop the session runs for its writers: subscribe under the
    // lock, await outside it, re-check until the gate is open.
    async fn wait_open(gate: &Mutex<FlowGate>) {
        loop {
            let rx = gate.lock().subscribe();
            let Some(mut rx) = rx else { return };
            let _ = rx.changed().await;
        }
    }

    #[test]
    fn reasons_accumulate_and_clear_independently() {
        let mut gate = FlowGate::default();
        gate.pause(PauseFlags::KEYBOARD);
        gate.pause(PauseFlags::SELECTION);
        assert_eq!(gate.flags(), PauseFlags::KEYBOARD | PauseFlags::SELECTION);

        assert!(!gate.unpause(PauseFlags::KEYBOARD));
        assert!(gate.is_paused());

        assert!(gate.unpause(PauseFlags::SELECTION));
        assert!(!gate.is_paused());
        assert!(gate.subscribe().is_none());
    }

    #[test]
    fn unpause_of_unset_bits_is_harmless() {
        let mut gate = FlowGate::default();
        gate.pause(PauseFlags::SCROLLBAR);
        assert!(!gate.unpause(PauseFlags::KEYBOARD));
        assert!(gate.is_paused());
        assert!(gate.unpause(PauseFlags::SCROLLBAR | PauseFlags::KEYBOARD));
    }

    #[tokio::test]
    async fn waiter_blocks_until_every_reason_clears() {
        let gate = Arc::new(Mutex::new(FlowGate::default()));
        gate.lock().pause(PauseFlags::KEYBOARD);
        gate.lock().pause(PauseFlags::SELECTION);

        let done = Arc::new(AtomicBool::new(false));
        let waiter = {
            let gate = gate.clone();
            let done = done.clone();
            tokio::spawn(async move {
                wait_open(&gate).await;
                done.store(true, Ordering::SeqCst);
            })
        };

        sleep(Duration::from_millis(20)).await;
        assert!(!done.load(Ordering::SeqCst), "waiter ran while fully paused");

        gate.lock().unpause(PauseFlags::KEYBOARD);
        sleep(Duration::from_millis(20)).await;
        assert!(
            !done.load(Ordering::SeqCst),
            "waiter ran with a reason still set"
        );

        gate.lock().unpause(PauseFlags::SELECTION);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after the last unpause")
            .unwrap();
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn open_gate_is_a_no_wait() {
        let gate = Mutex::new(FlowGate::default());
        timeout(Duration::from_millis(100), wait_open(&gate))
            .await
            .expect("open gate must not block");
    }

    #[tokio::test]
    async fn dropped_condition_wakes_waiters_into_a_recheck() {
        let gate = Arc::new(Mutex::new(FlowGate::default()));
        gate.lock().pause(PauseFlags::KEYBOARD);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { wait_open(&gate).await })
        };
        sleep(Duration::from_millis(20)).await;

        // Losing the condition alone must not open the gate; clearing
        // the flags afterwards must.
        {
            let mut g = gate.lock();
            g.close();
            g.unpause(PauseFlags::KEYBOARD);
        }
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should observe the cleared flags")
            .unwrap();
    }

    #[tokio::test]
    async fn fresh_pause_cycle_uses_a_fresh_condition() {
        let gate = Arc::new(Mutex::new(FlowGate::default()));

        gate.lock().pause(PauseFlags::KEYBOARD);
        assert!(gate.lock().unpause(PauseFlags::KEYBOARD));

        // The release above must not satisfy a waiter of the next cycle.
        gate.lock().pause(PauseFlags::SCROLLBAR);
        let gate2 = gate.clone();
        let waiter = tokio::spawn(async move { wait_open(&gate2).await });
        sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "stale release leaked into new cycle");

        gate.lock().unpause(PauseFlags::SCROLLBAR);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake in its own cycle")
            .unwrap();
    }
}
