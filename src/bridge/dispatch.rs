//! Per-device command dispatch with cancellable signal repetitions.
//!
//! RF links are lossy, so a command may be transmitted several times. The first
//! transmission happens inline; the rest run in a background task that checks a shared
//! cancel flag before every send. Any newer command for the same device, local or
//! remote, cancels the previous repeats before doing anything else.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, warn};

use super::connection::ConnectionContext;
use crate::error::SendError;
use crate::metrics;

/// Remaining repeats of one command, cancelled through a shared flag.
#[derive(Debug)]
pub struct PendingRepetition {
    payload: String,
    cancelled: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
}

impl PendingRepetition {
    fn new(payload: &str, remaining: u32) -> Self {
        Self {
            payload: payload.to_string(),
            cancelled: Arc::new(AtomicBool::new(false)),
            remaining: Arc::new(AtomicU32::new(remaining)),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns true if repeats were still outstanding.
    fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst) && self.remaining() > 0
    }
}

pub struct CommandDispatcher {
    device_id: String,
    signal_repetitions: u32,
    context: ConnectionContext,
    pending: Mutex<Option<PendingRepetition>>,
    /// Bumped by every send and cancel. A first transmission only schedules repeats
    /// if nothing newer happened while it was in flight.
    epoch: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(
        device_id: impl Into<String>,
        signal_repetitions: u32,
        context: ConnectionContext,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            signal_repetitions: signal_repetitions.max(1),
            context,
            pending: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn signal_repetitions(&self) -> u32 {
        self.signal_repetitions
    }

    /// Repeats still queued for the last command, if any.
    pub fn pending_repeats(&self) -> u32 {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|p| !p.is_cancelled())
            .map_or(0, PendingRepetition::remaining)
    }

    /// Cancel queued repeats of the previous command. A transmission already started
    /// is not interrupted.
    pub fn cancel_pending(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            if previous.cancel() {
                metrics::inc_repetitions_cancelled();
                debug!(
                    "cancelled {} queued repeats of {:?} for {}",
                    previous.remaining(),
                    previous.payload(),
                    self.device_id
                );
            }
        }
    }

    /// Send `payload`, then queue `signal_repetitions - 1` repeats.
    ///
    /// Only the first transmission's outcome is returned; repeat failures are logged
    /// and end the remaining repeats.
    pub async fn send(&self, payload: &str) -> Result<(), SendError> {
        self.cancel_pending();
        let epoch = self.epoch.load(Ordering::SeqCst);

        transmit(&self.context, &self.device_id, payload).await?;

        if self.signal_repetitions > 1 {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if self.epoch.load(Ordering::SeqCst) != epoch {
                debug!(
                    "{} superseded before repeats of {:?} were queued",
                    self.device_id, payload
                );
                return Ok(());
            }
            let repetition = PendingRepetition::new(payload, self.signal_repetitions - 1);
            tokio::spawn(repeat(
                self.context.clone(),
                self.device_id.clone(),
                payload.to_string(),
                repetition.cancelled.clone(),
                repetition.remaining.clone(),
            ));
            *pending = Some(repetition);
        }
        Ok(())
    }
}

async fn repeat(
    context: ConnectionContext,
    device_id: String,
    payload: String,
    cancelled: Arc<AtomicBool>,
    remaining: Arc<AtomicU32>,
) {
    while remaining.load(Ordering::SeqCst) > 0 {
        if !context.wait_for_ack() {
            // Fire-and-forget sends return at once; give newer commands a chance to
            // cancel between repeats.
            tokio::task::yield_now().await;
        }
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = transmit(&context, &device_id, &payload).await {
            warn!(
                "repeat of {:?} for {} failed, dropping the rest: {}",
                payload, device_id, e
            );
            remaining.store(0, Ordering::SeqCst);
            return;
        }
        remaining.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One transmission under the process-wide ack policy.
pub async fn transmit(
    context: &ConnectionContext,
    device_id: &str,
    payload: &str,
) -> Result<(), SendError> {
    let Some(conn) = context.current() else {
        metrics::inc_transmissions_failed();
        return Err(SendError::NotConnected);
    };
    debug!("sending command: {} to device: {}", payload, device_id);
    let result = if context.wait_for_ack() {
        conn.send_command_ack(device_id, payload).await
    } else {
        conn.send_command(device_id, payload)
    };
    match result {
        Ok(()) => {
            metrics::inc_transmissions();
            Ok(())
        }
        Err(e) => {
            metrics::inc_transmissions_failed();
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_without_connection_fails_fast() {
        let ctx = ConnectionContext::new(true);
        let d = CommandDispatcher::new("newkaku_1_1", 3, ctx);
        assert!(matches!(d.send("on").await, Err(SendError::NotConnected)));
        assert_eq!(d.pending_repeats(), 0);
    }

    #[test]
    fn zero_repetitions_means_one() {
        let d = CommandDispatcher::new("x_1", 0, ConnectionContext::new(false));
        assert_eq!(d.signal_repetitions(), 1);
    }

    #[test]
    fn cancel_marks_pending_and_is_idempotent() {
        let p = PendingRepetition::new("on", 2);
        assert!(p.cancel());
        assert!(p.is_cancelled());
        assert!(!p.cancel());
    }
}
