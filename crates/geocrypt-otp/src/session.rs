//! One gate instance: an [`OtpMachine`] plus its countdown task
//!
//! The countdown ticks on a tokio interval and publishes the remaining
//! seconds on a watch channel. It is stopped on every terminal transition
//! and when the session is dropped, so no tick outlives the session.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use geocrypt_core::config::OtpConfig;
use geocrypt_core::types::{unix_now, FileId};
use geocrypt_core::GeocryptResult;

use crate::machine::{DeliveryState, OtpEvent, OtpMachine, OtpState};
use crate::DEFAULT_VALIDITY_SECS;

/// Validity window and countdown resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub validity: Duration,
    pub tick: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            validity: Duration::from_secs(DEFAULT_VALIDITY_SECS),
            tick: Duration::from_secs(1),
        }
    }
}

impl From<&OtpConfig> for SessionTiming {
    fn from(cfg: &OtpConfig) -> Self {
        Self {
            validity: Duration::from_secs(cfg.validity_secs),
            tick: Duration::from_millis(cfg.tick_millis),
        }
    }
}

pub struct OtpSession {
    file_id: FileId,
    /// Unix seconds at which the code was requested
    issued_at: u64,
    deadline: Instant,
    machine: Arc<Mutex<OtpMachine>>,
    remaining_rx: watch::Receiver<u64>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl OtpSession {
    /// Open the gate for `file_id` and start the countdown.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(file_id: FileId, timing: SessionTiming) -> Self {
        let mut machine = OtpMachine::new();
        // Idle → Requested cannot fail
        let _ = machine.apply(OtpEvent::Open);
        let machine = Arc::new(Mutex::new(machine));

        let deadline = Instant::now() + timing.validity;
        let (remaining_tx, remaining_rx) = watch::channel(ceil_secs(timing.validity));
        let cancel = CancellationToken::new();

        let ticker = tokio::spawn(run_countdown(
            file_id.clone(),
            deadline,
            timing.tick,
            Arc::clone(&machine),
            remaining_tx,
            cancel.clone(),
        ));

        info!(file_id = %file_id, validity_secs = timing.validity.as_secs(), "one-time code requested");

        Self {
            file_id,
            issued_at: unix_now(),
            deadline,
            machine,
            remaining_rx,
            cancel,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    pub fn file_id(&self) -> &FileId {
        &self.file_id
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn state(&self) -> OtpState {
        self.lock().state()
    }

    pub fn delivery(&self) -> DeliveryState {
        self.lock().delivery()
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Time left in the validity window
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Countdown in whole seconds, for rendering
    pub fn countdown(&self) -> watch::Receiver<u64> {
        self.remaining_rx.clone()
    }

    /// Whether the countdown task is still alive
    pub fn timer_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// The delivery service accepted the code request.
    pub fn mark_dispatched(&self) -> GeocryptResult<OtpState> {
        let state = self.lock().apply(OtpEvent::Dispatched)?;
        debug!(file_id = %self.file_id, %state, "one-time code dispatched");
        Ok(state)
    }

    /// The delivery service failed. Cancels the session and returns
    /// `DeliveryFailed` for the caller to propagate.
    pub fn mark_delivery_failed(&self, reason: &str) -> GeocryptResult<OtpState> {
        let result = self.lock().apply(OtpEvent::DispatchFailed(reason));
        self.stop_timer();
        result
    }

    /// Submit a candidate code.
    ///
    /// Only the shape is checked here; equality with the issued code is
    /// verified by the service that releases the ciphertext. On success the
    /// session is consumed and cannot be used again.
    pub fn confirm(&self, candidate: &str) -> GeocryptResult<()> {
        let result = {
            let mut machine = self.lock();
            // the tick may lag behind the clock; the deadline is authoritative
            if Instant::now() >= self.deadline {
                let _ = machine.apply(OtpEvent::Expire);
            }
            machine.apply(OtpEvent::Submit(candidate))
        };

        if self.state().is_terminal() {
            self.stop_timer();
        }

        let state = result?;
        info!(file_id = %self.file_id, %state, "one-time code accepted");
        Ok(())
    }

    /// Close the gate. No effect once the session is terminal.
    pub fn cancel(&self) {
        let state = self.lock().apply(OtpEvent::Close);
        self.stop_timer();
        if let Ok(state) = state {
            debug!(file_id = %self.file_id, %state, "one-time code session closed");
        }
    }

    fn stop_timer(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, OtpMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for OtpSession {
    fn drop(&mut self) {
        let _ = self.lock().apply(OtpEvent::Close);
        self.stop_timer();
    }
}

impl std::fmt::Debug for OtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpSession")
            .field("file_id", &self.file_id)
            .field("issued_at", &self.issued_at)
            .field("state", &self.state())
            .field("remaining", &self.remaining())
            .finish()
    }
}

async fn run_countdown(
    file_id: FileId,
    deadline: Instant,
    tick: Duration,
    machine: Arc<Mutex<OtpMachine>>,
    remaining_tx: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let _ = remaining_tx.send(ceil_secs(remaining));
                if remaining.is_zero() {
                    let mut m = machine.lock().unwrap_or_else(|e| e.into_inner());
                    if let Ok(OtpState::Expired) = m.apply(OtpEvent::Expire) {
                        info!(file_id = %file_id, "one-time code expired");
                    }
                    break;
                }
            }
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
