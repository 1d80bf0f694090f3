// Copyright 2026 Trawl Contributors
// SPDX-License-Identifier: Apache-2.0

//! Concurrency gate: caps simultaneously in-flight units of work.
//!
//! Admission is FIFO. A successful acquire hands back a [`SlotPermit`]
//! that must be released exactly once; release is idempotent and also
//! happens on drop, so no error path can leak a slot. Capacity is
//! reconfigurable at runtime by the adaptive throttle.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::scheduler::error::SchedulerError;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

struct GateState {
    capacity: usize,
    active: usize,
    closed: bool,
    next_waiter_id: u64,
    queue: VecDeque<Waiter>,
}

struct GateInner {
    state: Mutex<GateState>,
}

impl GateInner {
    /// Free one slot: hand it to the oldest live waiter, or decrement.
    ///
    /// When capacity was lowered below the active count, the slot is
    /// swallowed instead of handed off, shrinking toward the new cap.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        if state.active <= state.capacity {
            while let Some(waiter) = state.queue.pop_front() {
                if waiter.tx.send(()).is_ok() {
                    // Permit transferred; active count unchanged.
                    return;
                }
                // That waiter gave up (timeout or cancel); try the next.
            }
        }
        if state.active == 0 {
            warn!("slot released with no active slots; count clamped at zero");
            return;
        }
        state.active -= 1;
    }
}

/// Caps simultaneously in-flight units of work.
pub struct ConcurrencyGate {
    inner: Arc<GateInner>,
}

impl ConcurrencyGate {
    /// Create a gate with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    capacity: capacity.max(1),
                    active: 0,
                    closed: false,
                    next_waiter_id: 0,
                    queue: VecDeque::new(),
                }),
            }),
        }
    }

    /// Wait (FIFO) for a free slot.
    ///
    /// Fails immediately with [`SchedulerError::Closed`] after [`close`],
    /// with [`SchedulerError::SlotWaitTimeout`] once `max_wait` elapses,
    /// and with [`SchedulerError::Cancelled`] when `cancel` fires first.
    ///
    /// [`close`]: ConcurrencyGate::close
    pub async fn acquire(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<SlotPermit, SchedulerError> {
        let (waiter_id, mut rx) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if state.queue.is_empty() && state.active < state.capacity {
                state.active += 1;
                return Ok(SlotPermit::new(Arc::clone(&self.inner)));
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            state.queue.push_back(Waiter { id, tx });
            (id, rx)
        };

        let gave_up = tokio::select! {
            granted = tokio::time::timeout(max_wait, &mut rx) => match granted {
                Ok(Ok(())) => return Ok(SlotPermit::new(Arc::clone(&self.inner))),
                // Sender dropped: the gate was closed while we waited.
                Ok(Err(_)) => return Err(SchedulerError::Closed),
                Err(_) => SchedulerError::SlotWaitTimeout(max_wait.as_millis() as u64),
            },
            _ = cancel.cancelled() => SchedulerError::Cancelled,
        };

        self.abandon_waiter(waiter_id, &mut rx);
        Err(gave_up)
    }

    /// Remove a waiter that gave up. If a grant raced with the give-up,
    /// the permit is passed straight on so it cannot leak.
    fn abandon_waiter(&self, waiter_id: u64, rx: &mut oneshot::Receiver<()>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(pos) = state.queue.iter().position(|w| w.id == waiter_id) {
                state.queue.remove(pos);
                return;
            }
        }
        if rx.try_recv().is_ok() {
            debug!("slot granted concurrently with give-up; passing it on");
            self.inner.release_slot();
        }
    }

    /// Change the capacity (minimum 1). Freed headroom is granted to
    /// waiters in FIFO order; a lowered cap drains through releases.
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.inner.state.lock();
        state.capacity = capacity.max(1);
        while state.active < state.capacity {
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            state.active += 1;
            if waiter.tx.send(()).is_err() {
                state.active -= 1;
            }
        }
    }

    /// Shut the gate. Every queued waiter fails with `Closed`; slots
    /// already held stay valid until released.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        // Dropping the senders wakes every waiter with an error.
        state.queue.clear();
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Slots currently held.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Callers currently waiting for a slot.
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// One of N execution permits. Released exactly once: explicitly via
/// [`release`](SlotPermit::release), or on drop.
pub struct SlotPermit {
    gate: Arc<GateInner>,
    released: AtomicBool,
}

impl SlotPermit {
    fn new(gate: Arc<GateInner>) -> Self {
        Self {
            gate,
            released: AtomicBool::new(false),
        }
    }

    /// Free the slot. A second call is a logged no-op.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            debug!("duplicate slot release ignored");
            return;
        }
        self.gate.release_slot();
    }
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.gate.release_slot();
        }
    }
}
