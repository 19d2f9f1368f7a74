use crate::application::config::models::OverloadPolicy;
use crate::common::cancel::CancelToken;
use crate::common::constants::SUPERVISOR_POLL_INTERVAL_MS;
use crate::common::error::{GatewayError, Result};
use log::debug;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct AdmissionState {
    running: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
    peak_running: usize,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<AdmissionState>,
    released: Condvar,
    limit: usize,
    policy: OverloadPolicy,
    queue_depth: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        // The state stays consistent across a panicking holder.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Caps the number of concurrently running invocations.
///
/// Requests past the limit wait in a bounded FIFO queue or are turned
/// away, depending on the [`OverloadPolicy`].
#[derive(Debug, Clone)]
pub struct AdmissionControl {
    shared: Arc<Shared>,
}

impl AdmissionControl {
    pub fn new(limit: usize, policy: OverloadPolicy, queue_depth: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AdmissionState::default()),
                released: Condvar::new(),
                limit: limit.max(1),
                policy,
                queue_depth,
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    pub fn running(&self) -> usize {
        self.shared.lock().running
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Highest number of permits ever held at once.
    pub fn peak(&self) -> usize {
        self.shared.lock().peak_running
    }

    /// Take a slot, waiting in line if the policy allows it.
    ///
    /// Fails with `Overloaded` when rejected or the queue is full, and with
    /// `ClientDisconnect` when `cancel` trips while queued.
    pub fn acquire(&self, cancel: &CancelToken) -> Result<Permit> {
        let shared = &self.shared;
        let mut state = shared.lock();

        if state.running < shared.limit && state.queue.is_empty() {
            return Ok(self.grant(&mut state));
        }
        if shared.policy == OverloadPolicy::Reject || state.queue.len() >= shared.queue_depth {
            debug!(
                "rejecting request: {} running, {} queued",
                state.running,
                state.queue.len()
            );
            return Err(GatewayError::Overloaded);
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        debug!("request queued as ticket {} ({} waiting)", ticket, state.queue.len());

        let poll = Duration::from_millis(SUPERVISOR_POLL_INTERVAL_MS * 5);
        loop {
            if cancel.is_cancelled() {
                state.queue.retain(|&t| t != ticket);
                // Our departure may put someone else at the head.
                shared.released.notify_all();
                return Err(GatewayError::ClientDisconnect);
            }
            if state.running < shared.limit && state.queue.front() == Some(&ticket) {
                state.queue.pop_front();
                let permit = self.grant(&mut state);
                // The next in line may fit too.
                shared.released.notify_all();
                return Ok(permit);
            }
            state = shared
                .released
                .wait_timeout(state, poll)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn grant(&self, state: &mut AdmissionState) -> Permit {
        state.running += 1;
        state.peak_running = state.peak_running.max(state.running);
        Permit {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A running slot. Released on drop.
#[derive(Debug)]
pub struct Permit {
    shared: Arc<Shared>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.running = state.running.saturating_sub(1);
        drop(state);
        self.shared.released.notify_all();
    }
}
