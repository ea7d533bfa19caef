//! Admission control
//!
//! The only state shared between sessions: a process-wide count of active
//! sessions bounded by a fixed capacity. A slot is taken by [`AdmissionController::admit`]
//! and handed out as a [`SessionPermit`]; dropping the permit gives the slot back,
//! so every admitted session releases exactly once no matter how it ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::debug;

/// Outcome of an admission check
#[derive(Debug)]
pub enum Admission {
    /// A slot was reserved; the permit must be moved into the new session
    Allowed(SessionPermit),
    /// At capacity; the caller must refuse the connection
    Rejected { capacity: usize },
}

/// Global registry of active sessions
#[derive(Debug)]
pub struct AdmissionController {
    active: AtomicUsize,
    capacity: usize,
    idle: Notify,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            capacity,
            idle: Notify::new(),
        })
    }

    /// Reserve a session slot without blocking
    pub fn admit(self: &Arc<Self>) -> Admission {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                return Admission::Rejected {
                    capacity: self.capacity,
                };
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    debug!(active = current + 1, capacity = self.capacity, "Session admitted");
                    return Admission::Allowed(SessionPermit {
                        controller: Some(self.clone()),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Number of admitted sessions that have not released their permit yet
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until no session holds a permit
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        debug!(active = previous - 1, "Session slot released");
        if previous == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Proof of admission, owned by exactly one session
#[derive(Debug)]
pub struct SessionPermit {
    controller: Option<Arc<AdmissionController>>,
}

impl SessionPermit {
    /// Give the slot back now instead of waiting for drop
    pub fn release(mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
    }
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
    }
}
