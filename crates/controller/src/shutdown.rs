//! # Shutdown Coordination
//!
//! Stops admitting reconcile passes once shutdown starts, then waits (bounded)
//! for the passes already in flight. Passes are never interrupted: when the
//! bound elapses the coordinator only reports what is still running.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// How a shutdown request finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Timeout below one second; in-flight passes were not awaited
    Immediate,
    /// Every in-flight pass finished
    Drained,
    /// The timeout elapsed first; in-flight passes were left running
    TimedOut,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    shutting_down: AtomicBool,
    active: AtomicUsize,
    idle: Notify,
    timeout: Duration,
}

/// Keeps a pass counted as in flight until dropped
#[derive(Debug)]
pub struct WorkGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        if self.coordinator.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.coordinator.idle.notify_waiters();
        }
    }
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            shutting_down: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            timeout,
        })
    }

    /// Admits a new pass, or returns `None` once shutdown has started
    pub fn admit(self: &Arc<Self>) -> Option<WorkGuard> {
        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = WorkGuard {
            coordinator: Arc::clone(self),
        };
        if self.shutting_down.load(Ordering::SeqCst) {
            drop(guard);
            return None;
        }
        Some(guard)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Flags shutdown and waits for in-flight passes, bounded by the timeout
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!(
            active = self.active(),
            timeout_secs = self.timeout.as_secs(),
            "Shutdown requested, no new reconciliations will start"
        );

        if self.timeout < Duration::from_secs(1) {
            return ShutdownOutcome::Immediate;
        }

        match tokio::time::timeout(self.timeout, self.wait_idle()).await {
            Ok(()) => {
                info!("All in-flight reconciliations finished");
                ShutdownOutcome::Drained
            }
            Err(_) => {
                warn!(
                    active = self.active(),
                    "Shutdown timeout elapsed with reconciliations still in flight"
                );
                ShutdownOutcome::TimedOut
            }
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}
