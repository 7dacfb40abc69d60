//! Fault injection for exercising client retry paths.

use crate::error::ServerError;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Scripted failures, consumed one call at a time.
#[derive(Debug, Default)]
pub struct FaultPlan {
    offline: AtomicBool,
    pushes: AtomicU32,
    pulls: AtomicU32,
    dispatches: AtomicU32,
    lost_acks: AtomicU32,
}

/// Takes one unit from a counter if it is non-zero.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FaultPlan {
    /// Creates a plan with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail until set back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns true while the server is unreachable.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Fails the next `count` push calls with a 5xx.
    pub fn fail_pushes(&self, count: u32) {
        self.pushes.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` pull calls with a 5xx.
    pub fn fail_pulls(&self, count: u32) {
        self.pulls.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` dispatches before they take effect.
    pub fn fail_dispatches(&self, count: u32) {
        self.dispatches.store(count, Ordering::SeqCst);
    }

    /// Applies the next `count` dispatches but loses the response.
    pub fn drop_dispatch_acks(&self, count: u32) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    pub(crate) fn check_online(&self) -> Result<(), ServerError> {
        if self.is_offline() {
            Err(ServerError::Unavailable("no route to host".into()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn push_fault(&self) -> Option<ServerError> {
        take(&self.pushes).then(|| ServerError::Internal("push handler failed".into()))
    }

    pub(crate) fn pull_fault(&self) -> Option<ServerError> {
        take(&self.pulls).then(|| ServerError::Internal("pull handler failed".into()))
    }

    pub(crate) fn dispatch_fault(&self) -> Option<ServerError> {
        take(&self.dispatches).then(|| ServerError::Unavailable("connection reset".into()))
    }

    pub(crate) fn lose_ack(&self) -> bool {
        take(&self.lost_acks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counted_faults_run_out() {
        let plan = FaultPlan::new();
        plan.fail_pushes(2);

        assert!(plan.push_fault().is_some());
        assert!(plan.push_fault().is_some());
        assert!(plan.push_fault().is_none());
        assert!(plan.pull_fault().is_none());
    }

    #[test]
    fn offline_blocks_everything() {
        let plan = FaultPlan::new();
        assert!(plan.check_online().is_ok());
        plan.set_offline(true);
        assert_eq!(
            plan.check_online(),
            Err(ServerError::Unavailable("no route to host".into()))
        );
    }
}
