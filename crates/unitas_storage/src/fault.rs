//! Fault injection for rollback tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared switchboard controlling a [`FaultInjectingBackend`].
///
/// Cloned plans refer to the same switches, so a test can keep one clone and
/// arm it after the device has been handed to a store.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    inner: Arc<PlanState>,
}

#[derive(Debug, Default)]
struct PlanState {
    /// Appends still allowed before failing; `usize::MAX` means unlimited.
    appends_left: AtomicUsize,
    armed_appends: AtomicBool,
    fail_flush: AtomicBool,
}

impl FaultPlan {
    /// A plan with every fault disarmed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `count` more appends through, then fails every later one.
    pub fn fail_appends_after(&self, count: usize) {
        self.inner.appends_left.store(count, Ordering::SeqCst);
        self.inner.armed_appends.store(true, Ordering::SeqCst);
    }

    /// Makes every flush and sync fail.
    pub fn fail_flushes(&self) {
        self.inner.fail_flush.store(true, Ordering::SeqCst);
    }

    /// Disarms all faults.
    pub fn heal(&self) {
        self.inner.armed_appends.store(false, Ordering::SeqCst);
        self.inner.fail_flush.store(false, Ordering::SeqCst);
    }

    fn check_append(&self) -> StorageResult<()> {
        if !self.inner.armed_appends.load(Ordering::SeqCst) {
            return Ok(());
        }
        let allowed = self
            .inner
            .appends_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if allowed {
            Ok(())
        } else {
            Err(StorageError::Injected("append".into()))
        }
    }

    fn check_flush(&self, op: &str) -> StorageResult<()> {
        if self.inner.fail_flush.load(Ordering::SeqCst) {
            Err(StorageError::Injected(op.into()))
        } else {
            Ok(())
        }
    }
}

/// Wraps a device and fails operations according to a [`FaultPlan`].
///
/// Reads, size queries and truncation are never faulted, so the owner can
/// always roll a torn batch back.
#[derive(Debug)]
pub struct FaultInjectingBackend<B> {
    inner: B,
    plan: FaultPlan,
}

impl<B: StorageBackend> FaultInjectingBackend<B> {
    /// Wraps `inner`, controlled by `plan`.
    pub fn new(inner: B, plan: FaultPlan) -> Self {
        Self { inner, plan }
    }

    /// The wrapped device.
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

impl<B: StorageBackend> StorageBackend for FaultInjectingBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.plan.check_append()?;
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.plan.check_flush("flush")?;
        self.inner.flush()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.plan.check_flush("sync")?;
        self.inner.sync()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    #[test]
    fn disarmed_plan_passes_through() {
        let mut device = FaultInjectingBackend::new(InMemoryBackend::new(), FaultPlan::new());
        device.append(b"ok").unwrap();
        device.flush().unwrap();
        assert_eq!(device.inner().snapshot(), b"ok");
    }

    #[test]
    fn appends_fail_after_budget() {
        let plan = FaultPlan::new();
        let mut device = FaultInjectingBackend::new(InMemoryBackend::new(), plan.clone());
        plan.fail_appends_after(2);
        device.append(b"a").unwrap();
        device.append(b"b").unwrap();
        let err = device.append(b"c").unwrap_err();
        assert!(err.is_injected());
        assert_eq!(device.size().unwrap(), 2);

        plan.heal();
        device.append(b"c").unwrap();
        assert_eq!(device.size().unwrap(), 3);
    }

    #[test]
    fn flush_faults_leave_truncate_working() {
        let plan = FaultPlan::new();
        let mut device = FaultInjectingBackend::new(InMemoryBackend::new(), plan.clone());
        device.append(b"abcd").unwrap();
        plan.fail_flushes();
        assert!(device.flush().is_err());
        assert!(device.sync().is_err());
        device.truncate(1).unwrap();
        assert_eq!(device.size().unwrap(), 1);
    }
}
