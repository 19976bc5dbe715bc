//! Completion callbacks.

use super::UnitOfWork;
use crate::error::CoreResult;

/// How a unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkStatus {
    /// Changes were committed.
    Completed,
    /// Changes were dropped.
    Discarded,
}

/// Hooks run around [`UnitOfWork::complete`] and [`UnitOfWork::discard`].
pub trait UnitOfWorkCallback {
    /// Runs before changes are handed to the store. An error aborts the
    /// completion and leaves the session open.
    fn before_completion(&self, _uow: &UnitOfWork) -> CoreResult<()> {
        Ok(())
    }

    /// Runs once the session has completed or been discarded.
    fn after_completion(&self, _status: UnitOfWorkStatus) {}
}
