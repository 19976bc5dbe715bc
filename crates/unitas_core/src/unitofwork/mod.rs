//! Caller-facing sessions.
//!
//! A [`UnitOfWork`] caches every state it touches, records writes in place and
//! hands the changed states to the store on [`UnitOfWork::complete`]. Sessions
//! are single-threaded: states are shared with entity views through
//! `Rc<RefCell<_>>`, which keeps the session `!Send`.

mod builder;
mod callback;
mod factory;
mod handle;
mod session;
mod stack;

pub use builder::EntityBuilder;
pub use callback::{UnitOfWorkCallback, UnitOfWorkStatus};
pub use factory::UnitOfWorkFactory;
pub use handle::{Entity, EntityHandle};
pub use session::UnitOfWork;
pub use stack::UnitOfWorkStack;

use crate::entity::EntityState;
use crate::error::{CoreError, CoreResult};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub(crate) type StateRef = Rc<RefCell<EntityState>>;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    Open,
    Paused,
    /// `complete` failed; only `discard` is accepted.
    Failed,
    Completed,
    Discarded,
}

/// Phase cell shared by a session and every view it hands out.
#[derive(Debug, Clone)]
pub(crate) struct SessionGuard(Rc<Cell<SessionPhase>>);

impl SessionGuard {
    pub(crate) fn new() -> Self {
        Self(Rc::new(Cell::new(SessionPhase::Open)))
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.0.get()
    }

    pub(crate) fn set(&self, phase: SessionPhase) {
        self.0.set(phase);
    }

    pub(crate) fn same_session(&self, other: &SessionGuard) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Fails unless the session accepts reads and writes.
    pub(crate) fn check_active(&self) -> CoreResult<()> {
        match self.phase() {
            SessionPhase::Open => Ok(()),
            SessionPhase::Paused => Err(CoreError::unit_of_work("unit of work is paused")),
            SessionPhase::Failed => Err(CoreError::unit_of_work(
                "unit of work failed to complete and must be discarded",
            )),
            SessionPhase::Completed => Err(CoreError::unit_of_work("unit of work is completed")),
            SessionPhase::Discarded => Err(CoreError::unit_of_work("unit of work is discarded")),
        }
    }

    /// Fails once the session has been completed or discarded.
    pub(crate) fn check_not_closed(&self) -> CoreResult<()> {
        match self.phase() {
            SessionPhase::Completed | SessionPhase::Discarded => self.check_active(),
            SessionPhase::Open | SessionPhase::Paused | SessionPhase::Failed => Ok(()),
        }
    }
}
