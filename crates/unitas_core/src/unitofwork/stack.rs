//! Caller-owned stack of nested sessions.

use super::factory::UnitOfWorkFactory;
use super::session::UnitOfWork;
use crate::error::CoreResult;
use crate::types::Usecase;

/// Stack of nested units of work for one logical execution context.
///
/// The top of the stack is the current session. Pushing pauses the session
/// below; popping resumes it.
#[derive(Debug, Default)]
pub struct UnitOfWorkStack {
    sessions: Vec<UnitOfWork>,
}

impl UnitOfWorkStack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `uow` current, pausing the previous current session.
    pub fn push(&mut self, uow: UnitOfWork) -> CoreResult<&UnitOfWork> {
        if let Some(top) = self.sessions.last() {
            if top.is_active() {
                top.pause()?;
            }
        }
        self.sessions.push(uow);
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    /// Opens a session from `factory` and makes it current.
    pub fn open(&mut self, factory: &UnitOfWorkFactory, usecase: Usecase) -> CoreResult<&UnitOfWork> {
        let uow = factory.new_unit_of_work_for(usecase)?;
        self.push(uow)
    }

    /// Returns the current session.
    #[must_use]
    pub fn current(&self) -> Option<&UnitOfWork> {
        self.sessions.last()
    }

    /// Removes the current session and resumes the one below it.
    pub fn pop(&mut self) -> CoreResult<Option<UnitOfWork>> {
        let popped = self.sessions.pop();
        if let Some(top) = self.sessions.last() {
            if top.is_paused() {
                top.resume()?;
            }
        }
        Ok(popped)
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
