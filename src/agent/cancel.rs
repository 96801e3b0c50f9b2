use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Cancellation for one agent session.
///
/// Two scopes:
/// - [`cancel_step`](Self::cancel_step) interrupts only the tool that is
///   currently executing. The call is recorded as cancelled and the loop
///   carries on.
/// - [`cancel_session`](Self::cancel_session) ends the invocation with
///   [`AgentError::Cancelled`](crate::types::AgentError::Cancelled) at the next
///   suspension point. It is permanent for this handle.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    session: CancellationToken,
    step: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_session(&self) {
        self.session.cancel();
    }

    /// No-op when no tool is running.
    pub fn cancel_step(&self) {
        self.lock_step().cancel();
    }

    #[must_use]
    pub fn is_session_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    pub(crate) fn session_token(&self) -> &CancellationToken {
        &self.session
    }

    /// Install a fresh step token. It is a child of the session token, so
    /// cancelling the session also interrupts the step.
    pub(crate) fn begin_step(&self) -> CancellationToken {
        let token = self.session.child_token();
        *self.lock_step() = token.clone();
        token
    }

    fn lock_step(&self) -> MutexGuard<'_, CancellationToken> {
        self.step.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_step_only_hits_current_step() {
        let handle = CancelHandle::new();
        let first = handle.begin_step();
        handle.cancel_step();
        assert!(first.is_cancelled());

        let second = handle.begin_step();
        assert!(!second.is_cancelled());
        assert!(!handle.is_session_cancelled());
    }

    #[test]
    fn test_cancel_session_reaches_step() {
        let handle = CancelHandle::new();
        let step = handle.begin_step();
        handle.clone().cancel_session();
        assert!(step.is_cancelled());
        assert!(handle.is_session_cancelled());
        assert!(handle.begin_step().is_cancelled());
    }
}
