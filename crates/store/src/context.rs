//! Per-call deadline and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::document_store::StoreError;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Context threaded through every store call.
///
/// Stores call [`OpContext::check`] before doing work and, for long scans,
/// periodically while doing it. A store never blocks past the deadline on
/// its own account, but a backend that is itself blocked is outside its
/// control.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl OpContext {
    /// No deadline, never cancelled unless the token is.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the call was cancelled or its deadline has passed.
    pub fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled(operation.to_string()));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded(operation.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_context_always_passes() {
        assert!(OpContext::background().check("find").is_ok());
    }

    #[test]
    fn cancelled_token_fails_every_clone() {
        let token = CancelToken::new();
        let ctx = OpContext::background().with_cancel(token.clone());
        let other = ctx.clone();
        token.cancel();
        assert!(matches!(ctx.check("insert"), Err(StoreError::Cancelled(_))));
        assert!(matches!(other.check("insert"), Err(StoreError::Cancelled(_))));
    }

    #[test]
    fn past_deadline_fails() {
        let ctx = OpContext::background().with_deadline(Instant::now());
        assert!(matches!(ctx.check("find"), Err(StoreError::DeadlineExceeded(_))));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
