//! Run cancellation by generation counter.
//!
//! Every run captures the current generation when it starts. A session
//! reset bumps the generation; any in-flight call of an older run is
//! abandoned, and a result that arrives for a stale generation is
//! discarded instead of composited.

use std::sync::Arc;

use tokio::sync::watch;

use crate::types::PipelineError;

/// Owner side: starts runs and cancels them.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Create a handle at generation 0.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// The current generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }

    /// A token bound to the current generation.
    #[must_use]
    pub fn token(&self) -> RunToken {
        let rx = self.tx.subscribe();
        let generation = *rx.borrow();
        RunToken { rx, generation }
    }

    /// Invalidate every token issued so far.
    pub fn cancel(&self) {
        self.tx.send_modify(|g| *g = g.wrapping_add(1));
        log::debug!("cancelled runs up to generation {}", self.generation());
    }
}

/// Run side: checks whether its run is still current.
#[derive(Debug, Clone)]
pub struct RunToken {
    rx: watch::Receiver<u64>,
    generation: u64,
}

impl RunToken {
    /// The generation this token was issued for.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() != self.generation
    }

    /// Check before writing any result.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if the run is stale.
    pub fn ensure_current(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the run is cancelled. Never resolves if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() != self.generation {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn fresh_token_is_current() {
        let handle = CancelHandle::new();
        let token = handle.token();
        assert!(!token.is_cancelled());
        assert!(token.ensure_current().is_ok());
    }

    #[test]
    fn cancel_invalidates_old_tokens_only() {
        let handle = CancelHandle::new();
        let old = handle.token();
        handle.cancel();
        let new = handle.token();
        assert!(old.is_cancelled());
        assert!(matches!(old.ensure_current(), Err(PipelineError::Cancelled)));
        assert!(!new.is_cancelled());
        assert_eq!(new.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_resolves_after_cancel() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        let canceller = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });
        tokio::time::timeout(Duration::from_secs(10), token.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_pends_while_current() {
        let handle = CancelHandle::new();
        let mut token = handle.token();
        let result = tokio::time::timeout(Duration::from_secs(1), token.cancelled()).await;
        assert!(result.is_err());
    }
}
