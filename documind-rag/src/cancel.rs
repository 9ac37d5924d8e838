//! Cooperative cancellation for in-flight requests.
//!
//! A [`CancellationToken`] is handed to each query or ingestion. Provider
//! calls race against [`CancellationToken::cancelled`], so a cancelled
//! request stops waiting on external services at the next suspension point.
//! Child tokens are cancelled together with their parent, which is how
//! [`DocuMind::shutdown`](crate::DocuMind::shutdown) reaches every request.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use crate::error::{DocuMindError, Result, Stage};

#[derive(Debug)]
struct Inner {
    state: watch::Sender<bool>,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(cancelled: bool) -> Self {
        let (state, _) = watch::channel(cancelled);
        Self { state, children: Mutex::new(Vec::new()) }
    }

    fn cancel(&self) {
        self.state.send_replace(true);
        let children = match self.children.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cloneable cancellation signal shared between a request and its owner.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// Create a new token (not cancelled).
    pub fn new() -> Self {
        Self { inner: Arc::new(Inner::new(false)) }
    }

    /// Create a token that is cancelled when this one is, but can also be
    /// cancelled on its own without affecting the parent.
    pub fn child_token(&self) -> Self {
        let child = Self { inner: Arc::new(Inner::new(self.is_cancelled())) };
        self.attach(&child);
        child
    }

    /// Make `other` follow this token: cancelling `self` also cancels `other`.
    ///
    /// A token can follow several parents; it is cancelled by whichever
    /// fires first.
    pub fn attach(&self, other: &CancellationToken) {
        match self.inner.children.lock() {
            Ok(mut children) => {
                children.retain(|c| c.strong_count() > 0);
                children.push(Arc::downgrade(&other.inner));
            }
            Err(poisoned) => poisoned.into_inner().push(Arc::downgrade(&other.inner)),
        }
        // This token may have been cancelled between the check and the registration.
        if self.is_cancelled() {
            other.cancel();
        }
    }

    /// Request cancellation of this token and all of its children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Fail with [`DocuMindError::Cancelled`] if cancellation was requested.
    pub fn check(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() { Err(DocuMindError::Cancelled { stage }) } else { Ok(()) }
    }

    /// Drive `fut` to completion unless cancellation is requested first.
    pub async fn run<F, T>(&self, stage: Stage, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DocuMindError::Cancelled { stage }),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelling_parent_cancels_children() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();
        assert!(!grandchild.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_alone() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn child_of_cancelled_token_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel();
        assert!(parent.child_token().is_cancelled());
    }

    #[tokio::test]
    async fn attached_token_follows_every_parent() {
        let root = CancellationToken::new();
        let caller = CancellationToken::new();
        let scoped = caller.child_token();
        root.attach(&scoped);

        caller.cancel();
        assert!(scoped.is_cancelled());
        assert!(!root.is_cancelled());

        let scoped = CancellationToken::new().child_token();
        root.attach(&scoped);
        root.cancel();
        assert!(scoped.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_pending_work() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result =
            token.run(Stage::Retrieval, tokio::time::sleep(Duration::from_secs(3600))).await;
        assert!(matches!(result, Err(DocuMindError::Cancelled { stage: Stage::Retrieval })));
    }

    #[tokio::test]
    async fn run_returns_output_when_not_cancelled() {
        let token = CancellationToken::new();
        assert_eq!(token.run(Stage::Indexing, async { 7 }).await.unwrap(), 7);
        assert!(token.check(Stage::Indexing).is_ok());
    }
}
