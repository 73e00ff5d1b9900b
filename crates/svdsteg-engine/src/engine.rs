//! Engine trait: the request/response contract every worker speaks.
//!
//! An engine lives inside exactly one worker context and is driven by one
//! request at a time. It shares nothing with the caller except the
//! [`CancelToken`] its worker trips when the worker is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use svdsteg_core::{Error, Result};

/// A message that carries a wire tag.
pub trait Tagged {
    fn tag(&self) -> &'static str;
}

/// A request also names the one response tag that may answer it.
pub trait EngineRequest: Tagged {
    fn expected_response(&self) -> &'static str;
}

/// A computation unit driven by a worker.
pub trait Engine: Send + 'static {
    type Request: EngineRequest + Send + 'static;
    type Response: Tagged + Send + 'static;

    /// Handle one request. Long computations should poll `cancel` and
    /// return [`Error::Cancelled`] once it trips.
    fn handle(&mut self, request: Self::Request, cancel: &CancelToken) -> Result<Self::Response>;
}

/// Builds an engine the first time a worker receives a request.
pub type EngineFactory<E> = Arc<dyn Fn() -> Result<E> + Send + Sync>;

/// Wrap a constructor closure as an [`EngineFactory`].
pub fn factory<E, F>(f: F) -> EngineFactory<E>
where
    F: Fn() -> Result<E> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Shared cancellation flag between a worker and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has tripped.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_factory_builds_fresh_engines() {
        let make = factory(|| Ok::<_, Error>(vec![1u8]));
        let mut a = make().unwrap();
        a.push(2);
        assert_eq!(make().unwrap(), vec![1u8]);
    }
}
