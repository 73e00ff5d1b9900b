//! Single-flight request manager.
//!
//! At most one request is in flight per manager. A new [`SingleFlight::request`]
//! that finds the worker busy throws the worker away and starts a fresh one,
//! which is the only way to stop a computation the engine is already running.
//! Futures of the discarded requests resolve to [`Error::Superseded`].

use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error};

use svdsteg_core::{Error, Result};
use svdsteg_engine::{Engine, EngineFactory, Tagged};

use crate::channel::WorkerChannel;

/// A reply that outlives the call that produced it.
pub type ResponseFuture<T> = BoxFuture<'static, Result<T>>;

pub struct SingleFlight<E: Engine> {
    name: &'static str,
    factory: EngineFactory<E>,
    channel: Mutex<Option<WorkerChannel<E>>>,
    generation: AtomicU64,
}

impl<E: Engine> SingleFlight<E> {
    /// The first worker is created lazily on the first request.
    pub fn new(name: &'static str, factory: EngineFactory<E>) -> Self {
        Self {
            name,
            factory,
            channel: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Send `request`, preempting whatever is still in flight.
    pub fn request(&self, request: E::Request) -> ResponseFuture<E::Response> {
        self.dispatch(request, true)
    }

    /// Send `request` behind whatever is already queued on the current
    /// worker. Used when the worker holds state later requests depend on.
    pub fn enqueue(&self, request: E::Request) -> ResponseFuture<E::Response> {
        self.dispatch(request, false)
    }

    /// Number of workers created so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Requests still awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.channel.lock().as_ref().map_or(0, |c| c.pending())
    }

    fn dispatch(&self, request: E::Request, preempt: bool) -> ResponseFuture<E::Response> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.channel.lock();
            if preempt && slot.as_ref().is_some_and(|c| c.pending() > 0) {
                if let Some(stale) = slot.take() {
                    debug!(
                        "{}: '{}' supersedes worker {}",
                        self.name,
                        request.tag(),
                        stale.id()
                    );
                    stale.discard();
                }
            }
            let channel = slot.get_or_insert_with(|| {
                let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                WorkerChannel::spawn(self.name, id, self.factory.clone())
            });
            channel.send(request, tx);
        }
        Box::pin(async move { rx.await.unwrap_or(Err(Error::ChannelClosed)) })
    }
}

/// Await a reply, logging how it failed. Supersession is expected traffic
/// and only logged at debug.
pub async fn settle<T>(name: &str, response: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    let result = response.await;
    match &result {
        Err(Error::Superseded) => debug!("{}: request superseded", name),
        Err(e) => error!("{}: request failed: {}", name, e),
        Ok(_) => {}
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use svdsteg_engine::{factory, CancelToken, EngineRequest};

    /// Sleeps for the requested number of milliseconds, then echoes it.
    struct Sleeper;

    #[derive(Debug, PartialEq)]
    struct Millis(u64);

    impl Tagged for Millis {
        fn tag(&self) -> &'static str {
            "MILLIS"
        }
    }

    impl EngineRequest for Millis {
        fn expected_response(&self) -> &'static str {
            "MILLIS"
        }
    }

    impl Engine for Sleeper {
        type Request = Millis;
        type Response = Millis;

        fn handle(&mut self, request: Millis, cancel: &CancelToken) -> Result<Millis> {
            for _ in 0..request.0 {
                cancel.check()?;
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(request)
        }
    }

    fn sleeper() -> SingleFlight<Sleeper> {
        SingleFlight::new("sleeper", factory(|| Ok(Sleeper)))
    }

    #[tokio::test]
    async fn test_idle_request_reuses_worker() {
        let flight = sleeper();
        assert_eq!(flight.generation(), 0);
        assert_eq!(flight.request(Millis(1)).await.unwrap(), Millis(1));
        assert_eq!(flight.request(Millis(2)).await.unwrap(), Millis(2));
        assert_eq!(flight.generation(), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_busy_request_replaces_worker() {
        let flight = sleeper();
        let slow = flight.request(Millis(5_000));
        let fast = flight.request(Millis(1));
        assert_eq!(flight.generation(), 2);

        let fast = tokio::time::timeout(Duration::from_secs(5), fast).await.unwrap();
        assert_eq!(fast.unwrap(), Millis(1));
        let slow = tokio::time::timeout(Duration::from_secs(1), slow).await.unwrap();
        assert!(slow.unwrap_err().is_superseded());
    }

    #[tokio::test]
    async fn test_enqueue_keeps_worker() {
        let flight = sleeper();
        let first = flight.request(Millis(20));
        let second = flight.enqueue(Millis(1));
        assert_eq!(flight.generation(), 1);
        assert_eq!(flight.in_flight(), 2);
        assert_eq!(first.await.unwrap(), Millis(20));
        assert_eq!(second.await.unwrap(), Millis(1));
    }

    #[tokio::test]
    async fn test_settle_passes_result_through() {
        let ok = settle("test", async { Ok::<_, Error>(3) }).await;
        assert_eq!(ok.unwrap(), 3);
        let err = settle("test", async { Err::<u8, _>(Error::Superseded) }).await;
        assert!(err.unwrap_err().is_superseded());
    }
}
