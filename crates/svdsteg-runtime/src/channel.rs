//! Worker channel: one background worker driving one engine.
//!
//! Requests go down an unbounded queue to a tokio task that runs each one on
//! the blocking pool. Replies are matched strictly FIFO against the handlers
//! registered by [`WorkerChannel::send`]. A channel is never drained on
//! teardown: [`WorkerChannel::discard`] trips the engine's cancel token,
//! aborts the worker task and fails every pending handler with
//! [`Error::Superseded`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use svdsteg_core::{Error, Result};
use svdsteg_engine::{CancelToken, Engine, EngineFactory, EngineRequest, Tagged};

pub type Reply<T> = oneshot::Sender<Result<T>>;

struct Pending<T> {
    expected: &'static str,
    reply: Reply<T>,
}

type PendingQueue<T> = Arc<Mutex<VecDeque<Pending<T>>>>;

pub struct WorkerChannel<E: Engine> {
    name: &'static str,
    id: u64,
    requests: mpsc::UnboundedSender<E::Request>,
    pending: PendingQueue<E::Response>,
    cancel: CancelToken,
    task: JoinHandle<()>,
}

impl<E: Engine> WorkerChannel<E> {
    /// Start a worker. The engine itself is built on the first request.
    pub fn spawn(name: &'static str, id: u64, factory: EngineFactory<E>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending: PendingQueue<E::Response> = Arc::new(Mutex::new(VecDeque::new()));
        let cancel = CancelToken::new();
        let task = tokio::spawn(run_worker(
            name,
            id,
            factory,
            rx,
            pending.clone(),
            cancel.clone(),
        ));
        debug!("{}: worker {} started", name, id);
        Self {
            name,
            id,
            requests: tx,
            pending,
            cancel,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Handlers still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue `request` and register `reply` as the next handler in line.
    pub fn send(&self, request: E::Request, reply: Reply<E::Response>) {
        let expected = request.expected_response();
        let tag = request.tag();
        let mut pending = self.pending.lock();
        pending.push_back(Pending { expected, reply });
        if self.requests.send(request).is_err() {
            warn!("{}: worker {} is gone, dropping '{}'", self.name, self.id, tag);
            if let Some(handler) = pending.pop_back() {
                let _ = handler.reply.send(Err(Error::ChannelClosed));
            }
        }
    }

    /// Tear the worker down without waiting for it.
    pub fn discard(self) {
        let stale: Vec<Pending<E::Response>> = self.pending.lock().drain(..).collect();
        debug!(
            "{}: discarding worker {} with {} pending",
            self.name,
            self.id,
            stale.len()
        );
        for handler in stale {
            let _ = handler.reply.send(Err(Error::Superseded));
        }
        // Drop trips the token and aborts the task.
    }
}

impl<E: Engine> Drop for WorkerChannel<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

async fn run_worker<E: Engine>(
    name: &'static str,
    id: u64,
    factory: EngineFactory<E>,
    mut rx: mpsc::UnboundedReceiver<E::Request>,
    pending: PendingQueue<E::Response>,
    cancel: CancelToken,
) {
    let mut engine: Option<E> = None;
    while let Some(request) = rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let slot = engine.take();
        let factory = factory.clone();
        let token = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let mut engine = match slot {
                Some(engine) => engine,
                None => match factory() {
                    Ok(engine) => engine,
                    Err(e) => return (None, Err(load_error(e))),
                },
            };
            let result = engine.handle(request, &token);
            (Some(engine), result)
        })
        .await;

        let result = match joined {
            Ok((slot, result)) => {
                engine = slot;
                result
            }
            Err(e) => Err(Error::Worker(format!("engine crashed: {}", e))),
        };
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = &result {
            error!("{}: worker {} failed: {}", name, id, e);
        }
        deliver(name, &pending, result);
    }
    debug!("{}: worker {} stopped", name, id);
}

fn load_error(e: Error) -> Error {
    match e {
        Error::EngineLoad(message) => Error::EngineLoad(message),
        other => Error::EngineLoad(other.to_string()),
    }
}

/// Hand `result` to the oldest handler, enforcing its expected tag.
fn deliver<T: Tagged>(name: &'static str, pending: &Mutex<VecDeque<Pending<T>>>, result: Result<T>) {
    let Some(handler) = pending.lock().pop_front() else {
        debug!("{}: reply with no handler waiting, dropped", name);
        return;
    };
    let outcome = match result {
        Ok(response) if response.tag() != handler.expected => {
            error!(
                "{}: protocol error, expected '{}' got '{}'",
                name,
                handler.expected,
                response.tag()
            );
            Err(Error::Protocol {
                expected: handler.expected,
                got: response.tag(),
            })
        }
        other => other,
    };
    let _ = handler.reply.send(outcome);
}

#[cfg(test)]
mod tests {
    use super::*;
    use svdsteg_engine::factory;

    /// Doubles numbers, fails on zero, echoes 7 back under the wrong tag.
    struct Doubler;

    #[derive(Debug)]
    struct Num(u32);

    impl Tagged for Num {
        fn tag(&self) -> &'static str {
            if self.0 % 2 == 0 {
                "EVEN"
            } else {
                "ODD"
            }
        }
    }

    impl EngineRequest for Num {
        fn expected_response(&self) -> &'static str {
            "EVEN"
        }
    }

    impl Engine for Doubler {
        type Request = Num;
        type Response = Num;

        fn handle(&mut self, request: Num, _cancel: &CancelToken) -> Result<Num> {
            if request.0 == 0 {
                return Err(Error::Worker("zero".into()));
            }
            if request.0 == 7 {
                return Ok(Num(7));
            }
            Ok(Num(request.0 * 2))
        }
    }

    fn ask(channel: &WorkerChannel<Doubler>, n: u32) -> oneshot::Receiver<Result<Num>> {
        let (tx, rx) = oneshot::channel();
        channel.send(Num(n), tx);
        rx
    }

    #[tokio::test]
    async fn test_replies_in_fifo_order() {
        let channel = WorkerChannel::spawn("test", 1, factory(|| Ok(Doubler)));
        let first = ask(&channel, 1);
        let second = ask(&channel, 2);
        assert_eq!(second.await.unwrap().unwrap().0, 4);
        assert_eq!(first.await.unwrap().unwrap().0, 2);
        assert_eq!(channel.pending(), 0);
    }

    #[tokio::test]
    async fn test_tag_mismatch_is_protocol_error() {
        let channel = WorkerChannel::spawn("test", 1, factory(|| Ok(Doubler)));
        let reply = ask(&channel, 7).await.unwrap();
        match reply {
            Err(Error::Protocol { expected, got }) => {
                assert_eq!(expected, "EVEN");
                assert_eq!(got, "ODD");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_engine_error_reaches_handler() {
        let channel = WorkerChannel::spawn("test", 1, factory(|| Ok(Doubler)));
        let reply = ask(&channel, 0).await.unwrap();
        assert!(matches!(reply, Err(Error::Worker(_))));
        // The engine survives its own errors.
        assert_eq!(ask(&channel, 3).await.unwrap().unwrap().0, 6);
    }

    #[tokio::test]
    async fn test_load_failure_is_engine_load_error() {
        let channel: WorkerChannel<Doubler> =
            WorkerChannel::spawn("test", 1, factory(|| Err(Error::Worker("no module".into()))));
        let reply = ask(&channel, 2).await.unwrap();
        match reply {
            Err(Error::EngineLoad(message)) => assert!(message.contains("no module")),
            other => panic!("expected load error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_discard_fails_pending_with_superseded() {
        let channel: WorkerChannel<Doubler> = WorkerChannel::spawn(
            "test",
            1,
            factory(|| {
                std::thread::sleep(std::time::Duration::from_millis(200));
                Ok(Doubler)
            }),
        );
        let reply = ask(&channel, 2);
        channel.discard();
        assert!(matches!(reply.await.unwrap(), Err(Error::Superseded)));
    }
}
