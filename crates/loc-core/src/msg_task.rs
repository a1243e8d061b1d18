//! Central dispatch loop.
//!
//! One task owns all client/session mutation and runs posted messages
//! strictly in post order. Everyone else talks to it over a channel:
//! adapters post client commands, the engine API posts its downward
//! requests, AGPS posts timer expiries.
//!
//! Ownership:
//! - [`MsgTask`] is a cheap cloneable handle; every adapter and the
//!   engine API hold one.
//! - The worker exits once the last handle is dropped and the queue
//!   has drained.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A posted message. Runs once on the worker, then is dropped.
pub type LocMsg = Box<dyn FnOnce() + Send + 'static>;

type MsgTx = mpsc::UnboundedSender<LocMsg>;
type MsgRx = mpsc::UnboundedReceiver<LocMsg>;

/// Handle to the dispatch queue.
#[derive(Clone)]
pub struct MsgTask {
    name: Arc<str>,
    tx: MsgTx,
    runtime: Handle,
}

impl std::fmt::Debug for MsgTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgTask").field("name", &self.name).finish()
    }
}

impl MsgTask {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// Panics if called outside a runtime; use [`MsgTask::with_handle`]
    /// from plain threads.
    pub fn new(name: &str) -> Self {
        MsgTask::with_handle(name, Handle::current())
    }

    pub fn with_handle(name: &str, runtime: Handle) -> Self {
        let (tx, rx): (MsgTx, MsgRx) = mpsc::unbounded_channel();
        let name: Arc<str> = Arc::from(name);

        runtime.spawn(run_msg_loop(name.clone(), rx));

        MsgTask { name, tx, runtime }
    }

    /// Post a message. Fire-and-forget; `false` only if the worker is gone.
    pub fn send_msg<F>(&self, msg: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(msg)).is_err() {
            warn!("{}: msg loop closed, dropping message", self.name);
            return false;
        }
        true
    }

    /// Resolves once every message posted before this call has run.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.send_msg(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.await;
        }
    }

    /// Runtime the worker lives on; used to park waiters and timers.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

async fn run_msg_loop(name: Arc<str>, mut rx: MsgRx) {
    while let Some(msg) = rx.recv().await {
        msg();
    }

    debug!("{} msg loop shutting down (all handles dropped)", name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn runs_messages_in_post_order() {
        let task = MsgTask::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = seen.clone();
            assert!(task.send_msg(move || seen.lock().unwrap().push(i)));
        }
        task.drain().await;

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn messages_posted_from_messages_run_after() {
        let task = MsgTask::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let inner_task = task.clone();
        let inner_seen = seen.clone();
        task.send_msg(move || {
            inner_seen.lock().unwrap().push("outer");
            let again = inner_seen.clone();
            inner_task.send_msg(move || again.lock().unwrap().push("inner"));
        });
        let tail = seen.clone();
        task.send_msg(move || tail.lock().unwrap().push("tail"));

        task.drain().await;
        task.drain().await;
        assert_eq!(*seen.lock().unwrap(), vec!["outer", "tail", "inner"]);
    }

    #[test]
    fn posts_from_plain_threads() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let task = MsgTask::with_handle("threaded", rt.handle().clone());
        let (tx, rx) = std::sync::mpsc::channel();

        let poster = task.clone();
        std::thread::spawn(move || {
            poster.send_msg(move || tx.send(42).unwrap());
        })
        .join()
        .unwrap();

        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 42);
    }
}
