//! Reply contexts
//!
//! Outcomes are never delivered on a worker lane. Each command carries the
//! `ReplyContext` its caller registered and the dispatcher posts the delivery
//! there:
//!
//! - `ReplySender`/`ReplyLoop`: a channel drained by a loop the caller owns,
//!   the equivalent of a UI thread's message loop
//! - `tokio::runtime::Handle`: delivery on the runtime's blocking pool

use tokio::sync::mpsc;
use tracing::warn;

/// A unit of work posted to a reply context.
pub type ReplyTask = Box<dyn FnOnce() + Send + 'static>;

/// Where a command's outcome is delivered.
pub trait ReplyContext: Send + Sync {
    fn post(&self, task: ReplyTask);
}

/// Posting side of a `ReplyLoop`.
#[derive(Clone)]
pub struct ReplySender {
    tx: mpsc::UnboundedSender<ReplyTask>,
}

/// Runs posted tasks in order on whichever task drives it.
pub struct ReplyLoop {
    rx: mpsc::UnboundedReceiver<ReplyTask>,
}

impl ReplyLoop {
    pub fn new() -> (ReplySender, ReplyLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ReplySender { tx }, ReplyLoop { rx })
    }

    /// Run the next posted task. Returns false once every sender is gone.
    pub async fn run_once(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until every sender is dropped.
    pub async fn run(mut self) {
        while self.run_once().await {}
    }
}

impl ReplyContext for ReplySender {
    fn post(&self, task: ReplyTask) {
        if self.tx.send(task).is_err() {
            warn!("reply loop closed, outcome dropped");
        }
    }
}

impl ReplyContext for tokio::runtime::Handle {
    fn post(&self, task: ReplyTask) {
        self.spawn_blocking(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loop_runs_tasks_in_order() {
        let (sender, mut reply_loop) = ReplyLoop::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            sender.post(Box::new(move || seen.lock().unwrap().push(i)));
        }
        drop(sender);

        while reply_loop.run_once().await {}
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn post_after_loop_dropped_does_not_panic() {
        let (sender, reply_loop) = ReplyLoop::new();
        drop(reply_loop);
        sender.post(Box::new(|| {}));
    }

    #[tokio::test]
    async fn runtime_handle_runs_off_the_caller() {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let c = counter.clone();
        tokio::runtime::Handle::current().post(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(());
        }));
        rx.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
