//! Delivery of driver completions onto the host context.
//!
//! Driver futures run on the I/O runtime. When one settles, its outcome is
//! posted as a one-shot message onto the [`HostContext`] queue, and the
//! user callback runs when the host drains that queue. Callbacks therefore
//! never run concurrently with each other or with other host work.
//!
//! ```rust,ignore
//! let mut context = HostContext::new();
//! let bridge = AsyncBridge::new(Handle::current(), context.handle());
//! bridge.deliver(async { Ok(42) }, |outcome| println!("{:?}", outcome));
//! context.turn().await;
//! ```

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{ClientResult, ExecutionError};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// The host's single cooperative execution context.
///
/// Whoever owns it decides when queued callbacks run, one at a time.
pub struct HostContext {
    sender: mpsc::UnboundedSender<Task>,
    receiver: mpsc::UnboundedReceiver<Task>,
}

/// Posts work onto a [`HostContext`].
#[derive(Clone)]
pub struct ContextHandle {
    sender: mpsc::UnboundedSender<Task>,
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            sender: self.sender.clone(),
        }
    }

    /// Wait for the next task and run it.
    pub async fn turn(&mut self) {
        // The context holds a sender itself, so the channel never closes here.
        if let Some(task) = self.receiver.recv().await {
            task();
        }
    }

    /// Run every task that is already queued. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Drain tasks while `future` is pending, then return its output.
    pub async fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        tokio::pin!(future);
        loop {
            tokio::select! {
                biased;
                output = &mut future => return output,
                Some(task) = self.receiver.recv() => task(),
            }
        }
    }

    /// Drain tasks until every [`ContextHandle`] is gone.
    pub async fn run(self) {
        let Self {
            sender,
            mut receiver,
        } = self;
        drop(sender);
        while let Some(task) = receiver.recv().await {
            task();
        }
    }
}

impl ContextHandle {
    /// Queue `task` on the context. Returns false if the context is gone.
    pub fn run_on_context(&self, task: impl FnOnce() + Send + 'static) -> bool {
        self.sender.send(Box::new(task)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Runs driver futures on the I/O runtime and delivers their outcome to the
/// host context.
#[derive(Clone)]
pub struct AsyncBridge {
    io: Handle,
    context: ContextHandle,
}

impl AsyncBridge {
    pub fn new(io: Handle, context: ContextHandle) -> Self {
        Self { io, context }
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }

    /// Run `future` to completion and hand its outcome to `callback` on the
    /// host context, exactly once.
    ///
    /// A driver task that panics or is aborted is reported as
    /// [`ExecutionError::Aborted`].
    pub fn deliver<T, F, C>(&self, future: F, callback: C)
    where
        T: Send + 'static,
        F: Future<Output = ClientResult<T>> + Send + 'static,
        C: FnOnce(ClientResult<T>) + Send + 'static,
    {
        let work = self.io.spawn(future);
        let context = self.context.clone();
        self.io.spawn(async move {
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ExecutionError::Aborted(e.to_string()).into()),
            };
            if !context.run_on_context(move || callback(outcome)) {
                tracing::warn!("host context closed, dropping query outcome");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tokio::sync::oneshot;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_delivers_success_on_context() {
        let mut context = HostContext::new();
        let bridge = AsyncBridge::new(Handle::current(), context.handle());
        let (tx, rx) = oneshot::channel();

        let host = thread::current().id();
        bridge.deliver(async { Ok(7) }, move |outcome: ClientResult<i32>| {
            let _ = tx.send((outcome.unwrap(), thread::current().id()));
        });

        let (value, ran_on) = context.run_until(rx).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(ran_on, host);
    }

    #[tokio::test]
    async fn test_delivers_failure() {
        let mut context = HostContext::new();
        let bridge = AsyncBridge::new(Handle::current(), context.handle());
        let (tx, rx) = oneshot::channel();

        bridge.deliver(
            async { Err::<(), _>(ClientError::Connection("refused".into())) },
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );

        let outcome = context.run_until(rx).await.unwrap();
        assert!(matches!(outcome, Err(ClientError::Connection(_))));
    }

    #[tokio::test]
    async fn test_panicking_driver_task_still_delivers() {
        let mut context = HostContext::new();
        let bridge = AsyncBridge::new(Handle::current(), context.handle());
        let (tx, rx) = oneshot::channel();

        bridge.deliver(
            async {
                if true {
                    panic!("driver bug");
                }
                Ok(())
            },
            move |outcome: ClientResult<()>| {
                let _ = tx.send(outcome);
            },
        );

        let outcome = context.run_until(rx).await.unwrap();
        assert!(matches!(
            outcome,
            Err(ClientError::Execution(ExecutionError::Aborted(_)))
        ));
    }

    #[tokio::test]
    async fn test_callbacks_wait_for_the_host() {
        let mut context = HostContext::new();
        let bridge = AsyncBridge::new(Handle::current(), context.handle());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let log = seen.clone();
        bridge.deliver(async { Ok(1) }, move |outcome: ClientResult<i32>| {
            log.lock().unwrap().push(outcome.unwrap());
            let _ = tx.send(());
        });

        // Nothing runs until the host drains its queue.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(seen.lock().unwrap().is_empty());

        context.run_until(rx).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_run_ends_when_handles_dropped() {
        let context = HostContext::new();
        let handle = context.handle();
        let count = Arc::new(Mutex::new(0));

        for _ in 0..3 {
            let count = count.clone();
            assert!(handle.run_on_context(move || *count.lock().unwrap() += 1));
        }
        drop(handle);

        context.run().await;
        assert_eq!(*count.lock().unwrap(), 3);
    }
}
