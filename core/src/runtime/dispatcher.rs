use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// callback queue of one event loop.
///
/// a dispatcher serializes closures onto a single drain task: everything
/// posted runs to completion, in order, before the next job. timers and
/// deferred deletion ride the same queue so callbacks never observe a
/// half-torn-down object.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Job>,
    name: Arc<str>,
}

type Job = Box<dyn FnOnce() + Send>;

impl Dispatcher {
    /// spawn the drain task on the current tokio runtime
    pub fn spawn(name: &str) -> Dispatcher {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let loop_name: Arc<str> = name.into();
        let task_name = loop_name.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            tracing::debug!("dispatcher {} drained", task_name);
        });
        Dispatcher { tx, name: loop_name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// enqueue a closure; it runs after everything already queued
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(f)).is_err() {
            tracing::warn!("post to stopped dispatcher {}", self.name);
        }
    }

    /// keep an object alive until the current callback stack has unwound,
    /// then drop it on the loop
    pub fn defer_delete(&self, obj: Box<dyn Any + Send>) {
        self.post(move || drop(obj));
    }

    /// create a disabled timer firing `cb` on this dispatcher
    pub fn new_timer<F>(&self, cb: F) -> Timer
    where
        F: Fn() + Send + Sync + 'static,
    {
        Timer {
            inner: Arc::new(TimerInner {
                dispatcher: self.clone(),
                cb: Arc::new(cb),
                armed: Mutex::new(None),
            }),
        }
    }
}

struct TimerInner {
    dispatcher: Dispatcher,
    cb: Arc<dyn Fn() + Send + Sync>,
    armed: Mutex<Option<tokio::task::AbortHandle>>,
}

/// one-shot timer; re-enabling replaces the pending deadline
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    pub fn enable(&self, after: Duration) {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let cb = inner.cb.clone();
            *inner.armed.lock() = None;
            inner.dispatcher.post(move || cb());
        });
        let prev = self.inner.armed.lock().replace(handle.abort_handle());
        if let Some(prev) = prev {
            prev.abort();
        }
    }

    pub fn disable(&self) {
        if let Some(handle) = self.inner.armed.lock().take() {
            handle.abort();
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.armed.lock().is_some()
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.armed.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn posts_run_in_order() {
        let dispatcher = Dispatcher::spawn("test");
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let log = log.clone();
            dispatcher.post(move || log.lock().push(i));
        }
        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.post(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn timer_fires_once_after_the_deadline() {
        let dispatcher = Dispatcher::spawn("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = dispatcher.new_timer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.enable(Duration::from_millis(10));
        assert!(timer.enabled());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.enabled());
    }

    #[tokio::test]
    async fn disabled_timer_does_not_fire() {
        let dispatcher = Dispatcher::spawn("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = dispatcher.new_timer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.enable(Duration::from_millis(10));
        timer.disable();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rearming_replaces_the_deadline() {
        let dispatcher = Dispatcher::spawn("test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let timer = dispatcher.new_timer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.enable(Duration::from_millis(10));
        timer.enable(Duration::from_millis(40));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
