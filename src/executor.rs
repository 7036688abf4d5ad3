//! Single-threaded host executor.
//!
//! All document mutations funnel through one worker thread in FIFO order, the
//! same way a windowed host application marshals work onto its main thread.
//! Callers block on the returned handle with an explicit timeout instead of
//! relying on an ambient event loop.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::errors::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO, single-threaded task executor.
///
/// `submit` enqueues a closure for the worker thread and returns a
/// [`TaskHandle`] the caller can wait on. Jobs never run concurrently with
/// each other, which is what serializes mutating commands against the
/// document.
pub struct HostExecutor {
    tx: Sender<Job>,
    worker: Option<JoinHandle<()>>,
}

impl HostExecutor {
    /// Spawns the worker thread and returns the executor.
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name("graphbridge-host".to_string())
            .spawn(move || {
                // Exits when the sender side is dropped.
                while let Ok(job) = rx.recv() {
                    job();
                }
            })?;
        Ok(HostExecutor {
            tx,
            worker: Some(worker),
        })
    }

    /// Enqueues `f` on the worker thread, returning a handle to its result.
    ///
    /// If the executor has already shut down the handle resolves to a
    /// timeout on `wait`.
    pub fn submit<T, F>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            // The caller may have given up waiting; a dead receiver is fine.
            let _ = done_tx.send(f());
        });
        let _ = self.tx.send(job);
        TaskHandle { rx: done_rx }
    }
}

impl Drop for HostExecutor {
    fn drop(&mut self) {
        // Replacing the sender closes the channel, which ends the worker loop
        // after any queued jobs have run.
        let (tx, _) = mpsc::channel();
        self.tx = tx;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Handle to a job submitted to the [`HostExecutor`].
pub struct TaskHandle<T> {
    rx: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Blocks until the job completes or `timeout` elapses.
    ///
    /// On timeout the job is not cancelled; it may still complete on the
    /// worker thread after this returns.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => BridgeError::Timeout(timeout),
            RecvTimeoutError::Disconnected => {
                BridgeError::Handler("host executor dropped the task".to_string())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn submit_runs_job_and_returns_result() {
        let exec = HostExecutor::new().unwrap();
        let handle = exec.submit(|| 21 * 2);
        assert_eq!(handle.wait(Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn jobs_run_in_fifo_order() {
        let exec = HostExecutor::new().unwrap();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let log = Arc::clone(&log);
            handles.push(exec.submit(move || log.lock().unwrap().push(i)));
        }
        for handle in handles {
            handle.wait(Duration::from_secs(1)).unwrap();
        }
        assert_eq!(*log.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn wait_times_out_on_slow_job() {
        let exec = HostExecutor::new().unwrap();
        let handle = exec.submit(|| {
            std::thread::sleep(Duration::from_millis(300));
            1
        });
        let err = handle.wait(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));
    }

    #[test]
    fn timed_out_job_still_completes() {
        let exec = HostExecutor::new().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = exec.submit(move || {
            std::thread::sleep(Duration::from_millis(100));
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.wait(Duration::from_millis(10)).is_err());
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
