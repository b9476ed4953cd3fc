//! Bounded worker pool for capture and restore jobs
//!
//! A fixed set of threads drains a bounded queue. Submitting never blocks: when
//! the queue is full the job is refused, which callers treat as backpressure.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use tracing::{error, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<SyncSender<(&'static str, Job)>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize, queue_len: usize) -> Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<(&'static str, Job)>(queue_len.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let receiver = Arc::clone(&receiver);
            let worker = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || worker_loop(&receiver))
                .context(format!("Failed to spawn worker thread {}", index))?;
            workers.push(worker);
        }

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue a job; `false` if the pool is saturated or shutting down
    pub fn submit<F>(&self, name: &'static str, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return false;
        };
        match sender.try_send((name, Box::new(job))) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(job = name, "Worker queue full, job rejected");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

fn worker_loop(receiver: &Mutex<Receiver<(&'static str, Job)>>) {
    loop {
        let next = receiver.lock().recv();
        match next {
            Ok((name, job)) => {
                trace!(job = name, "Running job");
                run_guarded(name, job);
            }
            Err(_) => return,
        }
    }
}

/// Run `f`, logging instead of unwinding if it panics. Returns `false` on panic.
pub fn run_guarded<F: FnOnce()>(name: &str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!(job = name, panic = %panic_message(payload.as_ref()), "Job panicked");
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_workers() {
        let pool = WorkerPool::new(2, 8).unwrap();
        let (tx, rx) = channel();
        for i in 0..4 {
            let tx = tx.clone();
            assert!(pool.submit("test", move || tx.send(i).unwrap()));
        }
        let mut results: Vec<i32> = (0..4).map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_full_queue_rejects() {
        let pool = WorkerPool::new(1, 1).unwrap();
        let (release_tx, release_rx) = channel::<()>();
        let (started_tx, started_rx) = channel::<()>();

        // Occupy the only worker
        assert!(pool.submit("blocker", move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        assert!(pool.submit("queued", || {}));
        assert!(!pool.submit("rejected", || {}));
        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1, 4).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        assert!(pool.submit("panics", || panic!("boom")));
        let counter = Arc::clone(&count);
        let (tx, rx) = channel();
        assert!(pool.submit("after", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        }));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_guarded_reports_panic() {
        assert!(run_guarded("ok", || {}));
        assert!(!run_guarded("bad", || panic!("bad job")));
    }
}
