//! Restartable one-shot timers
//!
//! Each timer owns a thread that sleeps until its deadline. Starting a timer
//! replaces any pending firing rather than queuing another one.

use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use crate::dispatch::run_guarded;

enum TimerCommand {
    Schedule(Duration),
    Cancel,
    Shutdown,
}

pub struct RestartTimer {
    name: &'static str,
    tx: Sender<TimerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl RestartTimer {
    pub fn new<F>(name: &'static str, callback: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("timer-{name}"))
            .spawn(move || {
                let mut deadline: Option<Instant> = None;
                loop {
                    let received = match deadline {
                        Some(at) => {
                            let now = Instant::now();
                            if at <= now {
                                deadline = None;
                                trace!(timer = name, "Timer fired");
                                run_guarded(name, &callback);
                                continue;
                            }
                            match rx.recv_timeout(at - now) {
                                Ok(command) => Some(command),
                                Err(RecvTimeoutError::Timeout) => None,
                                Err(RecvTimeoutError::Disconnected) => return,
                            }
                        }
                        None => match rx.recv() {
                            Ok(command) => Some(command),
                            Err(_) => return,
                        },
                    };

                    match received {
                        Some(TimerCommand::Schedule(delay)) => deadline = Some(Instant::now() + delay),
                        Some(TimerCommand::Cancel) => deadline = None,
                        Some(TimerCommand::Shutdown) => return,
                        None => {}
                    }
                }
            })
            .context(format!("Failed to spawn timer thread '{}'", name))?;

        Ok(Self {
            name,
            tx,
            thread: Some(thread),
        })
    }

    /// (Re)arm the timer; a pending firing is replaced
    pub fn start(&self, delay: Duration) {
        if self.tx.send(TimerCommand::Schedule(delay)).is_err() {
            warn!(timer = self.name, "Timer thread gone, schedule dropped");
        }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(TimerCommand::Cancel);
    }
}

impl Drop for RestartTimer {
    fn drop(&mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            // The last owner may be dropped from inside the callback
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_timer() -> (RestartTimer, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = RestartTimer::new("test", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        (timer, count)
    }

    #[test]
    fn test_timer_fires_once() {
        let (timer, count) = counting_timer();
        timer.start(Duration::from_millis(20));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_replaces_pending_firing() {
        let (timer, count) = counting_timer();
        timer.start(Duration::from_millis(80));
        thread::sleep(Duration::from_millis(20));
        timer.start(Duration::from_millis(80));
        thread::sleep(Duration::from_millis(20));
        timer.start(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        thread::sleep(Duration::from_millis(300));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_prevents_firing() {
        let (timer, count) = counting_timer();
        timer.start(Duration::from_millis(50));
        timer.cancel();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_callback_keeps_timer_alive() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let timer = RestartTimer::new("panicky", move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first firing fails");
            }
        })
        .unwrap();

        timer.start(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        timer.start(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
