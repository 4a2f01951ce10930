//! Dedicated callback thread
//!
//! User progress and completion callbacks run here, one at a time and in
//! submission order, never on executor threads or the report pump.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct CallbackQueue {
    tx: mpsc::Sender<Job>,
}

impl CallbackQueue {
    /// Spawn the callback thread. It runs until the queue is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<Job>();

        let spawned = thread::Builder::new()
            .name("dlkeeper-callbacks".to_string())
            .spawn(move || callback_loop(rx));
        if let Err(e) = spawned {
            // Jobs sent to a dead receiver are dropped; callers see no callbacks
            tracing::error!("Failed to spawn callback thread: {}", e);
        }

        Self { tx }
    }

    /// Queue a callback invocation
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!("Callback thread is gone, dropping callback");
        }
    }

    /// Block until every callback queued so far has run
    pub fn flush(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        self.dispatch(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

fn callback_loop(rx: mpsc::Receiver<Job>) {
    tracing::debug!("Starting callback loop");

    let mut count = 0u64;
    while let Ok(job) = rx.recv() {
        count += 1;
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("Download callback panicked");
        }
    }

    tracing::debug!("Callback loop shutting down (ran {} callbacks)", count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_run_in_order_on_one_thread() {
        let queue = CallbackQueue::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            queue.dispatch(move || {
                let name = thread::current().name().map(str::to_string);
                seen.lock().unwrap().push((i, name));
            });
        }
        queue.flush();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref() == Some("dlkeeper-callbacks")));
    }

    #[test]
    fn test_panicking_callback_does_not_stop_queue() {
        let queue = CallbackQueue::spawn();
        let ran = Arc::new(Mutex::new(false));

        queue.dispatch(|| panic!("boom"));
        let flag = ran.clone();
        queue.dispatch(move || *flag.lock().unwrap() = true);
        queue.flush();

        assert!(*ran.lock().unwrap());
    }
}
