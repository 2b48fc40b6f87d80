use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A background thread that runs a sweep at a fixed interval.
///
/// The sweep callback returns `false` once there is nothing left to sweep, which ends the thread.
/// Dropping or [stopping](Self::stop) the sweeper wakes the thread, lets an in-flight sweep
/// finish and joins it.
pub(super) struct Sweeper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn spawn<F>(name: &str, period: Duration, mut sweep: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("filecache-sweep-{name}"))
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !sweep() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::debug!("Cache sweeper stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Cache sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_sweeps_until_stopped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let sweeper = {
            let runs = Arc::clone(&runs);
            Sweeper::spawn("test", Duration::from_millis(10), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                true
            })
            .unwrap()
        };

        thread::sleep(Duration::from_millis(100));
        sweeper.stop();
        let after_stop = runs.load(Ordering::SeqCst);
        assert!(after_stop >= 2, "swept {after_stop} times");

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_sweep_ends_thread() {
        let runs = Arc::new(AtomicUsize::new(0));
        let sweeper = {
            let runs = Arc::clone(&runs);
            Sweeper::spawn("test", Duration::from_millis(5), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                false
            })
            .unwrap()
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        drop(sweeper);
    }
}
