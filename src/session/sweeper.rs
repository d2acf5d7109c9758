//! Background expiry sweep.
//!
//! Sessions go stale on their own schedule, not only when a request happens
//! to notice. The sweeper owns a thread that calls `check_token_expiry` on a
//! fixed interval until stopped.

use super::SessionStore;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ExpirySweeper {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn start(store: SessionStore, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if store.check_token_expiry() {
                        debug!("Expiry sweep cleared the session");
                    }
                }
                // Explicit stop, or the handle was dropped
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the sweep and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::storage::MemoryStorage;
    use crate::session::User;
    use std::time::Instant;

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn test_sweep_clears_expired_session() {
        let clock = ManualClock::new(0);
        let (store, _) = SessionStore::open(MemoryStorage::new(), clock.clone());
        store.set_auth("tok", 60, User::new("alice"));

        let sweeper = ExpirySweeper::start(store.clone(), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(30));
        assert!(store.is_authenticated());

        clock.advance_secs(61);
        assert!(wait_until(Duration::from_secs(2), || !store.is_authenticated()));
        sweeper.stop();
    }

    #[test]
    fn test_stop_halts_sweeping() {
        let clock = ManualClock::new(0);
        let (store, _) = SessionStore::open(MemoryStorage::new(), clock.clone());
        store.set_auth("tok", 60, User::new("alice"));

        let sweeper = ExpirySweeper::start(store.clone(), Duration::from_millis(10));
        sweeper.stop();

        clock.advance_secs(61);
        thread::sleep(Duration::from_millis(50));
        // Expired but nobody swept it
        assert!(store.is_token_expired());
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_drop_stops_thread() {
        let (store, _) = SessionStore::open(MemoryStorage::new(), ManualClock::new(0));
        let sweeper = ExpirySweeper::start(store, Duration::from_secs(3600));
        let start = Instant::now();
        drop(sweeper);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
