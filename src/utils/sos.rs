use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Cloneable stop signal shared by the coordinator and every stage thread.
#[derive(Debug)]
pub struct SignalOfStop {
    // Shared state between clones
    shared: Arc<SharedState>,
}

#[derive(Debug)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop {
            shared: Arc::new(SharedState {
                closing: AtomicBool::new(false),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Raise the signal. Returns `true` for the call that raised it.
    pub fn cancel(&self) -> bool {
        let raised = !self.shared.closing.swap(true, Ordering::AcqRel);

        // Lock briefly so a waiter between its check and its wait cannot miss the wakeup
        let _guard = self.shared.mutex.lock();
        self.shared.condvar.notify_all();
        raised
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    pub fn wait_cancellation(&self) {
        let mut guard = self.shared.mutex.lock();
        while !self.cancelled() {
            self.shared.condvar.wait(&mut guard);
        }
    }

    /// Sleep for up to `timeout`, waking early on cancellation.
    ///
    /// Returns whether the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.shared.mutex.lock();
        if !self.cancelled() {
            self.shared
                .condvar
                .wait_while_for(&mut guard, |_| !self.cancelled(), timeout);
        }
        self.cancelled()
    }
}

impl Default for SignalOfStop {
    fn default() -> Self {
        Self::new()
    }
}

// Implementing the Clone trait
impl Clone for SignalOfStop {
    fn clone(&self) -> SignalOfStop {
        SignalOfStop {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let sos = SignalOfStop::new();
        let other = sos.clone();
        assert!(!other.cancelled());

        assert!(sos.cancel());
        assert!(!sos.cancel());
        assert!(other.cancelled());
    }

    #[test]
    fn test_wait_cancellation_wakes() {
        let sos = SignalOfStop::new();
        let waiter = {
            let sos = sos.clone();
            thread::spawn(move || sos.wait_cancellation())
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        sos.cancel();
        waiter.join().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let sos = SignalOfStop::new();
        let start = Instant::now();
        assert!(!sos.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        let waiter = {
            let sos = sos.clone();
            thread::spawn(move || sos.wait_timeout(Duration::from_secs(10)))
        };
        thread::sleep(Duration::from_millis(20));
        sos.cancel();
        assert!(waiter.join().unwrap());
    }
}
