//! Write permit: at most one write transaction per environment
//!
//! The gate records its holder's thread under a mutex, with a condvar for
//! hand-off. A [`WritePermit`] is the only proof the environment accepts
//! before it opens a write transaction, and only `Writer` can acquire one.
//!
//! The gate is not re-entrant. A thread that already holds it is refused
//! instead of waiting on itself forever.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub(crate) struct WriteGate {
    holder: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl WriteGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until the gate is free, then takes it.
    ///
    /// Returns `None` at once if the calling thread already holds the gate.
    pub(crate) fn acquire(self: &Arc<Self>) -> Option<WritePermit> {
        let current = thread::current().id();
        let mut holder = self.holder.lock();
        while let Some(id) = *holder {
            if id == current {
                return None;
            }
            self.released.wait(&mut holder);
        }
        *holder = Some(current);
        Some(WritePermit {
            gate: Arc::clone(self),
        })
    }

    /// Takes the gate if it is free.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<WritePermit> {
        let mut holder = self.holder.lock();
        if holder.is_some() {
            return None;
        }
        *holder = Some(thread::current().id());
        Some(WritePermit {
            gate: Arc::clone(self),
        })
    }

    pub(crate) fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }
}

/// Exclusive right to write to one environment; released on drop.
#[derive(Debug)]
pub(crate) struct WritePermit {
    gate: Arc<WriteGate>,
}

impl WritePermit {
    pub(crate) fn belongs_to(&self, gate: &Arc<WriteGate>) -> bool {
        Arc::ptr_eq(&self.gate, gate)
    }
}

impl Drop for WritePermit {
    fn drop(&mut self) {
        *self.gate.holder.lock() = None;
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_try_acquire_fails_while_held() {
        let gate = Arc::new(WriteGate::new());
        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_held());
        assert!(gate.try_acquire().is_none());

        drop(permit);
        assert!(!gate.is_held());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let gate = Arc::new(WriteGate::new());
        let permit = gate.acquire().unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            let _permit = other.acquire().unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(permit);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_permit_belongs_to_its_gate() {
        let a = Arc::new(WriteGate::new());
        let b = Arc::new(WriteGate::new());
        let permit = a.acquire().unwrap();
        assert!(permit.belongs_to(&a));
        assert!(!permit.belongs_to(&b));
    }

    #[test]
    fn test_holder_thread_is_refused_instead_of_waiting() {
        let gate = Arc::new(WriteGate::new());
        let permit = gate.acquire().unwrap();

        // Returns at once rather than waiting for a release that never comes
        assert!(gate.acquire().is_none());
        assert!(gate.is_held());

        drop(permit);
        assert!(gate.acquire().is_some());
    }
}
