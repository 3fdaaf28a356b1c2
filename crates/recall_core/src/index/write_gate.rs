//! Serializes "store commit, then index update" sequences.

use std::sync::{Arc, Mutex, MutexGuard};

/// Shared lock held by every writer of the due index.
///
/// Whoever mirrors store state into the index (service mutations, timer
/// reconciliation, timer re-indexing) holds the gate from the store access
/// until the index write, so the index never moves back to an older state.
#[derive(Debug, Clone, Default)]
pub struct WriteGate {
    inner: Arc<Mutex<()>>,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the gate is free. A poisoned gate is still usable:
    /// it guards no data of its own.
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::WriteGate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn clones_share_one_lock() {
        let gate = WriteGate::new();
        let other = gate.clone();
        let entered = Arc::new(AtomicBool::new(false));

        let held = gate.enter();
        let worker = {
            let entered = Arc::clone(&entered);
            std::thread::spawn(move || {
                let _guard = other.enter();
                entered.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!entered.load(Ordering::SeqCst));

        drop(held);
        worker.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }
}
