use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

struct Slot<T> {
    result: Mutex<Option<T>>,
    ready: Condvar,
}

/// At-most-once execution of keyed work under concurrent demand.
///
/// The first caller for a key becomes the leader and runs the closure; every
/// caller that arrives while the work is in flight blocks and receives a
/// clone of the leader's result. The in-flight entry is removed once the
/// leader finishes, so a later call for the same key runs fresh — completed
/// results are the caller's cache, not this map's.
pub(crate) struct Singleflight<T: Clone> {
    inflight: Mutex<HashMap<String, Arc<Slot<T>>>>,
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Singleflight<T> {
    pub(crate) fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn run(&self, key: &str, work: impl FnOnce() -> T) -> T {
        let slot = {
            let mut inflight = self.inflight.lock().expect("singleflight map poisoned");
            if let Some(existing) = inflight.get(key) {
                let slot = Arc::clone(existing);
                drop(inflight);
                return Self::wait(&slot);
            }
            let slot = Arc::new(Slot {
                result: Mutex::new(None),
                ready: Condvar::new(),
            });
            inflight.insert(key.to_string(), Arc::clone(&slot));
            slot
        };

        let value = work();

        {
            let mut result = slot.result.lock().expect("singleflight slot poisoned");
            *result = Some(value.clone());
        }
        slot.ready.notify_all();
        self.inflight
            .lock()
            .expect("singleflight map poisoned")
            .remove(key);
        value
    }

    fn wait(slot: &Slot<T>) -> T {
        let mut result = slot.result.lock().expect("singleflight slot poisoned");
        loop {
            if let Some(value) = result.as_ref() {
                return value.clone();
            }
            result = slot
                .ready
                .wait(result)
                .expect("singleflight slot poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Barrier;

    #[test]
    fn concurrent_callers_share_one_execution() {
        let flight = Arc::new(Singleflight::new());
        let calls = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                flight.run("bundle", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // Hold the flight open long enough for followers to join.
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    42u32
                })
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn entry_is_cleared_after_completion() {
        let flight = Singleflight::new();
        let first = flight.run("key", || 1u32);
        let second = flight.run("key", || 2u32);
        assert_eq!(first, 1);
        assert_eq!(second, 2, "a finished flight must not pin its result");
    }

    #[test]
    fn distinct_keys_do_not_serialize() {
        let flight = Singleflight::new();
        assert_eq!(flight.run("a", || 1u32), 1);
        assert_eq!(flight.run("b", || 2u32), 2);
    }
}
