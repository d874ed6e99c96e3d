use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

type DestroyCallback = Box<dyn FnOnce() + Send>;

/// Counts owners of a device resource.
///
/// Starts at 1, which is the reference held by the resource handle itself.
/// Command list submissions add one for each resource they captured
/// and release it when the submission completes.
/// The destroy callback runs exactly once, on the transition to zero.
pub struct ResourceRefCount {
    count: AtomicUsize,
    destroy: Mutex<Option<DestroyCallback>>,
}

impl ResourceRefCount {
    pub fn new(destroy: impl FnOnce() + Send + 'static) -> Arc<Self> {
        Arc::new(ResourceRefCount {
            count: AtomicUsize::new(1),
            destroy: Mutex::new(Some(Box::new(destroy))),
        })
    }

    /// Current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn increment(&self) {
        let old = self.count.fetch_add(1, Ordering::AcqRel);
        debug_assert_ne!(old, 0, "Resource is revived after destruction");
    }

    pub fn decrement(&self) {
        let old = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(old, 0, "Resource ref count underflow");

        if old == 1 {
            let destroy = self.destroy.lock().take();
            if let Some(destroy) = destroy {
                destroy();
            }
        }
    }
}

impl fmt::Debug for ResourceRefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRefCount")
            .field("count", &self.count())
            .finish()
    }
}

/// Ref count captured by a recording.
/// Compared and hashed by identity so each resource is captured once.
#[derive(Clone, Debug)]
pub(crate) struct CapturedRef(pub Arc<ResourceRefCount>);

impl PartialEq for CapturedRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CapturedRef {}

impl Hash for CapturedRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(&*self.0, state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn destroys_on_last_decrement() {
        let destroyed = Arc::new(AtomicBool::new(false));
        let flag = destroyed.clone();
        let rc = ResourceRefCount::new(move || flag.store(true, Ordering::SeqCst));

        rc.increment();
        rc.decrement();
        assert!(!destroyed.load(Ordering::SeqCst));
        assert_eq!(rc.count(), 1);

        rc.decrement();
        assert!(destroyed.load(Ordering::SeqCst));
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn callback_runs_once_across_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let rc = ResourceRefCount::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..64 {
            rc.increment();
        }

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let rc = rc.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        rc.decrement();
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        rc.decrement();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn captured_refs_compare_by_identity() {
        let a = ResourceRefCount::new(|| {});
        let b = ResourceRefCount::new(|| {});

        let mut set = hashbrown::HashSet::new();
        assert!(set.insert(CapturedRef(a.clone())));
        assert!(!set.insert(CapturedRef(a.clone())));
        assert!(set.insert(CapturedRef(b.clone())));
        assert_eq!(set.len(), 2);
    }
}
