//! Message id allocation

use std::sync::atomic::{AtomicI64, Ordering};

use super::GENERIC_ID;

/// Source of envelope ids
pub trait IdGenerator: Send + Sync {
    /// Return an id never handed out before by this generator
    fn next_id(&self) -> i64;
}

/// Monotonic counter safe to share between threads
#[derive(Debug)]
pub struct AtomicIdGenerator {
    next: AtomicI64,
}

impl AtomicIdGenerator {
    /// Counter starting at 1, right after the generic id
    pub const fn new() -> Self {
        Self::starting_at(GENERIC_ID + 1)
    }

    pub const fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for AtomicIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for AtomicIdGenerator {
    fn next_id(&self) -> i64 {
        // Skip the generic id should the counter ever wrap around.
        loop {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            if id != GENERIC_ID {
                return id;
            }
        }
    }
}

/// Process-wide id counter used by [`super::CommMessage::create_request`]
pub static GLOBAL_IDS: AtomicIdGenerator = AtomicIdGenerator::new();

/// Allocate an id from the process-wide counter
pub fn next_message_id() -> i64 {
    GLOBAL_IDS.next_id()
}

/// Handle on [`GLOBAL_IDS`] for places that take an `Arc<dyn IdGenerator>`
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalIdGenerator;

impl IdGenerator for GlobalIdGenerator {
    fn next_id(&self) -> i64 {
        GLOBAL_IDS.next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_after_generic_id() {
        let ids = AtomicIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn test_skips_generic_id() {
        let ids = AtomicIdGenerator::starting_at(-1);
        assert_eq!(ids.next_id(), -1);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let ids = Arc::new(AtomicIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
