//! Patcher identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatcherId(u64);

impl PatcherId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source. Share one per session; ids start at 1.
#[derive(Debug, Default)]
pub struct PatcherIdSequence {
    last: AtomicU64,
}

impl PatcherIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after ids already handed out, e.g. from a loaded session.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next_id(&self) -> PatcherId {
        PatcherId(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let ids = PatcherIdSequence::new();
        assert_eq!(ids.next_id().get(), 1);
        assert_eq!(ids.next_id().get(), 2);

        let resumed = PatcherIdSequence::starting_after(41);
        assert_eq!(resumed.next_id().to_string(), "42");
    }

    #[test]
    fn test_ids_unique_across_threads() {
        let ids = Arc::new(PatcherIdSequence::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..100).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
