//! Identifier and sequence-number types shared across the engine.
//!
//! `ObjectId` identifiers are process-wide and monotonically issued (never
//! reused). `ClassId` identifies a registered schema class. `Csn` is the
//! total commit order; `Lsn` is a position in the write-ahead log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide, monotonically increasing object identifier.
///
/// Never reused: once an id is allocated it is permanently retired, even
/// after the object it named is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// Monotonic allocator for `ObjectId`s.
///
/// Starts at the given value (normally 1, or one past the highest id
/// observed during WAL recovery) and never issues the same value twice.
#[derive(Debug)]
pub struct ObjectIdAllocator {
    next: AtomicU64,
}

impl ObjectIdAllocator {
    /// Create an allocator that will hand out `start` as its first id.
    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Allocate the next `ObjectId`.
    ///
    /// # Panics
    /// Panics on overflow of the underlying counter — exhausting a 64-bit
    /// id space is not a condition this engine attempts to recover from.
    pub fn allocate(&self) -> ObjectId {
        let id = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("ObjectId counter overflow");
        ObjectId(id)
    }

    /// The next id that will be handed out, without allocating it.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }
}

/// Identifies a registered schema [`crate::schema::Class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class:{}", self.0)
    }
}

/// Commit Sequence Number: the total-order stamp of a committed transaction.
///
/// CSN ordering is total and gap-free across committed transactions; a
/// transaction's allocated CSN that fails to reach durability is simply
/// never observed by any reader, not re-used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Csn(pub u64);

impl Csn {
    /// The CSN below which no committed transaction can ever exist.
    pub const ZERO: Csn = Csn(0);

    /// Largest representable CSN, used as a sentinel "never tombstoned" marker.
    pub const MAX: Csn = Csn(u64::MAX);
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "csn:{}", self.0)
    }
}

/// Monotonic allocator for commit sequence numbers.
#[derive(Debug)]
pub struct CsnAllocator {
    next: AtomicU64,
}

impl CsnAllocator {
    /// Create an allocator whose first allocation returns `start + 1`.
    pub fn starting_after(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Allocate and return the next CSN.
    pub fn allocate(&self) -> Csn {
        let v = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_add(1))
            .expect("CSN counter overflow");
        Csn(v + 1)
    }

    /// The highest CSN allocated so far (0 if none yet).
    pub fn current(&self) -> Csn {
        Csn(self.next.load(Ordering::SeqCst))
    }
}

/// Log Sequence Number: a position in the write-ahead log.
///
/// Ordered first by segment, then by byte offset within the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn {
    /// Segment file this position belongs to.
    pub segment: u64,
    /// Byte offset within the segment, including the segment header.
    pub offset: u64,
}

impl Lsn {
    /// The position at the very start of the first segment.
    pub const ZERO: Lsn = Lsn { segment: 1, offset: 0 };

    /// Construct an `Lsn`.
    pub fn new(segment: u64, offset: u64) -> Self {
        Self { segment, offset }
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn object_id_allocator_never_repeats() {
        let alloc = ObjectIdAllocator::starting_at(1);
        let a = alloc.allocate();
        let b = alloc.allocate();
        let c = alloc.allocate();
        assert_eq!(a, ObjectId(1));
        assert_eq!(b, ObjectId(2));
        assert_eq!(c, ObjectId(3));
    }

    #[test]
    fn csn_allocator_is_gap_free_under_sequential_use() {
        let alloc = CsnAllocator::starting_after(0);
        assert_eq!(alloc.allocate(), Csn(1));
        assert_eq!(alloc.allocate(), Csn(2));
        assert_eq!(alloc.current(), Csn(2));
    }

    #[test]
    fn csn_allocator_resumes_after_recovery_watermark() {
        let alloc = CsnAllocator::starting_after(41);
        assert_eq!(alloc.allocate(), Csn(42));
    }

    #[test]
    fn lsn_ordering_is_segment_major() {
        let a = Lsn::new(1, 500);
        let b = Lsn::new(2, 0);
        assert!(a < b);
    }

    proptest! {
        /// Across any number of single- or multi-threaded allocation rounds,
        /// the multiset of issued ids never contains a duplicate.
        #[test]
        fn object_ids_are_never_reused(thread_count in 1usize..8, per_thread in 1usize..64) {
            let alloc = std::sync::Arc::new(ObjectIdAllocator::starting_at(1));
            let handles: Vec<_> = (0..thread_count)
                .map(|_| {
                    let alloc = std::sync::Arc::clone(&alloc);
                    std::thread::spawn(move || {
                        (0..per_thread).map(|_| alloc.allocate()).collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut seen = std::collections::HashSet::new();
            for handle in handles {
                for id in handle.join().unwrap() {
                    prop_assert!(seen.insert(id), "id {:?} allocated more than once", id);
                }
            }
        }
    }
}
