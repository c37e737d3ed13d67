//! Heap byte accounting for the garbage collector.
//!
//! Lox has exactly one VM and one heap per process (see the interpreter's
//! concurrency model: single-threaded, no shared allocator state across
//! strands of execution), so this is a plain counter rather than the
//! cross-thread slot registry a concurrent runtime would need.

/// `next_gc` grows by this factor after every collection, so the interval
/// between collections scales with how much the program is actually using.
pub const GC_HEAP_GROW_FACTOR: usize = 2;

/// A reasonable default before the first collection; small enough that the
/// collector gets exercised quickly, large enough that short scripts never
/// trigger it.
const DEFAULT_INITIAL_THRESHOLD: usize = 1024 * 1024;

#[derive(Debug)]
pub struct AllocStats {
    pub bytes_allocated: usize,
    pub next_gc: usize,
}

impl AllocStats {
    pub fn new(initial_threshold: usize) -> Self {
        AllocStats {
            bytes_allocated: 0,
            next_gc: initial_threshold,
        }
    }

    #[inline]
    pub fn record_alloc(&mut self, bytes: usize) {
        self.bytes_allocated += bytes;
    }

    #[inline]
    pub fn record_free(&mut self, bytes: usize) {
        self.bytes_allocated = self.bytes_allocated.saturating_sub(bytes);
    }

    /// Whether an allocation at this point should trigger a collection.
    /// `stress` models the `STRESS_GC` debug knob: collect on every allocation.
    #[inline]
    pub fn should_collect(&self, stress: bool) -> bool {
        stress || self.bytes_allocated >= self.next_gc
    }

    pub fn after_collect(&mut self) {
        self.next_gc = self.bytes_allocated * GC_HEAP_GROW_FACTOR;
    }
}

impl Default for AllocStats {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_once_threshold_reached() {
        let mut stats = AllocStats::new(100);
        stats.record_alloc(50);
        assert!(!stats.should_collect(false));
        stats.record_alloc(60);
        assert!(stats.should_collect(false));
    }

    #[test]
    fn stress_always_collects() {
        let stats = AllocStats::new(1_000_000);
        assert!(stats.should_collect(true));
    }

    #[test]
    fn threshold_grows_after_collect() {
        let mut stats = AllocStats::new(100);
        stats.record_alloc(150);
        stats.after_collect();
        assert_eq!(stats.next_gc, 300);
    }

    #[test]
    fn free_never_underflows() {
        let mut stats = AllocStats::default();
        stats.record_alloc(10);
        stats.record_free(100);
        assert_eq!(stats.bytes_allocated, 0);
    }
}
