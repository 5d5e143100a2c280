use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Counts {
    current: AtomicUsize,
    peak: AtomicUsize,
}

/// Counts live work items and remembers the highest count ever observed.
///
/// Cloning a gauge shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    counts: Arc<Counts>,
}
impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one live item. The item counts until the returned ticket is
    /// dropped.
    pub fn acquire(&self) -> Ticket {
        let now = self.counts.current.fetch_add(1, Ordering::AcqRel) + 1;
        self.counts.peak.fetch_max(now, Ordering::AcqRel);
        Ticket { counts: Arc::clone(&self.counts) }
    }

    pub fn current(&self) -> usize {
        self.counts.current.load(Ordering::Acquire)
    }

    pub fn peak(&self) -> usize {
        self.counts.peak.load(Ordering::Acquire)
    }
}

/// A live item registered with a [`Gauge`].
#[derive(Debug)]
pub struct Ticket {
    counts: Arc<Counts>,
}
impl Drop for Ticket {
    fn drop(&mut self) {
        self.counts.current.fetch_sub(1, Ordering::AcqRel);
    }
}
