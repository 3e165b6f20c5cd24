//! Fixed capacity accounting for the shared tables
//!
//! Both shared tables are sized once at startup. Insertions reserve a slot
//! here before touching the map, so concurrent inserters past the limit all
//! fail independently instead of growing the table.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result, Table};

/// Slot counter guarding a fixed-capacity table
#[derive(Debug)]
pub(crate) struct CapacityGauge {
    table: Table,
    capacity: usize,
    used: AtomicUsize,
}

impl CapacityGauge {
    pub(crate) fn new(table: Table, capacity: usize) -> Self {
        Self {
            table,
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    /// Claim one slot, failing with `CapacityExceeded` when none is left
    pub(crate) fn reserve(&self) -> Result<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.capacity).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded {
                table: self.table,
                capacity: self.capacity,
            })
    }

    /// Give back `count` slots after physical removal
    pub(crate) fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let previous = self.used.fetch_sub(count, Ordering::AcqRel);
        debug_assert!(previous >= count, "released more slots than reserved");
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_until_full() {
        let gauge = CapacityGauge::new(Table::Accounts, 2);
        assert!(gauge.reserve().is_ok());
        assert!(gauge.reserve().is_ok());
        assert!(matches!(
            gauge.reserve(),
            Err(Error::CapacityExceeded {
                table: Table::Accounts,
                capacity: 2
            })
        ));
        assert_eq!(gauge.used(), 2);
    }

    #[test]
    fn test_release_frees_slots() {
        let gauge = CapacityGauge::new(Table::History, 1);
        gauge.reserve().unwrap();
        gauge.release(1);
        assert_eq!(gauge.used(), 0);
        assert!(gauge.reserve().is_ok());
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_capacity() {
        let gauge = CapacityGauge::new(Table::Accounts, 10);
        let granted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..5 {
                        if gauge.reserve().is_ok() {
                            granted.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::Relaxed), 10);
        assert_eq!(gauge.used(), 10);
    }
}
