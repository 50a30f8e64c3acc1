// LWLock - Lightweight table locks
// Read-write lock that busy-waits a configurable number of attempts before
// parking the thread. The spin level never changes what the lock protects,
// only how contention is waited out.

use crate::config::SpinCount;
use parking_lot::{RwLock as ParkingLotRwLock, RwLockReadGuard, RwLockWriteGuard};

/// A trait that defines a unified interface for read-write locks
pub trait RwLockInterface<T> {
    /// The guard type for read locks
    type ReadGuard<'a>
    where
        Self: 'a,
        T: 'a;

    /// The guard type for write locks
    type WriteGuard<'a>
    where
        Self: 'a,
        T: 'a;

    /// Creates a new read-write lock with the given initial value
    fn new(data: T) -> Self;

    /// Acquires a read lock
    fn read(&self) -> Self::ReadGuard<'_>;

    /// Acquires a write lock
    fn write(&self) -> Self::WriteGuard<'_>;
}

/// Table lock: parking_lot RwLock with spin-then-park acquisition
pub struct TableLock<T> {
    inner: ParkingLotRwLock<T>,
    spin_iterations: u32,
}

impl<T> TableLock<T> {
    /// Creates a lock using the default spin level
    pub fn new(data: T) -> Self {
        Self::with_spin(data, SpinCount::default())
    }

    /// Creates a lock with an explicit spin level
    pub fn with_spin(data: T, spin: SpinCount) -> Self {
        TableLock {
            inner: ParkingLotRwLock::new(data),
            spin_iterations: spin.spin_iterations(),
        }
    }

    /// Number of busy-wait attempts before blocking
    pub fn spin_iterations(&self) -> u32 {
        self.spin_iterations
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        for _ in 0..self.spin_iterations {
            if let Some(guard) = self.inner.try_read() {
                return guard;
            }
            std::hint::spin_loop();
        }
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        for _ in 0..self.spin_iterations {
            if let Some(guard) = self.inner.try_write() {
                return guard;
            }
            std::hint::spin_loop();
        }
        self.inner.write()
    }

    /// Acquires a write lock without waiting
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        self.inner.try_write()
    }

    /// True if some thread currently holds the lock exclusively
    pub fn is_locked_exclusive(&self) -> bool {
        self.inner.is_locked_exclusive()
    }
}

impl<T> RwLockInterface<T> for TableLock<T> {
    type ReadGuard<'a>
        = RwLockReadGuard<'a, T>
    where
        T: 'a;
    type WriteGuard<'a>
        = RwLockWriteGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        TableLock::new(data)
    }

    fn read(&self) -> Self::ReadGuard<'_> {
        TableLock::read(self)
    }

    fn write(&self) -> Self::WriteGuard<'_> {
        TableLock::write(self)
    }
}
