//! The big kernel lock.
//!
//! Exactly one CPU runs kernel logic at a time: every trap takes this lock
//! before touching the environment table, the CPU table or the device
//! queues, and drops it when the next context has been chosen.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::{Mutex, MutexGuard};

const NO_HOLDER: usize = usize::MAX;

/// `spin::Mutex` that remembers which CPU holds it.
pub struct BigKernelLock<T> {
    inner: Mutex<T>,
    holder: AtomicUsize,
}

impl<T> BigKernelLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            holder: AtomicUsize::new(NO_HOLDER),
        }
    }

    /// Spin until `cpu` owns the lock. Not reentrant.
    pub fn lock(&self, cpu: usize) -> BklGuard<'_, T> {
        let guard = self.inner.lock();
        self.holder.store(cpu, Ordering::Release);
        BklGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// CPU currently holding the lock, if any.
    pub fn holder(&self) -> Option<usize> {
        match self.holder.load(Ordering::Acquire) {
            NO_HOLDER => None,
            cpu => Some(cpu),
        }
    }
}

/// 持有大内核锁期间对内核状态的独占访问，离开作用域时自动释放
pub struct BklGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a AtomicUsize,
}

impl<T> Deref for BklGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for BklGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for BklGuard<'_, T> {
    fn drop(&mut self) {
        // 先清掉持有者，再由 MutexGuard 的 drop 真正解锁
        self.holder.store(NO_HOLDER, Ordering::Release);
    }
}
