//! 读写自旋锁
//!
//! 允许多个读者或单个写者并发访问数据，结合 IntrGuard 实现中断保护。
//! 写者优先级不做保证，竞争激烈时写者可能饥饿，适合读多写少的场景。

use crate::intr_guard::IntrGuard;
use core::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut, Drop},
    sync::atomic::{AtomicUsize, Ordering},
};

/// 写者占用标志位（最高位），其余位为读者计数。
const WRITER: usize = 1 << (usize::BITS - 1);

/// 读写自旋锁。
///
/// # 示例
/// ```ignore
/// let lock = RwLock::new(0);
/// {
///     let r1 = lock.read();
///     let r2 = lock.read(); // 多个读者可以共存
/// }
/// {
///     let mut w = lock.write(); // 写者独占
///     *w += 1;
/// }
/// ```
pub struct RwLock<T> {
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

impl<T> RwLock<T> {
    /// 创建一个新的 RwLock 实例，初始化内部数据。
    pub const fn new(data: T) -> Self {
        RwLock {
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// 获取读锁，并返回一个 RAII 保护器，提供共享访问。
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        let intr_guard = IntrGuard::new();

        loop {
            let state = self.state.load(Ordering::Relaxed);
            if state & WRITER == 0
                && self
                    .state
                    .compare_exchange_weak(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                break;
            }
            hint::spin_loop();
        }

        RwLockReadGuard {
            lock: self,
            _intr_guard: intr_guard,
        }
    }

    /// 获取写锁，并返回一个 RAII 保护器，提供独占访问。
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        let intr_guard = IntrGuard::new();

        while self
            .state
            .compare_exchange_weak(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            hint::spin_loop();
        }

        RwLockWriteGuard {
            lock: self,
            _intr_guard: intr_guard,
        }
    }

    /// 获取当前读者数量 (仅用于调试/测试)
    #[cfg(test)]
    pub fn reader_count(&self) -> usize {
        self.state.load(Ordering::Relaxed) & !WRITER
    }
}

/// RwLock 的读保护器，提供对数据的共享访问。
pub struct RwLockReadGuard<'a, T> {
    lock: &'a RwLock<T>,
    _intr_guard: IntrGuard,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: 读者计数非零期间写者无法进入
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// RwLock 的写保护器，提供对数据的独占访问。
pub struct RwLockWriteGuard<'a, T> {
    lock: &'a RwLock<T>,
    _intr_guard: IntrGuard,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: WRITER 位置位期间没有其它访问者
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: 同上
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.store(0, Ordering::Release);
    }
}

// Safety: RwLock 通过原子状态保证读共享、写独占。
unsafe impl<T: Send> Send for RwLock<T> {}
unsafe impl<T: Send + Sync> Sync for RwLock<T> {}
