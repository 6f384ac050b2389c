//! 架构相关操作的 Mock 实现
//!
//! 注意：这里不直接依赖 `sync` crate（避免循环依赖）。
//! `sync` crate 在 `cfg(test)` 下为 [`MockArchOps`] 实现其 `ArchOps` trait。

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Mock 架构操作
///
/// 中断状态用一个原子布尔模拟；宿主机测试中禁用中断是 no-op，
/// 只需要保证标志的保存/恢复语义自洽。
pub struct MockArchOps {
    pub interrupt_state: AtomicBool,
    pub cpu_id: AtomicUsize,
}

impl MockArchOps {
    pub const fn new() -> Self {
        Self {
            interrupt_state: AtomicBool::new(true),
            cpu_id: AtomicUsize::new(0),
        }
    }

    /// 读取并“禁用”模拟的中断状态，返回之前的状态标志
    pub unsafe fn read_and_disable_interrupts(&self) -> usize {
        self.interrupt_state.swap(false, Ordering::SeqCst) as usize
    }

    /// 恢复模拟的中断状态
    pub unsafe fn restore_interrupts(&self, flags: usize) {
        self.interrupt_state.store(flags != 0, Ordering::SeqCst);
    }

    /// 判断状态标志中中断是否启用
    pub fn interrupts_enabled(&self, flags: usize) -> bool {
        flags != 0
    }

    /// 当前 CPU ID（测试默认：0）
    pub fn cpu_id(&self) -> usize {
        self.cpu_id.load(Ordering::Relaxed)
    }
}

/// 全局 Mock 实例
pub static MOCK_ARCH_OPS: MockArchOps = MockArchOps::new();
