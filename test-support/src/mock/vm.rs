//! 虚拟内存子系统的 Mock 实现
//!
//! 注意：这里不直接依赖 `vm` crate（避免循环依赖）。
//! `vm` crate 在 `cfg(test)` 下为 [`MockVmConfig`] 实现其 `VmConfig` trait。

/// Mock 的虚拟内存配置
///
/// 页大小和扇区大小取最常见的硬件值；栈顶和栈上限
/// 与 32 位用户地址空间布局一致。
pub struct MockVmConfig;

impl MockVmConfig {
    pub const fn new() -> Self {
        Self
    }

    /// 页大小（测试默认：4096）
    pub fn page_size(&self) -> usize {
        4096
    }

    /// 交换设备扇区大小（测试默认：512）
    pub fn sector_size(&self) -> usize {
        512
    }

    /// 用户栈顶地址
    pub fn user_stack_top(&self) -> usize {
        0xC000_0000
    }

    /// 用户栈的最大尺寸
    pub fn max_stack_size(&self) -> usize {
        1024 * 1024
    }
}

/// 全局 Mock 实例
pub static MOCK_VM_CONFIG: MockVmConfig = MockVmConfig::new();
