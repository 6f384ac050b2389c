//! 用户虚拟地址与虚拟页号类型
//!
//! 页大小来自注册的 [`VmConfig`](crate::VmConfig)，因此换算方法不是 `const fn`。

use crate::config::vm_config;

/// 用户虚拟地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Vaddr(usize);

impl Vaddr {
    /// 从 usize 构造虚拟地址
    pub const fn from_usize(addr: usize) -> Self {
        Vaddr(addr)
    }

    /// 转换为 usize
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// 地址的页内偏移
    pub fn page_offset(&self) -> usize {
        self.0 % vm_config().page_size()
    }

    /// 地址是否页对齐
    pub fn is_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// 向下取整到页边界
    pub fn align_down(&self) -> Vaddr {
        Vpn::from_addr_floor(*self).start_addr()
    }
}

/// 虚拟页号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Vpn(usize);

impl Vpn {
    /// 从 usize 构造虚拟页号
    pub const fn from_usize(vpn: usize) -> Self {
        Vpn(vpn)
    }

    /// 转换为 usize
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    /// 将地址向下取整到页号
    pub fn from_addr_floor(addr: Vaddr) -> Self {
        Vpn(addr.as_usize() / vm_config().page_size())
    }

    /// 将地址向上取整到页号
    pub fn from_addr_ceil(addr: Vaddr) -> Self {
        Vpn(addr.as_usize().div_ceil(vm_config().page_size()))
    }

    /// 页号对应的起始地址
    pub fn start_addr(&self) -> Vaddr {
        Vaddr(self.0 * vm_config().page_size())
    }
}
