//! 硬件页表协作者 trait 定义

use crate::address::Vaddr;

/// 硬件翻译表接口（每个地址空间一份）
///
/// 此 trait 抽象了分页子系统对硬件页表的最小需求。
/// os crate 的页表实现需要提供这些操作。
pub trait PageTableOps: Send + Sync {
    /// 建立 vaddr 到 kpage 的翻译
    ///
    /// 返回 false 表示页表节点分配失败，映射未建立。
    fn map(&self, vaddr: Vaddr, kpage: *mut u8, writable: bool) -> bool;

    /// 撤销 vaddr 的翻译，此后对该地址的访问将缺页
    fn unmap(&self, vaddr: Vaddr);

    /// 读取并清除 vaddr 的硬件访问位
    fn accessed_and_reset(&self, vaddr: Vaddr) -> bool;

    /// 读取并清除 vaddr 的硬件脏位
    fn dirty_and_reset(&self, vaddr: Vaddr) -> bool;
}
