//! 交换存储模块
//!
//! 管理交换设备上的页槽位。每个槽位容纳一页
//! （`page_size / sector_size` 个连续扇区）。
//!
//! ## 槽位跟踪（位图）
//!
//! 与帧分配一样使用位图跟踪槽位状态：
//!
//! - **bitmap**：每个 bit 表示一个槽位（0=空闲，1=已占用）
//! - **last_alloc_hint**：上次分配位置提示，利用局部性加速查找
//!
//! 槽位生命周期是"恰好一次"的：`swap_write_slot` 写入的内容
//! 被 `swap_read_slot` 读回后，调用方立即释放槽位；
//! 页记录销毁时仍持有的槽位也必须释放。
//!
//! ## 锁约定
//!
//! 全局存储锁只覆盖位图记账和设备句柄克隆，扇区 I/O 一律在锁外进行。

use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use sync::SpinLock;

use crate::config::vm_config;
use crate::error::{VmError, VmResult};

/// 交换设备接口
///
/// 此 trait 抽象了交换存储对块设备的最小需求。
pub trait SwapDevice: Send + Sync {
    /// 读取一个扇区到缓冲区，返回是否成功
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool;

    /// 将缓冲区写入一个扇区，返回是否成功
    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool;

    /// 设备的扇区总数
    fn total_sectors(&self) -> usize;
}

/// 每个页槽位占用的扇区数
fn sectors_per_page() -> usize {
    vm_config().page_size() / vm_config().sector_size()
}

lazy_static! {
    /// 全局交换存储，由自旋锁保护。
    static ref SWAP_STORE: SpinLock<SwapStore> = SpinLock::new(SwapStore::empty());
}

/// 交换存储。
/// 采用位图策略跟踪每个页槽位的占用状态。
pub struct SwapStore {
    /// 底层交换设备；None 表示没有交换设备（所有分配失败）。
    device: Option<Arc<dyn SwapDevice>>,
    /// 位图数据（每个 bit 表示一个槽位：0=空闲，1=已占用）。
    bitmap: Vec<u64>,
    /// 槽位总数。
    slot_count: usize,
    /// 已占用槽位数（用于快速统计）。
    allocated_count: usize,
    /// 上次分配的位置提示（用于加速查找）。
    last_alloc_hint: usize,
}

impl SwapStore {
    /// 创建一个没有设备的空存储（所有分配返回 [`VmError::SwapFull`]）。
    pub const fn empty() -> Self {
        SwapStore {
            device: None,
            bitmap: Vec::new(),
            slot_count: 0,
            allocated_count: 0,
            last_alloc_hint: 0,
        }
    }

    /// 根据设备容量创建交换存储。
    ///
    /// 槽位数为 `total_sectors / sectors_per_page`；传入 None 等价于 [`SwapStore::empty`]。
    pub fn new(device: Option<Arc<dyn SwapDevice>>) -> Self {
        let slot_count = match &device {
            Some(dev) => dev.total_sectors() / sectors_per_page(),
            None => 0,
        };
        let bitmap_u64_count = slot_count.div_ceil(64);

        SwapStore {
            device,
            bitmap: alloc::vec![0u64; bitmap_u64_count],
            slot_count,
            allocated_count: 0,
            last_alloc_hint: 0,
        }
    }

    /// 检查槽位是否空闲
    #[inline]
    fn is_free(&self, slot: usize) -> bool {
        let word_idx = slot / 64;
        let bit_idx = slot % 64;
        (self.bitmap[word_idx] & (1u64 << bit_idx)) == 0
    }

    /// 标记槽位为已占用
    #[inline]
    fn mark_allocated(&mut self, slot: usize) {
        let word_idx = slot / 64;
        let bit_idx = slot % 64;
        self.bitmap[word_idx] |= 1u64 << bit_idx;
    }

    /// 标记槽位为空闲
    #[inline]
    fn mark_free(&mut self, slot: usize) {
        let word_idx = slot / 64;
        let bit_idx = slot % 64;
        self.bitmap[word_idx] &= !(1u64 << bit_idx);
    }

    /// 分配一个空闲槽位。
    /// 从 last_alloc_hint 开始循环查找第一个空闲位。
    pub fn allocate_slot(&mut self) -> VmResult<usize> {
        let bitmap_len = self.bitmap.len();
        if bitmap_len == 0 {
            return Err(VmError::SwapFull);
        }

        let start_idx = self.last_alloc_hint;

        // 循环查找：[hint, end) + [0, hint)
        for offset in 0..bitmap_len {
            let idx = (start_idx + offset) % bitmap_len;
            let word = self.bitmap[idx];

            // 快速跳过全满的 u64
            if word == u64::MAX {
                continue;
            }

            let bit_pos = (!word).trailing_zeros() as usize;
            if bit_pos < 64 {
                let slot = idx * 64 + bit_pos;
                if slot >= self.slot_count {
                    continue;
                }

                self.mark_allocated(slot);
                self.allocated_count += 1;
                self.last_alloc_hint = idx;
                return Ok(slot);
            }
        }

        Err(VmError::SwapFull)
    }

    /// 释放一个槽位。
    pub fn free_slot(&mut self, slot: usize) {
        debug_assert!(slot < self.slot_count, "free_slot: slot out of range");
        debug_assert!(!self.is_free(slot), "free_slot: double free detected");

        self.mark_free(slot);
        self.allocated_count -= 1;
    }

    /// 获取槽位总数
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// 获取空闲槽位数
    pub fn free_slots(&self) -> usize {
        self.slot_count - self.allocated_count
    }

    /// 克隆设备句柄，供锁外 I/O 使用
    fn device_handle(&self) -> Option<Arc<dyn SwapDevice>> {
        self.device.clone()
    }
}

impl Default for SwapStore {
    fn default() -> Self {
        Self::empty()
    }
}

// ============================================================================
// 公共 API
// ============================================================================

/// 使用给定设备初始化全局交换存储。
///
/// 传入 None 表示系统没有交换设备，此后所有槽位分配都会失败。
pub fn init_swap(device: Option<Arc<dyn SwapDevice>>) {
    *SWAP_STORE.lock() = SwapStore::new(device);
}

/// 从全局存储分配一个槽位。
pub fn swap_alloc_slot() -> VmResult<usize> {
    SWAP_STORE.lock().allocate_slot()
}

/// 向全局存储释放一个槽位。
pub fn swap_free_slot(slot: usize) {
    SWAP_STORE.lock().free_slot(slot);
}

/// 获取全局存储的空闲槽位数
pub fn swap_free_slots() -> usize {
    SWAP_STORE.lock().free_slots()
}

/// 将槽位内容读入 kpage 指向的一页内存。
///
/// 逐扇区读取；存储锁只用于取设备句柄，不覆盖 I/O。
///
/// # Safety
/// kpage 必须指向一段有效且独占的 page_size 字节内存。
/// 调用者必须持有该页所绑定帧的帧锁。
pub unsafe fn swap_read_slot(slot: usize, kpage: *mut u8) -> VmResult<()> {
    let device = SWAP_STORE.lock().device_handle().ok_or(VmError::IoFailed)?;
    let sector_size = vm_config().sector_size();
    let base = slot * sectors_per_page();

    for i in 0..sectors_per_page() {
        // SAFETY: kpage 的有效性由调用者保证，每次切出一个扇区大小的窗口
        let buf = unsafe { core::slice::from_raw_parts_mut(kpage.add(i * sector_size), sector_size) };
        if !device.read_sector(base + i, buf) {
            log::error!("vm: swap read failed at slot {} sector {}", slot, base + i);
            return Err(VmError::IoFailed);
        }
    }
    Ok(())
}

/// 将 kpage 指向的一页内存写入槽位。
///
/// # Safety
/// kpage 必须指向一段有效的 page_size 字节内存。
/// 调用者必须持有该页所绑定帧的帧锁。
pub unsafe fn swap_write_slot(slot: usize, kpage: *const u8) -> VmResult<()> {
    let device = SWAP_STORE.lock().device_handle().ok_or(VmError::IoFailed)?;
    let sector_size = vm_config().sector_size();
    let base = slot * sectors_per_page();

    for i in 0..sectors_per_page() {
        // SAFETY: kpage 的有效性由调用者保证
        let buf = unsafe { core::slice::from_raw_parts(kpage.add(i * sector_size), sector_size) };
        if !device.write_sector(base + i, buf) {
            log::error!("vm: swap write failed at slot {} sector {}", slot, base + i);
            return Err(VmError::IoFailed);
        }
    }
    Ok(())
}
