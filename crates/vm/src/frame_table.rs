//! 帧表模块
//!
//! 跟踪一段固定的内核页帧，并在帧耗尽时执行时钟（second-chance）逐出。
//!
//! ## 锁结构
//!
//! - **扫描锁**：一把全局自旋锁，保护时钟指针并串行化帧查找。
//!   持有扫描锁时只 `try_lock` 帧锁，绝不阻塞等待，因此不会与
//!   持帧做 I/O 的线程死锁。写回 I/O 开始前扫描锁一定已释放。
//! - **帧锁**：每帧一把自旋锁，保护帧与页的绑定关系；帧内容
//!   （kpage 指向的一页内存）只在持有帧锁时读写。
//!
//! ## 时钟扫描
//!
//! 空闲帧优先；没有空闲帧时从持久化的时钟指针继续扫描，
//! 访问位为 1 的驻留页清位跳过（第二次机会），探测次数以
//! `3 × 帧数` 为上界：第一圈清访问位，第二圈找到本轮清过的帧，
//! 再留一圈余量给被 try_lock 跳过的帧。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicPtr, Ordering};
use sync::{SpinLock, SpinLockGuard};

use crate::config::vm_config;
use crate::error::{VmError, VmResult};
use crate::page::VmPage;

/// 一个物理页帧。
struct Frame {
    /// 帧的内核虚拟基地址。
    kpage: *mut u8,
    /// 帧锁 + 当前占用此帧的页；None 表示空闲。
    owner: SpinLock<Option<Arc<VmPage>>>,
}

// Safety: kpage 指向的内存只在持有 owner 锁时访问，
// 绑定关系本身由 SpinLock 保护。
unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

/// 帧表。
/// 管理一段连续内核内存划分出的固定数量页帧。
pub struct FrameTable {
    frames: Vec<Frame>,
    /// 扫描锁，内部数据是时钟指针。
    cursor: SpinLock<usize>,
}

impl FrameTable {
    /// 从 `base` 起的一段内核内存中划分 `frame_count` 个页帧。
    ///
    /// 跟踪结构分配失败返回 [`VmError::OutOfMemory`]。
    ///
    /// # Safety
    /// base 必须指向一段有效且独占的 `frame_count * page_size` 字节内存，
    /// 且在帧表的整个生命周期内保持有效。
    pub unsafe fn new(base: *mut u8, frame_count: usize) -> VmResult<Self> {
        let page_size = vm_config().page_size();

        let mut frames = Vec::new();
        frames
            .try_reserve_exact(frame_count)
            .map_err(|_| VmError::OutOfMemory)?;
        for i in 0..frame_count {
            frames.push(Frame {
                // SAFETY: i < frame_count，落在调用者保证的区域内
                kpage: unsafe { base.add(i * page_size) },
                owner: SpinLock::new(None),
            });
        }

        Ok(FrameTable {
            frames,
            cursor: SpinLock::new(0),
        })
    }

    /// 为 `page` 获取一个帧：优先空闲帧，否则时钟扫描逐出。
    ///
    /// 成功时帧已与 `page` 双向绑定，并以加锁状态随 [`FrameGuard`] 返回，
    /// 调用者在持锁期间装载内容、建立映射。
    ///
    /// # 错误
    /// - [`VmError::OutOfFrames`]：有界扫描结束仍未找到可用帧
    /// - [`VmError::EvictionFailed`]：选出了牺牲帧但写回失败
    pub fn acquire(&self, page: &Arc<VmPage>) -> VmResult<FrameGuard<'_>> {
        if self.frames.is_empty() {
            return Err(VmError::OutOfFrames);
        }

        // 第一遍：查找空闲帧
        {
            let _cursor = self.cursor.lock();
            for slot in 0..self.frames.len() {
                let Some(owner) = self.frames[slot].owner.try_lock() else {
                    continue;
                };
                if owner.is_none() {
                    return Ok(self.bind(slot, owner, page));
                }
            }
        }

        // 第二遍：时钟扫描选择牺牲帧
        let limit = 3 * self.frames.len();
        let mut probes = 0;
        let (slot, mut owner, victim) = {
            let mut cursor = self.cursor.lock();
            loop {
                if probes >= limit {
                    return Err(VmError::OutOfFrames);
                }
                probes += 1;

                let slot = *cursor;
                *cursor = (slot + 1) % self.frames.len();

                let Some(owner) = self.frames[slot].owner.try_lock() else {
                    continue;
                };
                match owner.as_ref() {
                    None => return Ok(self.bind(slot, owner, page)),
                    Some(resident) => {
                        // 第二次机会：清访问位并跳过最近用过的页
                        if resident.accessed_and_reset() {
                            continue;
                        }
                        let victim = resident.clone();
                        break (slot, owner, victim);
                    }
                }
            }
        }; // 扫描锁在此释放，写回不在其下进行

        if let Err(err) = victim.evict(self.frames[slot].kpage) {
            log::warn!(
                "vm: evicting page {:#x} from frame {} failed: {:?}",
                victim.vaddr().as_usize(),
                slot,
                err
            );
            // 牺牲帧保持原有绑定，原主重新缺页后仍可找回内容
            drop(owner);
            return Err(VmError::EvictionFailed);
        }

        *owner = None;
        Ok(self.bind_locked(slot, owner, page))
    }

    /// 锁定 `page` 当前绑定的帧。
    ///
    /// 读取绑定和获取帧锁之间绑定可能被逐出者改掉，因此加锁后重新检查，
    /// 不一致就重读。页不驻留时返回 None。
    pub fn lock_for(&self, page: &Arc<VmPage>) -> Option<FrameGuard<'_>> {
        loop {
            let slot = page.frame_slot()?;
            let frame = self.frames.get(slot)?;
            let owner = frame.owner.lock();
            let bound = matches!(owner.as_ref(), Some(p) if Arc::ptr_eq(p, page));
            if bound && page.frame_slot() == Some(slot) {
                return Some(FrameGuard {
                    slot,
                    kpage: frame.kpage,
                    owner,
                });
            }
            // 加锁期间关联变了，放掉锁重读
        }
    }

    /// 获取帧表的当前状态（总帧数、空闲帧数）。
    ///
    /// 空闲数通过 try_lock 统计，被锁住的帧按占用计，结果是近似值。
    pub fn stats(&self) -> (usize, usize) {
        let total = self.frames.len();
        let mut free = 0;
        for frame in &self.frames {
            if let Some(owner) = frame.owner.try_lock() {
                if owner.is_none() {
                    free += 1;
                }
            }
        }
        (total, free)
    }

    /// 在已持有帧锁且帧空闲的前提下建立双向绑定。
    fn bind<'a>(
        &'a self,
        slot: usize,
        owner: SpinLockGuard<'a, Option<Arc<VmPage>>>,
        page: &Arc<VmPage>,
    ) -> FrameGuard<'a> {
        debug_assert!(owner.is_none(), "bind: frame already owned");
        self.bind_locked(slot, owner, page)
    }

    fn bind_locked<'a>(
        &'a self,
        slot: usize,
        mut owner: SpinLockGuard<'a, Option<Arc<VmPage>>>,
        page: &Arc<VmPage>,
    ) -> FrameGuard<'a> {
        *owner = Some(page.clone());
        page.set_frame_slot(Some(slot));
        FrameGuard {
            slot,
            kpage: self.frames[slot].kpage,
            owner,
        }
    }
}

/// 已锁定帧的 RAII 保护器。
///
/// 离开作用域时释放帧锁（绑定保持不变）；
/// [`FrameGuard::reset`] 则在解锁前解除帧侧的绑定。
pub struct FrameGuard<'a> {
    slot: usize,
    kpage: *mut u8,
    owner: SpinLockGuard<'a, Option<Arc<VmPage>>>,
}

impl FrameGuard<'_> {
    /// 帧在帧表中的槽号
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// 帧的内核虚拟基地址，仅在持有本保护器期间可用
    pub fn kpage(&self) -> *mut u8 {
        self.kpage
    }

    /// 解除帧侧绑定并解锁（不写回）。
    ///
    /// 页侧的 frame 字段由调用者负责清除。
    pub fn reset(mut self) {
        *self.owner = None;
    }
}

// ============================================================================
// 全局帧表
// ============================================================================

static FRAME_TABLE: AtomicPtr<FrameTable> = AtomicPtr::new(core::ptr::null_mut());

/// 初始化全局帧表。
///
/// # Safety
/// - 必须在单线程环境下调用，且只能调用一次
/// - base 的要求同 [`FrameTable::new`]
pub unsafe fn init_frame_table(base: *mut u8, frame_count: usize) -> VmResult<()> {
    let table = unsafe { FrameTable::new(base, frame_count)? };
    FRAME_TABLE.store(Box::into_raw(Box::new(table)), Ordering::Release);
    Ok(())
}

/// 获取全局帧表
///
/// # Panics
/// 如果尚未调用 [`init_frame_table`] 初始化，则 panic
#[inline]
pub fn frame_table() -> &'static FrameTable {
    let ptr = FRAME_TABLE.load(Ordering::Acquire);
    if ptr.is_null() {
        panic!("vm: frame table not initialized");
    }
    // SAFETY: 指针由 init_frame_table 设置，来自 Box::into_raw，永不释放
    unsafe { &*ptr }
}
