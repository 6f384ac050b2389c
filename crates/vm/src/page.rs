//! 虚拟页模块
//!
//! [`VmPage`] 描述一个用户虚拟页：它当前的内容在哪（帧、交换槽、
//! 文件或"按需清零"），以及逐出时内容该去哪。
//!
//! ## 后备存储的优先级
//!
//! 装载内容时交换槽优先于文件：一旦页被换出，交换区里的副本就是
//! 唯一权威版本。私有文件页第一次被换出时会卸下文件后备，
//! 此后永远走交换区。
//!
//! ## 锁约定
//!
//! [`VmPage::populate`] 和 [`VmPage::evict`] 要求调用者持有对应帧的帧锁，
//! 帧内容只在帧锁下读写。state 自旋锁只保护描述字段，从不覆盖 I/O。

use alloc::sync::Arc;
use sync::SpinLock;

use crate::address::Vaddr;
use crate::config::vm_config;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::page_table::PageTableOps;
use crate::swap::{swap_alloc_slot, swap_free_slot, swap_read_slot, swap_write_slot};

/// 页的文件后备描述
#[derive(Clone)]
pub struct FileBacking {
    /// 后备文件
    pub file: Arc<dyn VmFile>,
    /// 页内容在文件中的起始偏移
    pub offset: usize,
    /// 有效字节数（不足一页的部分清零）
    pub bytes: usize,
}

impl core::fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

/// 页的可变状态，由 state 自旋锁保护。
#[derive(Debug)]
struct PageState {
    /// 驻留时绑定的帧表槽号
    frame: Option<usize>,
    /// 已被消费的硬件脏位的软件锁存；写回或换出成功后才清除
    dirty: bool,
    /// 脏内容写往交换区（true）还是写回文件（false）
    private: bool,
    /// 文件后备；换出到交换区时卸下
    file: Option<FileBacking>,
    /// 换出后占用的交换槽
    swap_slot: Option<usize>,
}

/// 快照出的装载来源，使 I/O 不在 state 锁下进行。
enum Backing {
    Zero,
    File(FileBacking),
    Swap(usize),
}

/// 一个用户虚拟页。
pub struct VmPage {
    /// 页对齐的用户虚拟地址
    vaddr: Vaddr,
    /// 所属地址空间的硬件页表
    page_table: Arc<dyn PageTableOps>,
    /// 是否只读映射
    read_only: bool,
    /// 可变状态
    state: SpinLock<PageState>,
}

impl VmPage {
    /// 创建一个按需清零的匿名页。
    ///
    /// 可写页默认 private（脏内容去交换区）。
    pub fn new_zeroed(vaddr: Vaddr, page_table: Arc<dyn PageTableOps>, read_only: bool) -> Self {
        VmPage {
            vaddr,
            page_table,
            read_only,
            state: SpinLock::new(PageState {
                frame: None,
                dirty: false,
                private: !read_only,
                file: None,
                swap_slot: None,
            }),
        }
    }

    /// 创建一个文件后备页。
    pub fn new_file_backed(
        vaddr: Vaddr,
        page_table: Arc<dyn PageTableOps>,
        file: Arc<dyn VmFile>,
        offset: usize,
        bytes: usize,
        read_only: bool,
        private: bool,
    ) -> Self {
        debug_assert!(bytes <= vm_config().page_size(), "backing exceeds one page");
        VmPage {
            vaddr,
            page_table,
            read_only,
            state: SpinLock::new(PageState {
                frame: None,
                dirty: false,
                private,
                file: Some(FileBacking { file, offset, bytes }),
                swap_slot: None,
            }),
        }
    }

    /// 页的用户虚拟地址
    pub fn vaddr(&self) -> Vaddr {
        self.vaddr
    }

    /// 页是否只读
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// 页当前绑定的帧表槽号
    pub fn frame_slot(&self) -> Option<usize> {
        self.state.lock().frame
    }

    /// 页当前占用的交换槽
    pub fn swap_slot(&self) -> Option<usize> {
        self.state.lock().swap_slot
    }

    /// 页是否还有文件后备
    pub fn has_file_backing(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// 页的脏内容是否写往交换区
    pub fn is_private(&self) -> bool {
        self.state.lock().private
    }

    pub(crate) fn set_frame_slot(&self, slot: Option<usize>) {
        self.state.lock().frame = slot;
    }

    /// 读取并清除硬件访问位（时钟扫描的第二次机会判据）
    pub(crate) fn accessed_and_reset(&self) -> bool {
        self.page_table.accessed_and_reset(self.vaddr)
    }

    /// 将页的内容装入 kpage 指向的帧。
    ///
    /// 来源按交换槽、文件、清零的顺序决定；交换槽读回后立即释放。
    /// 调用者必须持有该帧的帧锁。
    pub fn populate(&self, kpage: *mut u8) -> VmResult<()> {
        let page_size = vm_config().page_size();

        let backing = {
            let state = self.state.lock();
            if let Some(slot) = state.swap_slot {
                Backing::Swap(slot)
            } else if let Some(fb) = state.file.clone() {
                Backing::File(fb)
            } else {
                Backing::Zero
            }
        };

        match backing {
            Backing::Zero => {
                // SAFETY: 持有帧锁，kpage 指向独占的一页内存
                unsafe { core::ptr::write_bytes(kpage, 0, page_size) };
            }
            Backing::File(fb) => {
                // SAFETY: 同上
                let buf = unsafe { core::slice::from_raw_parts_mut(kpage, page_size) };
                let read = fb
                    .file
                    .read_at(fb.offset, &mut buf[..fb.bytes])
                    .map_err(|_| VmError::IoFailed)?;
                if read < fb.bytes {
                    log::warn!(
                        "vm: short read populating page {:#x}: {}/{} bytes",
                        self.vaddr.as_usize(),
                        read,
                        fb.bytes
                    );
                }
                // 文件尾之后的部分清零
                buf[read..].fill(0);
            }
            Backing::Swap(slot) => {
                // SAFETY: 同上
                unsafe { swap_read_slot(slot, kpage)? };
                self.state.lock().swap_slot = None;
                swap_free_slot(slot);
            }
        }
        Ok(())
    }

    /// 将页从 kpage 指向的帧逐出。
    ///
    /// 先查询并清除脏位，随即撤销硬件映射，使并发访问重新缺页而不是
    /// 读到将要消失的帧。之后按后备决定去向：
    ///
    /// - 无文件后备：无论脏否都写入交换区（帧内容是唯一副本）
    /// - 脏的私有文件页：写入交换区并卸下文件后备
    /// - 脏的共享文件页：按 offset/bytes 写回文件
    /// - 干净的文件页：直接丢弃
    ///
    /// 失败时帧保持与本页的绑定，内容和脏状态都未丢失：
    /// 硬件脏位在查询时即被消费，因此先锁存到 state 里，
    /// 只有写回或换出成功才清除，重试逐出时仍会写回。
    /// 调用者必须持有该帧的帧锁。
    pub fn evict(&self, kpage: *mut u8) -> VmResult<()> {
        let hw_dirty = self.page_table.dirty_and_reset(self.vaddr);
        self.page_table.unmap(self.vaddr);

        let (dirty, private, file) = {
            let mut state = self.state.lock();
            state.dirty |= hw_dirty;
            (state.dirty, state.private, state.file.clone())
        };

        match file {
            None => self.swap_out(kpage),
            Some(_) if dirty && private => self.swap_out(kpage),
            Some(fb) if dirty => {
                let page_size = vm_config().page_size();
                // SAFETY: 持有帧锁，帧内容在写回期间不会被改动
                let buf = unsafe { core::slice::from_raw_parts(kpage as *const u8, page_size) };
                let written = fb
                    .file
                    .write_at(fb.offset, &buf[..fb.bytes])
                    .map_err(|_| VmError::IoFailed)?;
                if written != fb.bytes {
                    log::error!(
                        "vm: partial write-back of page {:#x}: {}/{} bytes",
                        self.vaddr.as_usize(),
                        written,
                        fb.bytes
                    );
                    return Err(VmError::IoFailed);
                }
                let mut state = self.state.lock();
                state.dirty = false;
                state.frame = None;
                Ok(())
            }
            Some(_) => {
                // 干净的文件页，缺页时重新从文件装载
                self.state.lock().frame = None;
                Ok(())
            }
        }
    }

    /// 把帧内容写进一个新分配的交换槽。
    ///
    /// 写失败时释放刚分配的槽位；[`VmError::SwapFull`] 原样向上传播。
    fn swap_out(&self, kpage: *mut u8) -> VmResult<()> {
        let slot = swap_alloc_slot()?;
        // SAFETY: 调用者（evict）持有帧锁
        if let Err(err) = unsafe { swap_write_slot(slot, kpage as *const u8) } {
            swap_free_slot(slot);
            return Err(err);
        }

        let mut state = self.state.lock();
        state.swap_slot = Some(slot);
        state.frame = None;
        state.dirty = false;
        // 内容已进入交换区，文件副本不再是权威来源
        state.file = None;
        Ok(())
    }

    /// 释放页仍持有的交换槽（记录销毁时的恰好一次回收）。
    pub(crate) fn release_swap_slot(&self) {
        let slot = self.state.lock().swap_slot.take();
        if let Some(slot) = slot {
            swap_free_slot(slot);
        }
    }
}
