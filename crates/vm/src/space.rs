//! 地址空间的补充页表
//!
//! [`AddressSpace`] 按虚拟页号登记一个地址空间里所有受管页，
//! 是缺页处理的入口：查找（含栈增长判定）、装载、映射、拆除。
//!
//! 硬件页表只反映"此刻驻留"的子集，这里的登记才是页的完整描述。

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::RwLock;
use uapi::mm::{MapFlags, ProtFlags};

use crate::address::{Vaddr, Vpn};
use crate::config::vm_config;
use crate::error::{VmError, VmResult};
use crate::file::VmFile;
use crate::frame_table::frame_table;
use crate::page::VmPage;
use crate::page_table::PageTableOps;

/// 栈探测余量：PUSHA 一次最多在 esp 之下 32 字节处写入，
/// 低于 `esp - 32` 的访问不视为合法的栈增长。
const STACK_PROBE_MARGIN: usize = 32;

/// 一个地址空间的补充页表。
pub struct AddressSpace {
    /// 按页号索引的页记录
    pages: RwLock<BTreeMap<Vpn, Arc<VmPage>>>,
    /// 此地址空间的硬件页表
    page_table: Arc<dyn PageTableOps>,
}

impl AddressSpace {
    /// 为给定硬件页表创建一个空的地址空间。
    pub fn new(page_table: Arc<dyn PageTableOps>) -> Self {
        AddressSpace {
            pages: RwLock::new(BTreeMap::new()),
            page_table,
        }
    }

    /// 此地址空间的硬件页表
    pub fn page_table(&self) -> &Arc<dyn PageTableOps> {
        &self.page_table
    }

    /// 在 `vaddr` 所在页登记一个按需清零的匿名页。
    ///
    /// 记录要么完整建立要么不建立；重复登记返回 [`VmError::AlreadyMapped`]。
    pub fn allocate(&self, vaddr: Vaddr, read_only: bool) -> VmResult<Arc<VmPage>> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let page = Arc::new(VmPage::new_zeroed(
            vpn.start_addr(),
            self.page_table.clone(),
            read_only,
        ));
        self.insert(vpn, page)
    }

    /// 在 `vaddr` 所在页登记一个文件后备页（mmap 和加载器的入口）。
    ///
    /// `private` 取自 `!MapFlags::SHARED`，`read_only` 取自 `!ProtFlags::WRITE`。
    pub fn install_file_page(
        &self,
        vaddr: Vaddr,
        file: Arc<dyn VmFile>,
        offset: usize,
        bytes: usize,
        prot: ProtFlags,
        flags: MapFlags,
    ) -> VmResult<Arc<VmPage>> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let page = Arc::new(VmPage::new_file_backed(
            vpn.start_addr(),
            self.page_table.clone(),
            file,
            offset,
            bytes,
            !prot.contains(ProtFlags::WRITE),
            !flags.contains(MapFlags::SHARED),
        ));
        self.insert(vpn, page)
    }

    fn insert(&self, vpn: Vpn, page: Arc<VmPage>) -> VmResult<Arc<VmPage>> {
        let mut pages = self.pages.write();
        if pages.contains_key(&vpn) {
            return Err(VmError::AlreadyMapped);
        }
        pages.insert(vpn, page.clone());
        Ok(page)
    }

    /// 查找 `vaddr` 所在页的记录。
    ///
    /// 没有记录时，若给出了 `stack_pointer` 且地址落在合法的栈增长
    /// 窗口内（低于栈顶、页基址严格高于 `栈顶 - 栈上限`、不低于
    /// `sp - 32`），就地登记一个新的可写匿名页。
    pub fn find(&self, vaddr: Vaddr, stack_pointer: Option<Vaddr>) -> Option<Arc<VmPage>> {
        let cfg = vm_config();
        if vaddr.as_usize() >= cfg.user_stack_top() {
            return None;
        }

        let vpn = Vpn::from_addr_floor(vaddr);
        if let Some(page) = self.pages.read().get(&vpn) {
            return Some(page.clone());
        }

        let sp = stack_pointer?;
        let page_base = vpn.start_addr().as_usize();
        let in_stack_region = page_base > cfg.user_stack_top() - cfg.max_stack_size();
        let within_margin = sp.as_usize().saturating_sub(STACK_PROBE_MARGIN) <= vaddr.as_usize();
        if in_stack_region && within_margin {
            self.allocate(vaddr, false).ok()
        } else {
            None
        }
    }

    /// 缺页处理入口：找到（或栈增长出）`vaddr` 的页并使其驻留。
    pub fn resolve_fault(&self, vaddr: Vaddr, stack_pointer: Option<Vaddr>) -> VmResult<()> {
        let page = self
            .find(vaddr, stack_pointer)
            .ok_or(VmError::NotMapped)?;
        self.resolve(&page)
    }

    /// 使 `page` 驻留并建立硬件映射。
    ///
    /// 已驻留的页只重建映射（逐出者可能刚撤销过翻译）；
    /// 否则获取帧、装载内容、建立映射，全程持有帧锁。
    /// 装载失败时帧被退回，页保持非驻留。
    pub fn resolve(&self, page: &Arc<VmPage>) -> VmResult<()> {
        let table = frame_table();
        let guard = match table.lock_for(page) {
            Some(guard) => guard,
            None => {
                let guard = table.acquire(page)?;
                if let Err(err) = page.populate(guard.kpage()) {
                    page.set_frame_slot(None);
                    guard.reset();
                    return Err(err);
                }
                guard
            }
        };

        if !self.page_table.map(page.vaddr(), guard.kpage(), !page.read_only()) {
            return Err(VmError::OutOfMemory);
        }
        Ok(())
    }

    /// 丢弃 `vaddr` 所在页：不写回，帧和交换槽直接释放。
    pub fn clear(&self, vaddr: Vaddr) -> VmResult<()> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let page = self
            .pages
            .write()
            .remove(&vpn)
            .ok_or(VmError::NotMapped)?;
        self.discard(&page);
        Ok(())
    }

    /// 同步拆除 `vaddr` 所在页（mmap 解除映射的路径）。
    ///
    /// 驻留的页先按逐出规则写回；写回失败时记录保留，调用者可重试。
    pub fn sync_and_clear(&self, vaddr: Vaddr) -> VmResult<()> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let page = self
            .pages
            .read()
            .get(&vpn)
            .cloned()
            .ok_or(VmError::NotMapped)?;

        if let Some(guard) = frame_table().lock_for(&page) {
            page.evict(guard.kpage())?;
            guard.reset();
        }

        self.pages.write().remove(&vpn);
        page.release_swap_slot();
        Ok(())
    }

    /// 拆除整个地址空间：所有记录丢弃，不写回。
    pub fn destroy_all(&self) {
        let pages: Vec<Arc<VmPage>> = {
            let mut map = self.pages.write();
            core::mem::take(&mut *map).into_values().collect()
        };
        for page in pages {
            self.discard(&page);
        }
    }

    /// 释放一个已摘除记录的页占用的全部资源。
    fn discard(&self, page: &Arc<VmPage>) {
        if let Some(guard) = frame_table().lock_for(page) {
            self.page_table.unmap(page.vaddr());
            page.set_frame_slot(None);
            guard.reset();
        }
        page.release_swap_slot();
    }
}
