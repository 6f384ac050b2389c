// Unit tests for the vm crate.
//
// NOTE: these run as standard host `cargo test`; the mocks below stand in
// for the architecture, the hardware page table, files and the swap device.

use alloc::collections::btree_map::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use sync::SpinLock;
use test_support::mock::vm::{MOCK_VM_CONFIG, MockVmConfig};

use crate::address::Vaddr;
use crate::config::VmConfig;
use crate::file::VmFile;
use crate::page_table::PageTableOps;
use crate::swap::SwapDevice;


// test-support 不依赖本 crate（避免循环依赖），
// 因此在这里为其 Mock 配置实现 VmConfig。
impl VmConfig for MockVmConfig {
    fn page_size(&self) -> usize {
        self.page_size()
    }

    fn sector_size(&self) -> usize {
        self.sector_size()
    }

    fn user_stack_top(&self) -> usize {
        self.user_stack_top()
    }

    fn max_stack_size(&self) -> usize {
        self.max_stack_size()
    }
}

/// 测试用的架构操作：宿主机上禁用中断是 no-op。
struct DummyArchOps;

impl sync::ArchOps for DummyArchOps {
    unsafe fn read_and_disable_interrupts(&self) -> usize {
        1
    }

    unsafe fn restore_interrupts(&self, _flags: usize) {}

    fn interrupts_enabled(&self, flags: usize) -> bool {
        flags != 0
    }

    fn cpu_id(&self) -> usize {
        0
    }
}

static DUMMY_ARCH_OPS: DummyArchOps = DummyArchOps;

static ENV_INIT: std::sync::Once = std::sync::Once::new();
static GLOBALS_INIT: std::sync::Once = std::sync::Once::new();

/// 注册架构操作和配置（幂等）。
pub(crate) fn init_test_env() {
    ENV_INIT.call_once(|| unsafe {
        sync::register_arch_ops(&DUMMY_ARCH_OPS);
        crate::config::register_config(&MOCK_VM_CONFIG);
    });
}

/// 额外初始化全局帧表和交换存储（幂等）。
///
/// 帧数给得很充裕，单元测试之间不会互相触发逐出；
/// 逐出压力场景放在独立进程的集成测试里。
pub(crate) fn init_global_tables() {
    init_test_env();
    GLOBALS_INIT.call_once(|| {
        let base = page_buffer(64);
        unsafe {
            crate::frame_table::init_frame_table(base, 64).unwrap();
        }
        crate::swap::init_swap(Some(Arc::new(MemSwapDisk::new(64 * 8))));
    });
}

/// 泄漏出一段容纳 `pages` 页的内存作为帧表的后备区域。
pub(crate) fn page_buffer(pages: usize) -> *mut u8 {
    alloc::vec![0u8; pages * MOCK_VM_CONFIG.page_size()]
        .leak()
        .as_mut_ptr()
}

/// Mock 硬件页表。
///
/// 按页基址记录映射项，并模拟硬件访问位/脏位：
/// [`MockPageTable::user_write`] / [`MockPageTable::user_read`] 相当于
/// 用户态的访存，只有存在翻译时才成功。
pub(crate) struct MockPageTable {
    entries: SpinLock<BTreeMap<usize, MockEntry>>,
}

struct MockEntry {
    kpage: usize,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

impl MockPageTable {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockPageTable {
            entries: SpinLock::new(BTreeMap::new()),
        })
    }

    fn page_base(vaddr: usize) -> usize {
        vaddr - vaddr % MOCK_VM_CONFIG.page_size()
    }

    /// 是否存在 vaddr 的翻译
    pub(crate) fn translates(&self, vaddr: usize) -> bool {
        self.entries.lock().contains_key(&Self::page_base(vaddr))
    }

    /// 模拟用户态写入；无翻译或只读映射时失败。
    pub(crate) fn user_write(&self, vaddr: usize, data: &[u8]) -> bool {
        let mut entries = self.entries.lock();
        let offset = vaddr % MOCK_VM_CONFIG.page_size();
        let Some(entry) = entries.get_mut(&Self::page_base(vaddr)) else {
            return false;
        };
        if !entry.writable {
            return false;
        }
        // 在页表锁内拷贝，与逐出者的 unmap 串行化
        unsafe {
            core::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (entry.kpage as *mut u8).add(offset),
                data.len(),
            );
        }
        entry.accessed = true;
        entry.dirty = true;
        true
    }

    /// 模拟用户态读取；无翻译时失败。
    pub(crate) fn user_read(&self, vaddr: usize, buf: &mut [u8]) -> bool {
        let mut entries = self.entries.lock();
        let offset = vaddr % MOCK_VM_CONFIG.page_size();
        let Some(entry) = entries.get_mut(&Self::page_base(vaddr)) else {
            return false;
        };
        unsafe {
            core::ptr::copy_nonoverlapping(
                (entry.kpage as *const u8).add(offset),
                buf.as_mut_ptr(),
                buf.len(),
            );
        }
        entry.accessed = true;
        true
    }
}

impl PageTableOps for MockPageTable {
    fn map(&self, vaddr: Vaddr, kpage: *mut u8, writable: bool) -> bool {
        let mut entries = self.entries.lock();
        let base = Self::page_base(vaddr.as_usize());
        match entries.get_mut(&base) {
            // 重装同一映射时保留访问位/脏位
            Some(entry) if entry.kpage == kpage as usize => {
                entry.writable = writable;
            }
            _ => {
                entries.insert(
                    base,
                    MockEntry {
                        kpage: kpage as usize,
                        writable,
                        accessed: false,
                        dirty: false,
                    },
                );
            }
        }
        true
    }

    fn unmap(&self, vaddr: Vaddr) {
        self.entries
            .lock()
            .remove(&Self::page_base(vaddr.as_usize()));
    }

    fn accessed_and_reset(&self, vaddr: Vaddr) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&Self::page_base(vaddr.as_usize())) {
            Some(entry) => core::mem::replace(&mut entry.accessed, false),
            None => false,
        }
    }

    fn dirty_and_reset(&self, vaddr: Vaddr) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(&Self::page_base(vaddr.as_usize())) {
            Some(entry) => core::mem::replace(&mut entry.dirty, false),
            None => false,
        }
    }
}

/// 内存中的 Mock 文件，固定长度。
pub(crate) struct MemFile {
    data: SpinLock<Vec<u8>>,
}

impl MemFile {
    pub(crate) fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemFile {
            data: SpinLock::new(data),
        })
    }

    pub(crate) fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl VmFile for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// 内存中的 Mock 交换设备。
pub(crate) struct MemSwapDisk {
    sectors: SpinLock<Vec<u8>>,
    sector_size: usize,
    total: usize,
}

impl MemSwapDisk {
    pub(crate) fn new(total_sectors: usize) -> Self {
        let sector_size = MOCK_VM_CONFIG.sector_size();
        MemSwapDisk {
            sectors: SpinLock::new(alloc::vec![0u8; total_sectors * sector_size]),
            sector_size,
            total: total_sectors,
        }
    }
}

impl SwapDevice for MemSwapDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if sector >= self.total || buf.len() != self.sector_size {
            return false;
        }
        let data = self.sectors.lock();
        let start = sector * self.sector_size;
        buf.copy_from_slice(&data[start..start + self.sector_size]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if sector >= self.total || buf.len() != self.sector_size {
            return false;
        }
        let mut data = self.sectors.lock();
        let start = sector * self.sector_size;
        data[start..start + self.sector_size].copy_from_slice(buf);
        true
    }

    fn total_sectors(&self) -> usize {
        self.total
    }
}
