//! Shared fixtures for the vm integration tests.
//!
//! Each test binary is its own process, so every scenario gets a fresh
//! frame table and swap store sized for the pressure it wants to create.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Once};

use vm::{AddressSpace, PageTableOps, SwapDevice, Vaddr, VmConfig, VmFile};

pub const PAGE_SIZE: usize = 4096;
pub const SECTOR_SIZE: usize = 512;
pub const STACK_TOP: usize = 0xC000_0000;
pub const MAX_STACK: usize = 1024 * 1024;

struct TestArchOps;

impl sync::ArchOps for TestArchOps {
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

static TEST_ARCH_OPS: TestArchOps = TestArchOps;

struct TestConfig;

impl VmConfig for TestConfig {
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn sector_size(&self) -> usize {
        SECTOR_SIZE
    }

    fn user_stack_top(&self) -> usize {
        STACK_TOP
    }

    fn max_stack_size(&self) -> usize {
        MAX_STACK
    }
}

static TEST_CONFIG: TestConfig = TestConfig;

static SETUP: Once = Once::new();

/// Register the collaborators and size the global frame table / swap store.
///
/// Must be called with the same arguments from every test in a binary;
/// only the first call takes effect.
pub fn setup(frames: usize, swap_slots: usize) {
    SETUP.call_once(|| {
        unsafe {
            sync::register_arch_ops(&TEST_ARCH_OPS);
            vm::register_config(&TEST_CONFIG);
        }
        let base = Box::leak(vec![0u8; frames * PAGE_SIZE].into_boxed_slice()).as_mut_ptr();
        unsafe {
            vm::init_frame_table(base, frames).expect("frame table init");
        }
        let disk = MemSwapDisk::new(swap_slots * (PAGE_SIZE / SECTOR_SIZE));
        vm::init_swap(Some(Arc::new(disk)));
    });
}

pub fn make_space() -> (AddressSpace, Arc<MockPageTable>) {
    let pt = Arc::new(MockPageTable::new());
    let pt_dyn: Arc<dyn PageTableOps> = pt.clone();
    (AddressSpace::new(pt_dyn), pt)
}

/// Fault the page in (retrying if a concurrent eviction steals the frame or
/// the scan transiently fails) and stamp a 64-byte marker at page offset 0.
pub fn touch_write(space: &AddressSpace, pt: &MockPageTable, vaddr: usize, marker: u8) {
    loop {
        if space.resolve_fault(Vaddr::from_usize(vaddr), None).is_err() {
            std::thread::yield_now();
            continue;
        }
        if pt.user_write(vaddr, &[marker; 64]) {
            return;
        }
    }
}

/// Fault the page in and read back the 64-byte marker, asserting it is uniform.
pub fn read_marker(space: &AddressSpace, pt: &MockPageTable, vaddr: usize) -> u8 {
    loop {
        if space.resolve_fault(Vaddr::from_usize(vaddr), None).is_err() {
            std::thread::yield_now();
            continue;
        }
        let mut buf = [0u8; 64];
        if pt.user_read(vaddr, &mut buf) {
            assert!(
                buf.iter().all(|&b| b == buf[0]),
                "torn marker at {:#x}: {:?}",
                vaddr,
                &buf[..8]
            );
            return buf[0];
        }
    }
}

/// Mock hardware page table with simulated accessed/dirty bits.
///
/// `user_write` / `user_read` stand in for user-mode memory accesses:
/// they only succeed while a translation exists, and the copy happens
/// inside the table lock so it serializes against an evictor's `unmap`.
pub struct MockPageTable {
    entries: Mutex<BTreeMap<usize, MockEntry>>,
}

struct MockEntry {
    kpage: usize,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

impl MockPageTable {
    pub fn new() -> Self {
        MockPageTable {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn page_base(vaddr: usize) -> usize {
        vaddr - vaddr % PAGE_SIZE
    }

    pub fn translates(&self, vaddr: usize) -> bool {
        self.entries
            .lock()
            .unwrap()
            .contains_key(&Self::page_base(vaddr))
    }

    pub fn user_write(&self, vaddr: usize, data: &[u8]) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let offset = vaddr % PAGE_SIZE;
        let Some(entry) = entries.get_mut(&Self::page_base(vaddr)) else {
            return false;
        };
        if !entry.writable {
            return false;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (entry.kpage as *mut u8).add(offset),
                data.len(),
            );
        }
        entry.accessed = true;
        entry.dirty = true;
        true
    }

    pub fn user_read(&self, vaddr: usize, buf: &mut [u8]) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let offset = vaddr % PAGE_SIZE;
        let Some(entry) = entries.get_mut(&Self::page_base(vaddr)) else {
            return false;
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
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
        let mut entries = self.entries.lock().unwrap();
        let base = Self::page_base(vaddr.as_usize());
        match entries.get_mut(&base) {
            // Re-installing the same mapping keeps the accessed/dirty bits.
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
            .unwrap()
            .remove(&Self::page_base(vaddr.as_usize()));
    }

    fn accessed_and_reset(&self, vaddr: Vaddr) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&Self::page_base(vaddr.as_usize())) {
            Some(entry) => std::mem::replace(&mut entry.accessed, false),
            None => false,
        }
    }

    fn dirty_and_reset(&self, vaddr: Vaddr) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(&Self::page_base(vaddr.as_usize())) {
            Some(entry) => std::mem::replace(&mut entry.dirty, false),
            None => false,
        }
    }
}

/// Fixed-length in-memory file.
pub struct MemFile {
    data: Mutex<Vec<u8>>,
}

impl MemFile {
    pub fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(MemFile {
            data: Mutex::new(data),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().unwrap().clone()
    }
}

impl VmFile for MemFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize> {
        let data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize> {
        let mut data = self.data.lock().unwrap();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// In-memory swap device.
pub struct MemSwapDisk {
    sectors: Mutex<Vec<u8>>,
    total: usize,
}

impl MemSwapDisk {
    pub fn new(total_sectors: usize) -> Self {
        MemSwapDisk {
            sectors: Mutex::new(vec![0u8; total_sectors * SECTOR_SIZE]),
            total: total_sectors,
        }
    }
}

impl SwapDevice for MemSwapDisk {
    fn read_sector(&self, sector: usize, buf: &mut [u8]) -> bool {
        if sector >= self.total || buf.len() != SECTOR_SIZE {
            return false;
        }
        let data = self.sectors.lock().unwrap();
        let start = sector * SECTOR_SIZE;
        buf.copy_from_slice(&data[start..start + SECTOR_SIZE]);
        true
    }

    fn write_sector(&self, sector: usize, buf: &[u8]) -> bool {
        if sector >= self.total || buf.len() != SECTOR_SIZE {
            return false;
        }
        let mut data = self.sectors.lock().unwrap();
        let start = sector * SECTOR_SIZE;
        data[start..start + SECTOR_SIZE].copy_from_slice(buf);
        true
    }

    fn total_sectors(&self) -> usize {
        self.total
    }
}
