//! 按需分页的虚拟内存子系统
//!
//! 该模块实现了用户地址空间的**按需分页**：页在第一次访问时才装载，
//! 帧耗尽时通过时钟算法逐出，被逐出的内容按后备类型进入交换区或写回文件。
//!
//! # 组件
//!
//! - [`space`] - 补充页表（AddressSpace）：按页号登记页、缺页处理、栈增长
//! - [`page`] - 虚拟页（VmPage）：后备描述，装载与逐出
//! - [`frame_table`] - 帧表（FrameTable）：固定帧登记、时钟逐出、帧锁
//! - [`swap`] - 交换存储（SwapStore）：槽位位图与逐扇区传输
//! - [`address`] - 虚拟地址与页号类型
//!
//! # 设计概览
//!
//! ## 三方职责
//!
//! 补充页表回答"这个地址是什么页"，帧表回答"帧给谁用"，
//! 交换存储回答"被逐出的内容放哪"。硬件页表只是驻留子集的缓存，
//! 真相始终在登记记录里。
//!
//! ## 锁层次
//!
//! 固定的加锁顺序：扫描锁 → 帧锁 → 页状态锁 → 交换存储锁。
//! 设备和文件 I/O 只在帧锁下进行，从不在扫描锁、页索引锁或
//! 交换存储锁下进行。
//!
//! # 架构解耦
//!
//! 子系统通过 trait 抽象与架构和外部子系统解耦：
//!
//! - **VmConfig**：页大小、扇区大小、栈布局常量
//! - **PageTableOps**：硬件页表的映射/撤销与访问位、脏位
//! - **VmFile**：文件后备页的按偏移读写
//! - **SwapDevice**：交换设备的扇区读写
//!
//! 使用方需要在启动时注册 [`VmConfig`] 实现，并调用
//! [`init_frame_table`] / [`init_swap`] 完成初始化。

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod address;
mod config;
mod error;
mod file;
pub mod frame_table;
pub mod page;
mod page_table;
pub mod space;
pub mod swap;

#[cfg(test)]
mod tests;

pub use address::{Vaddr, Vpn};
pub use config::{VmConfig, register_config, vm_config};
pub use error::{VmError, VmResult};
pub use file::VmFile;
pub use frame_table::{FrameGuard, FrameTable, frame_table, init_frame_table};
pub use page::{FileBacking, VmPage};
pub use page_table::PageTableOps;
pub use space::AddressSpace;
pub use swap::{SwapDevice, SwapStore, init_swap};
