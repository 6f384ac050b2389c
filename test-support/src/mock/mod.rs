//! Mock 实现集合

pub mod arch;
pub mod vm;
