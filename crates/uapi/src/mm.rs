//! 内存映射相关的常量和标志

use bitflags::bitflags;

bitflags! {
    /// 内存保护标志（PROT_*）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        /// 页可读
        const READ = 1 << 0;
        /// 页可写
        const WRITE = 1 << 1;
        /// 页可执行
        const EXEC = 1 << 2;
    }
}

bitflags! {
    /// 内存映射标志（MAP_*）
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// 共享映射，修改对文件可见
        const SHARED = 1 << 0;
        /// 私有映射，修改不写回文件
        const PRIVATE = 1 << 1;
        /// 映射到指定地址
        const FIXED = 1 << 4;
        /// 匿名映射，无文件后备
        const ANONYMOUS = 1 << 5;
    }
}
