//! 文件后备接口 trait 定义

/// 可用作页后备存储的文件接口
///
/// 此 trait 抽象了按偏移读写所需的最小接口。
/// vfs 的文件类型需要实现此 trait。
pub trait VmFile: Send + Sync {
    /// 从指定偏移读取数据到缓冲区
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, isize>;

    /// 将缓冲区数据写入指定偏移
    fn write_at(&self, offset: usize, buf: &[u8]) -> Result<usize, isize>;
}
