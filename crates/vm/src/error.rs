//! 虚拟内存子系统的错误定义

/// 虚拟内存操作错误
///
/// 所有可失败的操作以 `Result` 形式返回此枚举，子系统内部不做重试。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 内核堆内存不足，无法建立跟踪结构
    OutOfMemory,
    /// 目标虚拟页已存在登记记录
    AlreadyMapped,
    /// 目标虚拟页没有登记记录
    NotMapped,
    /// 帧表扫描结束仍未找到可用帧
    OutOfFrames,
    /// 找到牺牲帧但逐出（写回）失败
    EvictionFailed,
    /// 交换区没有空闲槽位
    SwapFull,
    /// 设备或文件传输失败
    IoFailed,
}

/// 虚拟内存操作的 Result 别名
pub type VmResult<T> = Result<T, VmError>;
