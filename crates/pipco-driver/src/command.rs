//! 命令缓冲区
//!
//! 摄入线程每次轮询把串口中已到达的字节复制到一个定长缓冲区，再整体交给控制线程。
//! 缓冲区是值类型（256 字节数组），在通道中按值移动，不共享、不加锁。

use pipco_serial::{RxTransport, TransportError};
use std::fmt;

/// 固定大小的命令缓冲区（最多 255 字节有效数据 + NUL 结尾）
#[derive(Clone, PartialEq, Eq)]
pub struct CommandBuffer {
    data: [u8; Self::CAPACITY],
    len: usize,
    truncated: bool,
}

impl CommandBuffer {
    /// 缓冲区总大小（含 NUL 结尾）
    pub const CAPACITY: usize = 256;
    /// 单次最多承载的有效字节数
    pub const MAX_PAYLOAD: usize = Self::CAPACITY - 1;

    /// 创建空缓冲区（全零）
    pub fn new() -> Self {
        Self {
            data: [0; Self::CAPACITY],
            len: 0,
            truncated: false,
        }
    }

    /// 从传输层读取最多 `min(available, MAX_PAYLOAD)` 字节
    ///
    /// 超出部分留在传输层，等待下一次轮询。返回实际读取的字节数。
    pub fn fill_from<R: RxTransport + ?Sized>(
        &mut self,
        rx: &mut R,
        available: usize,
    ) -> Result<usize, TransportError> {
        self.clear();
        let want = available.min(Self::MAX_PAYLOAD);
        let read = rx.read(&mut self.data[..want])?;
        self.len = read.min(want);
        self.truncated = available > Self::MAX_PAYLOAD;
        Ok(self.len)
    }

    /// 由字节切片构造（超长部分被截断）
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::new();
        let len = bytes.len().min(Self::MAX_PAYLOAD);
        buffer.data[..len].copy_from_slice(&bytes[..len]);
        buffer.len = len;
        buffer.truncated = bytes.len() > Self::MAX_PAYLOAD;
        buffer
    }

    /// 清零（每次填充前调用，保证 NUL 之后没有旧数据）
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.len = 0;
        self.truncated = false;
    }

    /// 有效数据
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// 完整的 256 字节存储（含 NUL 结尾）
    pub fn raw(&self) -> &[u8; Self::CAPACITY] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 读取时传输层中的字节数超过了单个缓冲区的容量
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("len", &self.len)
            .field("truncated", &self.truncated)
            .field("data", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}
