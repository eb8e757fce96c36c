//! # PiPco Serial Transport Layer
//!
//! 串口（USB CDC）传输抽象层。运动核心只依赖这里的 trait，具体的 USB/UART 实现由外部提供。
//!
//! 传输是无边界的字节流：
//! - `available()` 非阻塞地返回当前可读字节数
//! - `read()` 最多读取缓冲区大小的字节，剩余字节保留在传输层
//! - `write()` 发送报告数据
//!
//! 接收与发送运行在不同线程，因此传输需要能拆分为 RX/TX 两半（[`SplittableTransport`]）。

use thiserror::Error;

pub mod mock;

pub use mock::{MockHost, MockRx, MockTransport, MockTx};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport disconnected")]
    Disconnected,
    #[error("Transport timeout")]
    Timeout,
    #[error("Device Error: {0}")]
    Device(String),
}

impl TransportError {
    /// 是否为致命错误（需要停止控制器）
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected | TransportError::Device(_))
    }
}

/// 完整的双向传输
pub trait SerialTransport {
    /// 当前可读字节数（非阻塞）
    fn available(&mut self) -> Result<usize, TransportError>;
    /// 读取最多 `buf.len()` 字节，返回实际读取数
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
    /// 写出全部数据
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// 接收半部（摄入线程独占）
pub trait RxTransport {
    fn available(&mut self) -> Result<usize, TransportError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// 发送半部（控制线程独占）
pub trait TxTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;
}

/// 可拆分为独立 RX/TX 的传输
pub trait SplittableTransport: SerialTransport {
    type Rx: RxTransport + Send + 'static;
    type Tx: TxTransport + Send + 'static;
    fn split(self) -> Result<(Self::Rx, Self::Tx), TransportError>;
}

/// 丢弃所有输出的发送端（无上位机回传时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTx;

impl TxTransport for NullTx {
    fn write(&mut self, _data: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}
