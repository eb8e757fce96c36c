//! 内存传输（无硬件依赖）
//!
//! 用于测试和仿真：[`MockHost`] 扮演上位机，向控制器注入字节并读取回传的报告。

use crate::{RxTransport, SerialTransport, SplittableTransport, TransportError, TxTransport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

#[derive(Debug, Default)]
struct Shared {
    inbound: Mutex<VecDeque<u8>>,
    outbound: Mutex<Vec<u8>>,
    disconnected: AtomicBool,
}

impl Shared {
    fn check_connected(&self) -> Result<(), TransportError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }

    fn available(&self) -> Result<usize, TransportError> {
        self.check_connected()?;
        Ok(self.inbound.lock().len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_connected()?;
        let mut inbound = self.inbound.lock();
        let count = buf.len().min(inbound.len());
        for (slot, byte) in buf.iter_mut().zip(inbound.drain(..count)) {
            *slot = byte;
        }
        trace!("mock transport: read {} bytes", count);
        Ok(count)
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.check_connected()?;
        self.outbound.lock().extend_from_slice(data);
        Ok(())
    }
}

/// 内存传输（控制器侧）
#[derive(Debug)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// 上位机侧句柄
#[derive(Debug, Clone)]
pub struct MockHost {
    shared: Arc<Shared>,
}

impl MockTransport {
    /// 创建一对连接的传输端点
    ///
    /// # Example
    ///
    /// ```
    /// use pipco_serial::{MockTransport, SerialTransport};
    ///
    /// let (mut transport, host) = MockTransport::pair();
    /// host.send(b"<CYST>");
    /// assert_eq!(transport.available().unwrap(), 6);
    /// ```
    pub fn pair() -> (MockTransport, MockHost) {
        let shared = Arc::new(Shared::default());
        (
            MockTransport {
                shared: shared.clone(),
            },
            MockHost { shared },
        )
    }
}

impl MockHost {
    /// 向控制器发送字节
    pub fn send(&self, data: &[u8]) {
        self.shared.inbound.lock().extend(data.iter().copied());
    }

    /// 控制器尚未读取的字节数
    pub fn pending_inbound(&self) -> usize {
        self.shared.inbound.lock().len()
    }

    /// 取出控制器回传的全部字节
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *self.shared.outbound.lock())
    }

    /// 取出回传数据并按行拆分
    pub fn take_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.take_output())
            .lines()
            .map(str::to_string)
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// 模拟断线
    pub fn disconnect(&self) {
        self.shared.disconnected.store(true, Ordering::Release);
    }
}

impl SerialTransport for MockTransport {
    fn available(&mut self) -> Result<usize, TransportError> {
        self.shared.available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.shared.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.write(data)
    }
}

/// 接收半部
#[derive(Debug)]
pub struct MockRx {
    shared: Arc<Shared>,
}

/// 发送半部
#[derive(Debug)]
pub struct MockTx {
    shared: Arc<Shared>,
}

impl RxTransport for MockRx {
    fn available(&mut self) -> Result<usize, TransportError> {
        self.shared.available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.shared.read(buf)
    }
}

impl TxTransport for MockTx {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.shared.write(data)
    }
}

impl SplittableTransport for MockTransport {
    type Rx = MockRx;
    type Tx = MockTx;

    fn split(self) -> Result<(MockRx, MockTx), TransportError> {
        Ok((
            MockRx {
                shared: self.shared.clone(),
            },
            MockTx {
                shared: self.shared,
            },
        ))
    }
}
