//! 流式传输：把任意 `Read`/`Write` 当作串口
//!
//! 读取在独立线程中阻塞进行，数据块经无界通道交给接收半部，
//! 因此 `available()` 保持非阻塞。输入结束（EOF）后传输仍然可用，
//! 由调用方通过 [`InputStatus`] 决定何时停止控制器。

use crossbeam_channel::{Receiver, Sender, unbounded};
use pipco_serial::{RxTransport, SerialTransport, SplittableTransport, TransportError, TxTransport};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use tracing::{trace, warn};

const READ_CHUNK: usize = 1024;

#[derive(Debug, Default)]
struct InputCounters {
    bytes_read: AtomicU64,
    eof: AtomicBool,
}

/// 输入端状态（读取线程写入，任意线程读取）
#[derive(Debug, Clone, Default)]
pub struct InputStatus {
    inner: Arc<InputCounters>,
}

impl InputStatus {
    /// 已从输入读到的字节数
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read.load(Ordering::Acquire)
    }

    /// 输入是否已结束
    pub fn is_eof(&self) -> bool {
        self.inner.eof.load(Ordering::Acquire)
    }
}

/// 流式传输
pub struct StreamTransport {
    rx: StreamRx,
    tx: StreamTx,
}

/// 接收半部
pub struct StreamRx {
    chunks: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
}

/// 发送半部
pub struct StreamTx {
    writer: Box<dyn Write + Send>,
}

impl StreamTransport {
    /// stdin/stdout
    pub fn stdio() -> io::Result<(Self, InputStatus)> {
        Self::new(io::stdin(), io::stdout())
    }

    /// 启动读取线程并返回传输
    pub fn new<R, W>(reader: R, writer: W) -> io::Result<(Self, InputStatus)>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (chunk_tx, chunks) = unbounded();
        let status = InputStatus::default();

        thread::Builder::new().name("pipco-stdin".into()).spawn({
            let status = status.clone();
            move || read_input(reader, chunk_tx, status)
        })?;

        let transport = Self {
            rx: StreamRx {
                chunks,
                pending: VecDeque::new(),
            },
            tx: StreamTx {
                writer: Box::new(writer),
            },
        };
        Ok((transport, status))
    }
}

fn read_input<R: Read>(mut reader: R, chunks: Sender<Vec<u8>>, status: InputStatus) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                status.inner.bytes_read.fetch_add(n as u64, Ordering::AcqRel);
                if chunks.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Input read failed: {}", e);
                break;
            },
        }
    }
    status.inner.eof.store(true, Ordering::Release);
    trace!("Input reader: end of stream");
}

impl StreamRx {
    fn fill_pending(&mut self) {
        while let Ok(chunk) = self.chunks.try_recv() {
            self.pending.extend(chunk);
        }
    }
}

impl RxTransport for StreamRx {
    fn available(&mut self) -> Result<usize, TransportError> {
        self.fill_pending();
        Ok(self.pending.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.fill_pending();
        let count = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl TxTransport for StreamTx {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl SerialTransport for StreamTransport {
    fn available(&mut self) -> Result<usize, TransportError> {
        self.rx.available()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.rx.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.tx.write(data)
    }
}

impl SplittableTransport for StreamTransport {
    type Rx = StreamRx;
    type Tx = StreamTx;

    fn split(self) -> Result<(StreamRx, StreamTx), TransportError> {
        Ok((self.rx, self.tx))
    }
}
