//! 字节流分帧模块
//!
//! 串口是无边界的字节流，一次轮询读到的数据可能包含多条命令，也可能只有半条。
//! [`FrameDecoder`] 按定界符切分：
//!
//! - `<...>`：司令命令
//! - `"..."`：G 代码行
//!
//! 定界符之外的字节（换行、空格、NUL 等）被忽略。未闭合的帧会保留到下一批数据，
//! 超过 [`MAX_FRAME_LEN`] 的帧被整体丢弃直到遇到闭合符。

use crate::error::ProtocolError;
use smallvec::SmallVec;

/// 单帧最大长度（与 256 字节接收缓冲区扣除 NUL 结尾后一致）
pub const MAX_FRAME_LEN: usize = 255;

const COMMAND_OPEN: u8 = b'<';
const COMMAND_CLOSE: u8 = b'>';
const GCODE_QUOTE: u8 = b'"';

/// 一个完整的帧（已去除定界符）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `<...>` 内的命令主体
    Command(String),
    /// `"..."` 内的 G 代码行
    GCode(String),
}

/// 一次 `push` 产生的解码结果
///
/// 通常一批数据只包含 1-2 帧，栈上预留 4 个位置避免堆分配。
pub type DecodedFrames = SmallVec<[Result<Frame, ProtocolError>; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// 等待起始符
    Idle,
    /// 正在接收 `<...>`
    InCommand,
    /// 正在接收 `"..."`
    InGCode,
    /// 帧溢出，丢弃直到指定的闭合符
    Discarding(u8),
}

/// 跨批次帧重组器
///
/// # Example
///
/// ```
/// use pipco_protocol::{Frame, FrameDecoder};
///
/// let mut decoder = FrameDecoder::new();
/// // 第一批只有半条命令
/// assert!(decoder.push(b"<SET_FE").is_empty());
/// assert!(decoder.is_partial());
///
/// // 第二批补齐
/// let frames = decoder.push(b"ED:100>\"X10\"");
/// assert_eq!(frames.len(), 2);
/// assert_eq!(frames[0], Ok(Frame::Command("SET_FEED:100".to_string())));
/// assert_eq!(frames[1], Ok(Frame::GCode("X10".to_string())));
/// ```
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::Idle,
            pending: Vec::with_capacity(MAX_FRAME_LEN),
        }
    }

    /// 是否有未闭合的帧（等待更多数据）
    pub fn is_partial(&self) -> bool {
        self.state != DecoderState::Idle
    }

    /// 丢弃未闭合的帧
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.pending.clear();
    }

    /// 输入一批字节，返回其中所有已闭合的帧
    pub fn push(&mut self, bytes: &[u8]) -> DecodedFrames {
        let mut out = DecodedFrames::new();

        for &byte in bytes {
            match self.state {
                DecoderState::Idle => match byte {
                    COMMAND_OPEN => self.begin(DecoderState::InCommand),
                    GCODE_QUOTE => self.begin(DecoderState::InGCode),
                    _ => {}, // 帧外字节忽略
                },
                DecoderState::InCommand => match byte {
                    COMMAND_CLOSE => out.push(self.finish(Frame::Command)),
                    COMMAND_OPEN => {
                        // 上一条命令未闭合就开始了新命令
                        out.push(Err(ProtocolError::UnterminatedFrame));
                        self.begin(DecoderState::InCommand);
                    },
                    _ => self.append(byte, COMMAND_CLOSE, &mut out),
                },
                DecoderState::InGCode => match byte {
                    GCODE_QUOTE => out.push(self.finish(Frame::GCode)),
                    _ => self.append(byte, GCODE_QUOTE, &mut out),
                },
                DecoderState::Discarding(close) => {
                    if byte == close {
                        self.state = DecoderState::Idle;
                    }
                },
            }
        }

        out
    }

    fn begin(&mut self, state: DecoderState) {
        self.pending.clear();
        self.state = state;
    }

    fn append(&mut self, byte: u8, close: u8, out: &mut DecodedFrames) {
        if self.pending.len() >= MAX_FRAME_LEN {
            self.pending.clear();
            self.state = DecoderState::Discarding(close);
            out.push(Err(ProtocolError::FrameOverflow {
                limit: MAX_FRAME_LEN,
            }));
            return;
        }
        self.pending.push(byte);
    }

    fn finish(&mut self, make: fn(String) -> Frame) -> Result<Frame, ProtocolError> {
        self.state = DecoderState::Idle;
        let bytes = std::mem::take(&mut self.pending);
        self.pending.reserve(MAX_FRAME_LEN);
        String::from_utf8(bytes)
            .map(make)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
