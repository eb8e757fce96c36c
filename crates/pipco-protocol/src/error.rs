//! 协议层错误类型定义

use thiserror::Error;

/// 协议解析错误
///
/// 所有错误都是"可恢复"的：调用方丢弃出错的帧，继续处理后续数据。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 未知的命令令牌
    #[error("Unknown command token: {0}")]
    UnknownCommand(String),

    /// 命令参数无效（数量错误、无法解析为数字、超出范围）
    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument {
        command: &'static str,
        reason: String,
    },

    /// 不支持的 G 代码字（如 G2、G20）
    #[error("Unsupported G-code word: {letter}{value}")]
    UnsupportedWord { letter: char, value: f64 },

    /// G 代码字缺少数值或数值无法解析
    #[error("Malformed number in G-code word '{0}'")]
    MalformedNumber(char),

    /// G 代码行中出现无法识别的字符
    #[error("Unexpected character '{0}' in G-code line")]
    UnexpectedChar(char),

    /// 进给速度必须为正数
    #[error("Invalid feed rate: {0}")]
    InvalidFeed(f64),

    /// 帧超过缓冲区长度，已被丢弃
    #[error("Frame exceeds {limit} bytes and was discarded")]
    FrameOverflow { limit: usize },

    /// 帧在闭合前被新的起始符打断
    #[error("Unterminated frame discarded")]
    UnterminatedFrame,

    /// 帧内容不是合法的 UTF-8
    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,
}
