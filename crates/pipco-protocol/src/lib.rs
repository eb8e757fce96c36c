//! # PiPco Protocol
//!
//! PiPco 运动控制器的串口协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `axis`: 轴编号与坐标系定义
//! - `command`: `<...>` 包围的司令命令解析
//! - `frame`: 字节流分帧（`<...>` 与 `"..."`），支持跨批次重组
//! - `gcode`: G 代码块解析与模态状态
//!
//! ## 分帧
//!
//! 串口传输不保证一次接收就是一条完整命令。本 crate 的 [`FrameDecoder`]
//! 会保留未闭合的帧，等待后续字节，而不是把半条命令当作完整命令处理。

pub mod axis;
pub mod command;
mod error;
pub mod frame;
pub mod gcode;

// 重新导出常用类型
pub use axis::*;
pub use command::*;
pub use error::ProtocolError;
pub use frame::*;
pub use gcode::*;
