//! 驱动层错误类型定义

use crate::block_state::BlockState;
use pipco_protocol::{Axis, ProtocolError};
use pipco_serial::TransportError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串口传输错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 命令/G 代码解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 通道已关闭（对端线程退出）
    #[error("Channel closed")]
    ChannelClosed,

    /// 通道已满
    #[error("Channel full")]
    ChannelFull,

    /// 调度器不在 IDLE，新块被拒绝
    #[error("Block rejected: scheduler is {state:?}")]
    AdmissionRejected { state: BlockState },

    /// 块目标超出可表示的步数范围
    #[error("Target out of range on axis {axis:?}: {units}")]
    TargetOutOfRange { axis: Axis, units: f64 },

    /// 配置非法
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 线程创建失败
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
