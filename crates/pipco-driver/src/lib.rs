//! # PiPco Motion Driver
//!
//! 六轴 CNC 运动控制核心：
//! - 命令通道：摄入线程轮询串口，按值把 [`CommandBuffer`] 送入有界队列（背压，不丢弃）
//! - 命令分发：[`Dispatcher`] 分帧、解析、修改运动参数或回传报告
//! - 块调度：[`BlockScheduler`] 三态机，单块在途
//! - 脉冲发生：[`PulseGenerator`] 10µs tick，唯一写入轴位置的组件
//! - 状态共享：[`MotionContext`]（原子变量 + ArcSwap 无锁读取）
//!
//! 大多数用户只需要 [`MotionController`] / [`MotionControllerBuilder`]。

mod builder;
pub mod block_state;
pub mod command;
mod config;
mod controller;
pub mod dispatcher;
mod error;
pub mod hal;
pub mod metrics;
pub mod pipeline;
pub mod plan;
pub mod pulse;
pub mod scheduler;
pub mod state;

pub use block_state::{AtomicBlockState, BlockState};
pub use builder::MotionControllerBuilder;
pub use command::CommandBuffer;
pub use config::ControllerConfig;
pub use controller::MotionController;
pub use dispatcher::{Dispatcher, OverrideLimits};
pub use error::DriverError;
pub use hal::{
    CountingStepOutput, EncoderSource, MachineInputs, NoInputs, NullStepOutput, StepDirection,
    StepOutput, SwitchInputs,
};
pub use metrics::{MetricsSnapshot, MotionMetrics};
pub use pipeline::{DeadlineClock, control_loop, ingest_loop, pulse_loop};
pub use plan::{MotionPlan, MoveKind, plan_channel};
pub use pulse::{PulseGenerator, TickOutcome};
pub use scheduler::{BlockScheduler, PendingBlock};
pub use state::{MAX_AXIS_STEPS, MotionContext, MotionSettings, MotionSnapshot};
