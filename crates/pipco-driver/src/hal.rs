//! 硬件接口
//!
//! 运动核心通过三个 trait 与板级硬件交互：
//!
//! - [`StepOutput`]：脉冲线程发出步进脉冲（必须无阻塞）
//! - [`EncoderSource`]：控制线程刷新并读取编码器计数
//! - [`MachineInputs`]：控制线程轮询限位开关和急停
//!
//! 本模块同时提供无硬件环境下使用的实现（仿真、测试）。

use pipco_protocol::{AXIS_COUNT, Axis};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// 步进方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Forward,
    Reverse,
}

impl StepDirection {
    /// 由剩余距离的符号决定方向
    pub fn from_remaining(remaining: i64) -> Self {
        if remaining < 0 {
            Self::Reverse
        } else {
            Self::Forward
        }
    }

    /// 每步的位置增量（+1 / -1）
    pub fn delta(self) -> i64 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }
}

/// 步进脉冲输出
///
/// 在脉冲线程中调用，实现不得阻塞、加锁或分配内存。
pub trait StepOutput: Send {
    /// 在指定轴上发出一个脉冲
    fn step(&mut self, axis: Axis, direction: StepDirection);

    /// 驱动器使能（跟随伺服电源）
    fn set_enabled(&mut self, _enabled: bool) {}
}

impl<T: StepOutput + ?Sized> StepOutput for Box<T> {
    fn step(&mut self, axis: Axis, direction: StepDirection) {
        (**self).step(axis, direction)
    }

    fn set_enabled(&mut self, enabled: bool) {
        (**self).set_enabled(enabled)
    }
}

/// 丢弃所有脉冲
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStepOutput;

impl StepOutput for NullStepOutput {
    fn step(&mut self, _axis: Axis, _direction: StepDirection) {}
}

/// 统计脉冲的输出（无锁，可跨线程读取）
///
/// # Example
///
/// ```
/// use pipco_driver::{CountingStepOutput, StepDirection, StepOutput};
/// use pipco_protocol::Axis;
///
/// let mut output = CountingStepOutput::new();
/// let counter = output.clone();
/// output.step(Axis::X, StepDirection::Reverse);
/// assert_eq!(counter.net_steps(Axis::X), -1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CountingStepOutput {
    inner: Arc<StepCounters>,
}

#[derive(Debug, Default)]
struct StepCounters {
    net: [AtomicI64; AXIS_COUNT],
    total: AtomicU64,
    enabled: AtomicBool,
}

impl CountingStepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某轴的净步数（正向 - 反向）
    pub fn net_steps(&self, axis: Axis) -> i64 {
        self.inner.net[axis.index()].load(Ordering::Relaxed)
    }

    /// 所有轴的脉冲总数
    pub fn total_steps(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    /// 驱动器当前是否使能
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }
}

impl StepOutput for CountingStepOutput {
    fn step(&mut self, axis: Axis, direction: StepDirection) {
        self.inner.net[axis.index()].fetch_add(direction.delta(), Ordering::Relaxed);
        self.inner.total.fetch_add(1, Ordering::Relaxed);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// 编码器
pub trait EncoderSource: Send {
    /// 从硬件刷新计数（每次控制循环调用一次）
    fn refresh(&mut self) {}

    /// 读取某轴最近一次刷新的计数
    fn count(&self, axis: Axis) -> i64;
}

/// 外部机床输入（限位、急停）
pub trait MachineInputs: Send {
    fn limit_switch(&mut self) -> bool;
    fn emergency_stop(&mut self) -> bool;
}

/// 没有接任何输入
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInputs;

impl MachineInputs for NoInputs {
    fn limit_switch(&mut self) -> bool {
        false
    }

    fn emergency_stop(&mut self) -> bool {
        false
    }
}

/// 由软件开关驱动的输入（仿真、测试）
///
/// 克隆体共享同一组开关。
#[derive(Debug, Clone, Default)]
pub struct SwitchInputs {
    limit: Arc<AtomicBool>,
    estop: Arc<AtomicBool>,
}

impl SwitchInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_limit_switch(&self, on: bool) {
        self.limit.store(on, Ordering::Release);
    }

    pub fn set_emergency_stop(&self, on: bool) {
        self.estop.store(on, Ordering::Release);
    }
}

impl MachineInputs for SwitchInputs {
    fn limit_switch(&mut self) -> bool {
        self.limit.load(Ordering::Acquire)
    }

    fn emergency_stop(&mut self) -> bool {
        self.estop.load(Ordering::Acquire)
    }
}
