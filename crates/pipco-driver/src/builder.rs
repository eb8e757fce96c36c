//! Builder 模式实现
//!
//! 提供链式构造 [`MotionController`] 的便捷方式，并允许注入硬件实现。

use crate::config::ControllerConfig;
use crate::controller::MotionController;
use crate::error::DriverError;
use crate::hal::{EncoderSource, MachineInputs, NoInputs, NullStepOutput, StepOutput};
use pipco_serial::SplittableTransport;

/// 控制器使用的硬件实现
pub(crate) struct Peripherals {
    pub step_output: Box<dyn StepOutput>,
    pub encoder: Option<Box<dyn EncoderSource>>,
    pub inputs: Box<dyn MachineInputs>,
}

/// MotionController Builder（链式构造）
///
/// # Example
///
/// ```
/// use pipco_driver::{CountingStepOutput, MotionControllerBuilder, SwitchInputs};
/// use pipco_serial::MockTransport;
///
/// let (transport, _host) = MockTransport::pair();
/// let steps = CountingStepOutput::new();
/// let controller = MotionControllerBuilder::new()
///     .block_tick_ms(20)
///     .steps_per_unit(200.0)
///     .step_output(steps.clone())
///     .machine_inputs(SwitchInputs::new())
///     .build(transport)
///     .unwrap();
/// # drop(controller);
/// ```
pub struct MotionControllerBuilder {
    config: ControllerConfig,
    step_output: Option<Box<dyn StepOutput>>,
    encoder: Option<Box<dyn EncoderSource>>,
    inputs: Option<Box<dyn MachineInputs>>,
}

impl MotionControllerBuilder {
    pub fn new() -> Self {
        Self {
            config: ControllerConfig::default(),
            step_output: None,
            encoder: None,
            inputs: None,
        }
    }

    /// 替换整个配置
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// 脉冲周期（微秒）
    pub fn pulse_period_us(mut self, period_us: u64) -> Self {
        self.config.pulse_period_us = period_us;
        self
    }

    /// 调度节拍（毫秒）
    pub fn block_tick_ms(mut self, tick_ms: u64) -> Self {
        self.config.block_tick_ms = tick_ms;
        self
    }

    pub fn steps_per_unit(mut self, steps_per_unit: f64) -> Self {
        self.config.steps_per_unit = steps_per_unit;
        self
    }

    /// 步进脉冲输出（默认丢弃）
    pub fn step_output(mut self, output: impl StepOutput + 'static) -> Self {
        self.step_output = Some(Box::new(output));
        self
    }

    /// 编码器（默认以指令位置响应 `<R_EN>`）
    pub fn encoder(mut self, encoder: impl EncoderSource + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    /// 限位/急停输入（默认无输入）
    pub fn machine_inputs(mut self, inputs: impl MachineInputs + 'static) -> Self {
        self.inputs = Some(Box::new(inputs));
        self
    }

    /// 校验配置并启动控制器
    pub fn build<T: SplittableTransport>(self, transport: T) -> Result<MotionController, DriverError> {
        let peripherals = Peripherals {
            step_output: self
                .step_output
                .unwrap_or_else(|| Box::new(NullStepOutput)),
            encoder: self.encoder,
            inputs: self.inputs.unwrap_or_else(|| Box::new(NoInputs)),
        };
        MotionController::spawn(transport, self.config, peripherals)
    }
}

impl Default for MotionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
