//! 集成测试公共工具：同步驱动调度器和脉冲发生器，不启动线程

#![allow(dead_code)]

use pipco_driver::{
    BlockScheduler, BlockState, CommandBuffer, ControllerConfig, CountingStepOutput, Dispatcher,
    MotionContext, MotionMetrics, OverrideLimits, PulseGenerator, TickOutcome, plan_channel,
};
use pipco_serial::{MockHost, MockTransport, MockTx, SplittableTransport};
use std::sync::Arc;

/// 脉冲周期（微秒）
pub const PULSE_PERIOD_US: f64 = 10.0;
/// 一个调度节拍（100ms）内的脉冲 tick 数
pub const PULSES_PER_BLOCK_TICK: usize = 10_000;

pub struct Rig {
    pub ctx: Arc<MotionContext>,
    pub metrics: Arc<MotionMetrics>,
    pub host: MockHost,
    pub dispatcher: Dispatcher<MockTx>,
    pub scheduler: BlockScheduler,
    pub pulse: PulseGenerator<CountingStepOutput>,
    pub steps: CountingStepOutput,
    /// 脉冲发生器结束（完成或中止）的块数
    pub pulse_finished: u64,
    /// 观察到的最大在途块数
    pub max_in_flight: u64,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(&ControllerConfig::default())
    }

    pub fn with_config(config: &ControllerConfig) -> Self {
        let ctx = Arc::new(MotionContext::new(config));
        let metrics = Arc::new(MotionMetrics::new());
        let (transport, host) = MockTransport::pair();
        let (_rx, tx) = transport.split().unwrap();
        let (plan_tx, plan_rx) = plan_channel();
        let steps = CountingStepOutput::new();

        Self {
            dispatcher: Dispatcher::new(
                ctx.clone(),
                metrics.clone(),
                tx,
                OverrideLimits::from_config(config),
            ),
            scheduler: BlockScheduler::new(
                ctx.clone(),
                metrics.clone(),
                plan_tx,
                config.work_offsets,
            ),
            pulse: PulseGenerator::new(ctx.clone(), metrics.clone(), plan_rx, steps.clone()),
            steps,
            ctx,
            metrics,
            host,
            pulse_finished: 0,
            max_in_flight: 0,
        }
    }

    /// 模拟摄入线程交来一个缓冲区
    pub fn send(&mut self, bytes: &[u8]) {
        self.dispatcher
            .process(&CommandBuffer::from_bytes(bytes), &mut self.scheduler);
    }

    /// 提交一行 G 代码（自动加引号）
    pub fn send_gcode(&mut self, line: &str) {
        self.send(format!("\"{}\"", line).as_bytes());
    }

    pub fn state(&self) -> BlockState {
        self.scheduler.state()
    }

    pub fn run_pulses(&mut self, count: usize) {
        for _ in 0..count {
            if matches!(
                self.pulse.tick(PULSE_PERIOD_US),
                TickOutcome::Completed { .. } | TickOutcome::Aborted { .. }
            ) {
                self.pulse_finished += 1;
            }
        }
    }

    /// 交替运行调度 tick 和一个节拍的脉冲，直到调度器回到 IDLE
    ///
    /// 返回所用的调度 tick 数。
    pub fn run_until_idle(&mut self, max_block_ticks: usize) -> usize {
        for n in 1..=max_block_ticks {
            let state = self.scheduler.tick();
            self.track_in_flight();
            if state.is_idle() {
                return n;
            }
            self.run_pulses(PULSES_PER_BLOCK_TICK);
        }
        panic!("scheduler did not return to IDLE within {} ticks", max_block_ticks);
    }

    fn track_in_flight(&mut self) {
        let started = self.metrics.snapshot().blocks_started;
        self.max_in_flight = self
            .max_in_flight
            .max(started.saturating_sub(self.pulse_finished));
    }

    pub fn position_units(&self) -> [f64; 6] {
        self.ctx.position_units()
    }
}
