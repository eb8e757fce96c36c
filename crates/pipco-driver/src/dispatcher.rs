//! 命令分发器
//!
//! 把摄入线程交来的缓冲区送入 [`FrameDecoder`]，对每个完整的帧执行且只执行一种动作：
//!
//! - 修改运动参数（主轴、进给、快速进给、两种倍率）
//! - 切换标志（伺服电源、伺服初始化、轴复位、循环启动、暂停、进给中止）
//! - 把 G 代码行或 `MOVE` 点动交给调度器的准入检查
//! - 通过串口回传只读报告
//!
//! 无法识别或参数错误的命令被丢弃并计数，控制循环继续运行。

use crate::command::CommandBuffer;
use crate::config::ControllerConfig;
use crate::error::DriverError;
use crate::hal::EncoderSource;
use crate::metrics::MotionMetrics;
use crate::scheduler::BlockScheduler;
use crate::state::MotionContext;
use pipco_protocol::{AXIS_COUNT, Axis, Command, Frame, FrameDecoder, OverrideStep, Report};
use pipco_serial::TxTransport;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// 倍率调整规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideLimits {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

impl OverrideLimits {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            min: config.override_min,
            max: config.override_max,
            step: config.override_step,
        }
    }

    /// 计算调整后的倍率（限制在 `[min, max]`）
    ///
    /// ```
    /// use pipco_driver::OverrideLimits;
    /// use pipco_protocol::OverrideStep;
    ///
    /// let limits = OverrideLimits::default();
    /// assert_eq!(limits.apply(100, OverrideStep::Increase), 110);
    /// assert_eq!(limits.apply(200, OverrideStep::Increase), 200);
    /// assert_eq!(limits.apply(5, OverrideStep::Decrease), 0);
    /// assert_eq!(limits.apply(150, OverrideStep::Reset), 0);
    /// ```
    pub fn apply(&self, current: u32, step: OverrideStep) -> u32 {
        let next = match step {
            OverrideStep::Reset => 0,
            OverrideStep::Increase => current.saturating_add(self.step),
            OverrideStep::Decrease => current.saturating_sub(self.step),
        };
        next.clamp(self.min, self.max)
    }
}

impl Default for OverrideLimits {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// 命令分发器（控制线程独占）
pub struct Dispatcher<W: TxTransport> {
    ctx: Arc<MotionContext>,
    metrics: Arc<MotionMetrics>,
    decoder: FrameDecoder,
    writer: W,
    encoder: Option<Box<dyn EncoderSource>>,
    limits: OverrideLimits,
    line: String,
}

impl<W: TxTransport> Dispatcher<W> {
    pub fn new(
        ctx: Arc<MotionContext>,
        metrics: Arc<MotionMetrics>,
        writer: W,
        limits: OverrideLimits,
    ) -> Self {
        Self {
            ctx,
            metrics,
            decoder: FrameDecoder::new(),
            writer,
            encoder: None,
            limits,
            line: String::with_capacity(128),
        }
    }

    /// 使用硬件编码器响应 `<R_EN>`（否则报告指令位置）
    pub fn with_encoder(mut self, encoder: Box<dyn EncoderSource>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// 处理一个缓冲区中的全部完整帧
    ///
    /// 未闭合的帧保留在解码器中，等待下一个缓冲区。
    pub fn process(&mut self, buffer: &CommandBuffer, scheduler: &mut BlockScheduler) {
        self.process_bytes(buffer.as_bytes(), scheduler);
        self.metrics.buffers_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn process_bytes(&mut self, bytes: &[u8], scheduler: &mut BlockScheduler) {
        for frame in self.decoder.push(bytes) {
            match frame {
                Ok(Frame::Command(body)) => {
                    self.metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    self.handle_command(&body, scheduler);
                },
                Ok(Frame::GCode(line)) => {
                    self.metrics.frames_decoded.fetch_add(1, Ordering::Relaxed);
                    self.handle_gcode(&line, scheduler);
                },
                Err(e) => {
                    self.metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropped frame: {}", e);
                },
            }
        }
    }

    fn handle_command(&mut self, body: &str, scheduler: &mut BlockScheduler) {
        let command = match Command::parse(body) {
            Ok(command) => command,
            Err(e) => {
                self.metrics.commands_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Malformed command <{}>: {}", body, e);
                return;
            },
        };

        match self.execute(command, scheduler) {
            Ok(()) => {
                self.metrics.commands_executed.fetch_add(1, Ordering::Relaxed);
            },
            Err(DriverError::AdmissionRejected { state }) => {
                debug!("<{}> rejected: scheduler is {:?}", body, state);
            },
            Err(e) => warn!("Command <{}> failed: {}", body, e),
        }
    }

    fn handle_gcode(&mut self, line: &str, scheduler: &mut BlockScheduler) {
        match scheduler.submit_gcode(line) {
            Ok(()) => {},
            Err(DriverError::AdmissionRejected { state }) => {
                debug!("G-code {:?} rejected: scheduler is {:?}", line, state);
            },
            Err(e) => {
                self.metrics.commands_malformed.fetch_add(1, Ordering::Relaxed);
                warn!("Malformed G-code {:?}: {}", line, e);
            },
        }
    }

    /// 执行一条已解析的命令
    pub fn execute(
        &mut self,
        command: Command,
        scheduler: &mut BlockScheduler,
    ) -> Result<(), DriverError> {
        let limits = self.limits;
        match command {
            Command::Move(deltas) => scheduler.submit_jog(deltas)?,
            Command::SetSpeed(speed) => self.ctx.update_settings(|s| s.spindle_speed = speed),
            Command::SetFeed(feed) => self.ctx.update_settings(|s| s.feed_rate = feed),
            Command::SetRapidFeed(feed) => self.ctx.update_settings(|s| s.rapid_feed_rate = feed),
            Command::Override(step) => self
                .ctx
                .update_settings(|s| s.override_percent = limits.apply(s.override_percent, step)),
            Command::FeedRateOverride(step) => self.ctx.update_settings(|s| {
                s.feed_rate_override = limits.apply(s.feed_rate_override, step)
            }),
            Command::Read(report) => self.send_report(report)?,
            Command::ServoPowerOn => self.ctx.set_servo_power(true),
            Command::ServoPowerOff => self.ctx.set_servo_power(false),
            Command::ServoInit => {
                self.ctx.request_alarm_clear();
                self.ctx.set_servo_power(true);
            },
            Command::ResetAxis(axis) => self.ctx.request_axis_reset(axis),
            Command::CycleStart => {
                self.ctx.set_feed_hold(false);
                self.ctx.set_feed_abort(false);
                self.ctx.set_cycle_start(true);
            },
            Command::FeedHold => {
                self.ctx.set_feed_hold(true);
                self.ctx.set_cycle_start(false);
            },
            Command::FeedAbort => {
                self.ctx.set_feed_abort(true);
                self.ctx.set_cycle_start(false);
            },
        }
        Ok(())
    }

    /// 刷新编码器（每次控制循环调用）
    pub fn refresh_encoder(&mut self) {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.refresh();
        }
    }

    fn send_report(&mut self, report: Report) -> Result<(), DriverError> {
        self.line.clear();
        let _ = write!(self.line, "<{}:", report.tag());

        match report {
            Report::Encoder => {
                for (i, axis) in Axis::ALL.iter().enumerate() {
                    let count = match self.encoder.as_ref() {
                        Some(encoder) => encoder.count(*axis),
                        None => self.ctx.position(*axis),
                    };
                    push_separator(&mut self.line, i);
                    let _ = write!(self.line, "{}", count);
                }
            },
            Report::MachineCoordinate => {
                let positions = self.ctx.positions();
                self.push_units(positions);
            },
            Report::StopCoordinate => {
                let targets = self.ctx.targets();
                self.push_units(targets);
            },
            Report::RemainingDistance => {
                let remaining = self.ctx.remaining();
                self.push_units(remaining);
            },
        }
        self.line.push_str(">\r\n");

        self.writer.write(self.line.as_bytes())?;
        self.metrics.reports_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn push_units(&mut self, steps: [i64; AXIS_COUNT]) {
        for (i, value) in steps.iter().enumerate() {
            push_separator(&mut self.line, i);
            let _ = write!(self.line, "{:.3}", self.ctx.steps_to_units(*value));
        }
    }
}

fn push_separator(line: &mut String, index: usize) {
    if index > 0 {
        line.push(',');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_state::BlockState;
    use crate::plan::{MotionPlan, plan_channel};
    use crate::scheduler::zero_offsets;
    use crossbeam_channel::Receiver;
    use pipco_serial::{MockHost, MockTransport, MockTx, SplittableTransport};

    struct Rig {
        ctx: Arc<MotionContext>,
        metrics: Arc<MotionMetrics>,
        host: MockHost,
        dispatcher: Dispatcher<MockTx>,
        scheduler: BlockScheduler,
        _plans: Receiver<MotionPlan>,
    }

    impl Rig {
        fn send(&mut self, bytes: &[u8]) {
            self.dispatcher
                .process(&CommandBuffer::from_bytes(bytes), &mut self.scheduler);
        }
    }

    fn rig() -> Rig {
        let ctx = Arc::new(MotionContext::default());
        let metrics = Arc::new(MotionMetrics::new());
        let (transport, host) = MockTransport::pair();
        let (_rx, tx) = transport.split().unwrap();
        let (plan_tx, plan_rx) = plan_channel();
        let scheduler = BlockScheduler::new(ctx.clone(), metrics.clone(), plan_tx, zero_offsets());
        let dispatcher = Dispatcher::new(ctx.clone(), metrics.clone(), tx, OverrideLimits::default());
        Rig {
            ctx,
            metrics,
            host,
            dispatcher,
            scheduler,
            _plans: plan_rx,
        }
    }

    struct FixedEncoder {
        refreshed: u32,
    }

    impl EncoderSource for FixedEncoder {
        fn refresh(&mut self) {
            self.refreshed += 1;
        }

        fn count(&self, axis: Axis) -> i64 {
            (axis.index() as i64 + 1) * 100 + i64::from(self.refreshed)
        }
    }

    #[test]
    fn test_scalar_commands() {
        let mut rig = rig();
        rig.send(b"<SET_FEED:250><SET_RAPID_FEED:5000>\r\n<SET_SPEED:1200>");
        let settings = rig.ctx.settings();
        assert_eq!(settings.feed_rate, 250.0);
        assert_eq!(settings.rapid_feed_rate, 5000.0);
        assert_eq!(settings.spindle_speed, 1200.0);
        assert_eq!(rig.metrics.snapshot().commands_executed, 3);
    }

    #[test]
    fn test_override_commands() {
        let mut rig = rig();
        rig.send(b"<SET_OVERRIDE_+10><SET_OVERRIDE_+10><SET_FEED_RATE_-10>");
        assert_eq!(rig.ctx.settings().override_percent, 120);
        assert_eq!(rig.ctx.settings().feed_rate_override, 90);

        rig.send(b"<SET_OVERRIDE_0>");
        assert_eq!(rig.ctx.settings().override_percent, 0);
        rig.send(b"<SET_OVERRIDE_-10>");
        assert_eq!(rig.ctx.settings().override_percent, 0);
    }

    #[test]
    fn test_flag_commands() {
        let mut rig = rig();
        rig.send(b"<SERVO_POWER_ON><CYST>");
        assert!(rig.ctx.servo_power());
        assert!(rig.ctx.cycle_start());

        rig.send(b"<FHLD>");
        assert!(rig.ctx.feed_hold());
        assert!(!rig.ctx.cycle_start());

        rig.send(b"<FEED_ABORT>");
        assert!(rig.ctx.feed_abort());

        rig.send(b"<CYST>");
        assert!(!rig.ctx.feed_hold());
        assert!(!rig.ctx.feed_abort());

        rig.send(b"<SERVO_POWER_OFF>");
        assert!(!rig.ctx.servo_power());

        rig.send(b"<SERVO_INIT>");
        assert!(rig.ctx.servo_power());
        assert_eq!(rig.ctx.alarm_clear_requests(), 1);

        rig.send(b"<RESET_B>");
        assert_eq!(rig.ctx.reset_requests(Axis::B.index()), 1);
    }

    #[test]
    fn test_malformed_commands_leave_state_unchanged() {
        let mut rig = rig();
        let before = rig.ctx.snapshot();
        rig.send(b"<SET_FEED:abc><SET_FEED:-5><BOGUS><SET_OVERRIDE_+20>\"G2X1\"");
        assert_eq!(rig.ctx.snapshot(), before);

        let metrics = rig.metrics.snapshot();
        assert_eq!(metrics.commands_malformed, 5);
        assert_eq!(metrics.commands_executed, 0);

        // 后续命令照常执行
        rig.send(b"<SET_FEED:10>");
        assert_eq!(rig.ctx.settings().feed_rate, 10.0);
    }

    #[test]
    fn test_gcode_and_move_forwarded_to_scheduler() {
        let mut rig = rig();
        rig.send(b"\"G90G54G1X100.000F1000\"");
        assert_eq!(rig.scheduler.state(), BlockState::Loaded);

        // 非 IDLE：MOVE 被拒绝，不计入已执行
        rig.send(b"<MOVE:1:2:3>");
        assert_eq!(rig.metrics.snapshot().blocks_rejected, 1);
        assert_eq!(rig.metrics.snapshot().commands_executed, 0);
    }

    #[test]
    fn test_partial_frame_across_buffers() {
        let mut rig = rig();
        rig.send(b"<SET_FE");
        assert_eq!(rig.ctx.settings().feed_rate, 1000.0);
        rig.send(b"ED:42>");
        assert_eq!(rig.ctx.settings().feed_rate, 42.0);
    }

    #[test]
    fn test_reports() {
        let mut rig = rig();
        rig.ctx.store_axis(0, 10_000, 30_000, 20_000);
        rig.ctx.store_axis(1, -1_500, -1_500, 0);

        rig.send(b"<R_MC><R_MS><R_RD><R_EN>");
        let lines = rig.host.take_lines();
        assert_eq!(
            lines,
            vec![
                "<R_MC:10.000,-1.500,0.000,0.000,0.000,0.000>".to_string(),
                "<R_MS:30.000,-1.500,0.000,0.000,0.000,0.000>".to_string(),
                "<R_RD:20.000,0.000,0.000,0.000,0.000,0.000>".to_string(),
                "<R_EN:10000,-1500,0,0,0,0>".to_string(),
            ]
        );
        assert_eq!(rig.metrics.snapshot().reports_sent, 4);
    }

    #[test]
    fn test_encoder_report_uses_encoder() {
        let mut rig = rig();
        let (transport, host) = MockTransport::pair();
        let (_rx, tx) = transport.split().unwrap();
        let mut dispatcher = Dispatcher::new(
            rig.ctx.clone(),
            rig.metrics.clone(),
            tx,
            OverrideLimits::default(),
        )
        .with_encoder(Box::new(FixedEncoder { refreshed: 0 }));

        dispatcher.refresh_encoder();
        dispatcher.process_bytes(b"<R_EN>", &mut rig.scheduler);
        assert_eq!(host.take_lines(), vec!["<R_EN:101,201,301,401,501,601>".to_string()]);
    }

    #[test]
    fn test_report_write_failure_is_not_fatal() {
        let mut rig = rig();
        rig.host.disconnect();
        rig.send(b"<R_MC><SET_FEED:7>");
        assert_eq!(rig.ctx.settings().feed_rate, 7.0);
        assert_eq!(rig.metrics.snapshot().reports_sent, 0);
    }
}
