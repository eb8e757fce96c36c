//! 脉冲发生器
//!
//! 运行在固定的高频 tick 上（默认 10µs），是系统中唯一写入 `position`/`target`/`remaining`
//! 的组件。每个 tick：
//!
//! 1. 空闲时非阻塞地取下一个 [`MotionPlan`]，先执行计划记录的轴复位再启动它；
//!    没有计划时执行所有待处理的复位
//! 2. 进给中止、急停或限位：丢弃剩余距离，块以"中止"结束
//! 3. 暂停（feed hold）：所有轴保持不动，剩余距离保留
//! 4. 由参数快照计算合成路径速度，再按各轴比例得到脉冲间隔；相位累加到间隔时发出一步。
//!    主导轴每个 tick 最多一步，超出时所有轴按同一比例降速（计入 `speed_limited_ticks`）
//! 5. 所有轴剩余距离归零后发布 `completed_seq`
//!
//! tick 内不加锁、不分配内存、不写日志。

use crate::hal::{StepDirection, StepOutput};
use crate::metrics::MotionMetrics;
use crate::plan::{MotionPlan, MoveKind};
use crate::state::{MotionContext, MotionSettings};
use crossbeam_channel::Receiver;
use pipco_protocol::{AXIS_COUNT, Axis, AxisArray};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const MICROS_PER_MINUTE: f64 = 60.0 * 1_000_000.0;

/// 单个 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 没有活动的块
    Idle,
    /// 块执行中
    Moving,
    /// 暂停中
    Held,
    /// 块在本 tick 完成
    Completed { seq: u64 },
    /// 块在本 tick 被中止
    Aborted { seq: u64 },
}

#[derive(Debug, Clone, Copy)]
struct ActivePlan {
    seq: u64,
    kind: MoveKind,
    axis_share: AxisArray<f64>,
    dominant_share: f64,
}

/// 合成路径速度（步/微秒）
///
/// 进给单位为"单位/分钟"，倍率为百分比。
pub fn path_steps_per_us(settings: &MotionSettings, kind: MoveKind, steps_per_unit: f64) -> f64 {
    let (rate, percent) = match kind {
        MoveKind::Rapid => (settings.rapid_feed_rate, settings.override_percent),
        MoveKind::Feed => (settings.feed_rate, settings.feed_rate_override),
    };
    rate * steps_per_unit * f64::from(percent) / 100.0 / MICROS_PER_MINUTE
}

/// 脉冲发生器
pub struct PulseGenerator<O: StepOutput> {
    ctx: Arc<MotionContext>,
    metrics: Arc<MotionMetrics>,
    plans: Receiver<MotionPlan>,
    output: O,

    active: Option<ActivePlan>,
    position: AxisArray<i64>,
    target: AxisArray<i64>,
    remaining: AxisArray<i64>,
    phase_us: AxisArray<f64>,

    seen_resets: [u32; AXIS_COUNT],
    seen_alarm_clear: u32,
    output_enabled: bool,
}

impl<O: StepOutput> PulseGenerator<O> {
    pub fn new(
        ctx: Arc<MotionContext>,
        metrics: Arc<MotionMetrics>,
        plans: Receiver<MotionPlan>,
        output: O,
    ) -> Self {
        let seen_resets: [u32; AXIS_COUNT] = std::array::from_fn(|i| ctx.reset_requests(i));
        for (i, &requests) in seen_resets.iter().enumerate() {
            ctx.mark_reset_applied(i, requests);
        }
        Self {
            position: ctx.positions(),
            target: ctx.targets(),
            remaining: ctx.remaining(),
            phase_us: [0.0; AXIS_COUNT],
            seen_alarm_clear: ctx.alarm_clear_requests(),
            seen_resets,
            active: None,
            output_enabled: false,
            ctx,
            metrics,
            plans,
            output,
        }
    }

    /// 是否有正在执行的块
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// 执行一个 tick
    ///
    /// `elapsed_us` 为距上一个 tick 的时间，正常情况下等于脉冲周期。
    pub fn tick(&mut self, elapsed_us: f64) -> TickOutcome {
        self.metrics.pulse_ticks.fetch_add(1, Ordering::Relaxed);
        self.sync_output_enable();
        self.sync_alarm_clear();

        if self.active.is_none() {
            // 先读请求计数再取计划：读到的请求若晚于某个计划，该计划一定已在通道中
            let requested: [u32; AXIS_COUNT] = std::array::from_fn(|i| self.ctx.reset_requests(i));
            match self.plans.try_recv() {
                Ok(plan) => {
                    self.apply_resets(&plan.reset_marks);
                    self.activate(&plan);
                },
                Err(_) => {
                    self.apply_resets(&requested);
                    return TickOutcome::Idle;
                },
            }
        }
        let Some(active) = self.active else {
            return TickOutcome::Idle;
        };

        if self.ctx.feed_abort() || self.ctx.emergency_stop() || self.ctx.limit_switch() {
            self.abort();
            return TickOutcome::Aborted { seq: active.seq };
        }

        if self.ctx.feed_hold() {
            return TickOutcome::Held;
        }

        let speed = {
            let settings = self.ctx.settings_guard();
            path_steps_per_us(&settings, active.kind, self.ctx.steps_per_unit())
        };

        // 倍率为 0 时停在原地，剩余距离保留
        if speed > 0.0 {
            self.advance(&active, speed, elapsed_us);
        }

        if self.remaining.iter().all(|&r| r == 0) {
            self.finish(active.seq);
            self.metrics.blocks_completed.fetch_add(1, Ordering::Relaxed);
            return TickOutcome::Completed { seq: active.seq };
        }
        TickOutcome::Moving
    }

    /// 记录一次截止时间错过：计数、更新最大延迟、置位实时报警
    ///
    /// 返回是否为新的报警。
    pub fn record_deadline_miss(&self, lateness: Duration) -> bool {
        let lateness_us = u64::try_from(lateness.as_micros()).unwrap_or(u64::MAX);
        self.metrics.deadline_misses.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .max_tick_lateness_us
            .fetch_max(lateness_us, Ordering::Relaxed);
        let was_raised = self.ctx.deadline_alarm();
        self.ctx.set_deadline_alarm(true);
        !was_raised
    }

    /// 关闭驱动器使能（线程退出时调用）
    pub fn disable_output(&mut self) {
        if self.output_enabled {
            self.output.set_enabled(false);
            self.output_enabled = false;
        }
    }

    fn advance(&mut self, active: &ActivePlan, speed: f64, elapsed_us: f64) {
        let period_us = self.ctx.pulse_period_us();
        let limited = speed * active.dominant_share * period_us > 1.0;
        if limited {
            self.metrics.speed_limited_ticks.fetch_add(1, Ordering::Relaxed);
        }

        let mut steps = 0;
        for i in 0..AXIS_COUNT {
            let remaining = self.remaining[i];
            let share = active.axis_share[i];
            if remaining == 0 || share <= 0.0 {
                continue;
            }
            let interval_us = if limited {
                period_us * active.dominant_share / share
            } else {
                1.0 / (speed * share)
            };

            self.phase_us[i] += elapsed_us;
            if self.phase_us[i] < interval_us {
                continue;
            }
            // 每个 tick 每轴最多一步，积压不超过一个间隔
            self.phase_us[i] = (self.phase_us[i] - interval_us).min(interval_us);

            let direction = StepDirection::from_remaining(remaining);
            self.output.step(Axis::ALL[i], direction);
            self.position[i] += direction.delta();
            self.remaining[i] -= direction.delta();
            self.ctx
                .store_progress(i, self.position[i], self.remaining[i]);
            steps += 1;

            if self.remaining[i] == 0 {
                self.phase_us[i] = 0.0;
            }
        }
        if steps > 0 {
            self.metrics.steps_emitted.fetch_add(steps, Ordering::Relaxed);
        }
    }

    fn activate(&mut self, plan: &MotionPlan) {
        for i in 0..AXIS_COUNT {
            self.target[i] = self.position[i].saturating_add(plan.deltas[i]);
            self.remaining[i] = plan.deltas[i];
            self.phase_us[i] = 0.0;
            self.ctx
                .store_axis(i, self.position[i], self.target[i], self.remaining[i]);
        }
        self.active = Some(ActivePlan {
            seq: plan.seq,
            kind: plan.kind,
            axis_share: plan.axis_share,
            dominant_share: plan.dominant_share(),
        });
    }

    fn abort(&mut self) {
        let Some(active) = self.active else {
            return;
        };
        for i in 0..AXIS_COUNT {
            self.target[i] = self.position[i];
            self.remaining[i] = 0;
            self.ctx
                .store_axis(i, self.position[i], self.target[i], self.remaining[i]);
        }
        self.metrics.blocks_aborted.fetch_add(1, Ordering::Relaxed);
        self.finish(active.seq);
    }

    fn finish(&mut self, seq: u64) {
        self.active = None;
        self.phase_us = [0.0; AXIS_COUNT];
        self.ctx.publish_completion(seq);
    }

    /// 执行到 `marks` 为止的轴复位
    ///
    /// 只在两个块之间调用；执行中的请求推迟到块结束。
    fn apply_resets(&mut self, marks: &[u32; AXIS_COUNT]) {
        for i in 0..AXIS_COUNT {
            if marks[i] <= self.seen_resets[i] {
                continue;
            }
            self.seen_resets[i] = marks[i];
            self.position[i] = 0;
            self.target[i] = 0;
            self.remaining[i] = 0;
            self.ctx.store_axis(i, 0, 0, 0);
            self.ctx.mark_reset_applied(i, marks[i]);
        }
    }

    fn sync_output_enable(&mut self) {
        let power = self.ctx.servo_power();
        if power != self.output_enabled {
            self.output.set_enabled(power);
            self.output_enabled = power;
        }
    }

    fn sync_alarm_clear(&mut self) {
        let requests = self.ctx.alarm_clear_requests();
        if requests != self.seen_alarm_clear {
            self.seen_alarm_clear = requests;
            self.ctx.set_deadline_alarm(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::CountingStepOutput;
    use crate::plan::plan_channel;
    use crossbeam_channel::Sender;

    struct Rig {
        ctx: Arc<MotionContext>,
        metrics: Arc<MotionMetrics>,
        plans: Sender<MotionPlan>,
        counter: CountingStepOutput,
        pulse: PulseGenerator<CountingStepOutput>,
    }

    fn rig() -> Rig {
        let ctx = Arc::new(MotionContext::default());
        let metrics = Arc::new(MotionMetrics::new());
        let (plans, plan_rx) = plan_channel();
        let counter = CountingStepOutput::new();
        let pulse = PulseGenerator::new(ctx.clone(), metrics.clone(), plan_rx, counter.clone());
        Rig {
            ctx,
            metrics,
            plans,
            counter,
            pulse,
        }
    }

    fn run_until_done(pulse: &mut PulseGenerator<CountingStepOutput>, max_ticks: usize) -> TickOutcome {
        for _ in 0..max_ticks {
            match pulse.tick(10.0) {
                outcome @ (TickOutcome::Completed { .. } | TickOutcome::Aborted { .. }) => {
                    return outcome;
                },
                _ => {},
            }
        }
        panic!("plan did not finish within {} ticks", max_ticks);
    }

    #[test]
    fn test_path_speed_uses_matching_override() {
        let settings = MotionSettings {
            feed_rate: 600.0,
            rapid_feed_rate: 6000.0,
            override_percent: 50,
            feed_rate_override: 200,
            ..Default::default()
        };
        // 600 单位/分钟 * 1000 步/单位 * 200% = 20000 步/秒
        let feed = path_steps_per_us(&settings, MoveKind::Feed, 1000.0);
        assert!((feed - 0.02).abs() < 1e-12);
        // 6000 * 1000 * 50% = 50000 步/秒
        let rapid = path_steps_per_us(&settings, MoveKind::Rapid, 1000.0);
        assert!((rapid - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_idle_without_plan() {
        let mut rig = rig();
        assert_eq!(rig.pulse.tick(10.0), TickOutcome::Idle);
        assert!(!rig.pulse.is_active());
        assert_eq!(rig.metrics.snapshot().pulse_ticks, 1);
    }

    #[test]
    fn test_plan_runs_to_completion() {
        let mut rig = rig();
        let deltas = [1500, -700, 20, 0, 0, -3];
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, deltas))
            .unwrap();

        let outcome = run_until_done(&mut rig.pulse, 100_000);
        assert_eq!(outcome, TickOutcome::Completed { seq: 1 });

        let snapshot = rig.ctx.snapshot();
        assert_eq!(snapshot.position, deltas);
        assert_eq!(snapshot.target, deltas);
        assert_eq!(snapshot.remaining, [0; AXIS_COUNT]);
        assert_eq!(snapshot.completed_seq, 1);
        assert_eq!(rig.counter.net_steps(Axis::Y), -700);
        assert_eq!(rig.counter.total_steps(), 1500 + 700 + 20 + 3);
    }

    #[test]
    fn test_remaining_decreases_monotonically() {
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Feed, [300, 200, 0, 0, 0, 0]))
            .unwrap();

        let mut last = [i64::MAX; 2];
        loop {
            let outcome = rig.pulse.tick(10.0);
            let snapshot = rig.ctx.snapshot();
            assert!(snapshot.is_consistent());
            for (i, previous) in last.iter_mut().enumerate() {
                assert!(snapshot.remaining[i] <= *previous);
                *previous = snapshot.remaining[i];
            }
            if matches!(outcome, TickOutcome::Completed { .. }) {
                break;
            }
        }
    }

    #[test]
    fn test_at_most_one_step_per_axis_per_tick() {
        let mut rig = rig();
        rig.ctx.update_settings(|s| s.rapid_feed_rate = 1_000_000.0);
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, [50, 0, 0, 0, 0, 0]))
            .unwrap();

        let mut ticks = 0;
        while !matches!(rig.pulse.tick(10.0), TickOutcome::Completed { .. }) {
            ticks += 1;
        }
        assert_eq!(ticks + 1, 50);
    }

    #[test]
    fn test_feed_hold_preserves_remaining() {
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, [1000, 0, 0, 0, 0, 0]))
            .unwrap();
        for _ in 0..100 {
            rig.pulse.tick(10.0);
        }
        rig.ctx.set_feed_hold(true);
        let held_at = rig.ctx.snapshot();
        for _ in 0..1000 {
            assert_eq!(rig.pulse.tick(10.0), TickOutcome::Held);
        }
        assert_eq!(rig.ctx.snapshot().position, held_at.position);
        assert!(held_at.remaining[0] > 0);

        rig.ctx.set_feed_hold(false);
        assert_eq!(
            run_until_done(&mut rig.pulse, 100_000),
            TickOutcome::Completed { seq: 1 }
        );
        assert_eq!(rig.ctx.position(Axis::X), 1000);
    }

    #[test]
    fn test_feed_abort_discards_remaining() {
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(4, MoveKind::Rapid, [0, 5000, 0, 0, 0, 0]))
            .unwrap();
        for _ in 0..100 {
            rig.pulse.tick(10.0);
        }
        rig.ctx.set_feed_abort(true);
        assert_eq!(rig.pulse.tick(10.0), TickOutcome::Aborted { seq: 4 });

        let snapshot = rig.ctx.snapshot();
        assert_eq!(snapshot.remaining, [0; AXIS_COUNT]);
        assert_eq!(snapshot.target, snapshot.position);
        assert!(snapshot.position[1] > 0 && snapshot.position[1] < 5000);
        assert_eq!(snapshot.completed_seq, 4);
        assert_eq!(rig.metrics.snapshot().blocks_aborted, 1);
    }

    #[test]
    fn test_emergency_stop_aborts() {
        let mut rig = rig();
        rig.ctx.set_emergency_stop(true);
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Feed, [10, 0, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(rig.pulse.tick(10.0), TickOutcome::Aborted { seq: 1 });
        assert_eq!(rig.counter.total_steps(), 0);
    }

    #[test]
    fn test_zero_override_stalls_without_losing_distance() {
        let mut rig = rig();
        rig.ctx.update_settings(|s| s.feed_rate_override = 0);
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Feed, [10, 0, 0, 0, 0, 0]))
            .unwrap();
        for _ in 0..10_000 {
            assert_eq!(rig.pulse.tick(10.0), TickOutcome::Moving);
        }
        assert_eq!(rig.ctx.remaining()[0], 10);
    }

    #[test]
    fn test_axis_reset_applies_between_blocks() {
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, [20, 30, 0, 0, 0, 0]))
            .unwrap();
        rig.pulse.tick(10.0);
        // 执行中：推迟
        rig.ctx.request_axis_reset(Axis::X);
        run_until_done(&mut rig.pulse, 10_000);
        assert_eq!(rig.ctx.position(Axis::X), 20);

        assert_eq!(rig.pulse.tick(10.0), TickOutcome::Idle);
        assert_eq!(rig.ctx.position(Axis::X), 0);
        assert_eq!(rig.ctx.position(Axis::Y), 30);
        assert!(rig.ctx.snapshot().is_consistent());
    }

    #[test]
    fn test_servo_power_drives_output_enable() {
        let mut rig = rig();
        rig.pulse.tick(10.0);
        assert!(!rig.counter.is_enabled());
        rig.ctx.set_servo_power(true);
        rig.pulse.tick(10.0);
        assert!(rig.counter.is_enabled());
        rig.ctx.set_servo_power(false);
        rig.pulse.tick(10.0);
        assert!(!rig.counter.is_enabled());
    }

    #[test]
    fn test_deadline_miss_recorded_and_cleared() {
        let mut rig = rig();
        assert!(rig.pulse.record_deadline_miss(Duration::from_micros(35)));
        assert!(!rig.pulse.record_deadline_miss(Duration::from_micros(12)));
        assert!(rig.ctx.deadline_alarm());

        let metrics = rig.metrics.snapshot();
        assert_eq!(metrics.deadline_misses, 2);
        assert_eq!(metrics.max_tick_lateness_us, 35);

        rig.ctx.request_alarm_clear();
        rig.pulse.tick(10.0);
        assert!(!rig.ctx.deadline_alarm());
        // 清除后再次错过是新的报警
        assert!(rig.pulse.record_deadline_miss(Duration::from_micros(20)));
    }

    #[test]
    fn test_speed_limit_keeps_path_linear() {
        // 默认快速进给 10000 单位/分钟 * 1000 步/单位 ≈ 166667 步/秒，超过 10µs tick 的上限
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, [10_000, 1_000, 0, 0, 0, 0]))
            .unwrap();

        let mut ticks = 0;
        loop {
            let outcome = rig.pulse.tick(10.0);
            ticks += 1;
            let position = rig.ctx.positions();
            // Y 始终跟随 X 的十分之一
            assert!(
                (position[1] * 10 - position[0]).abs() <= 20,
                "path deviates at tick {}: {:?}",
                ticks,
                position
            );
            if matches!(outcome, TickOutcome::Completed { .. }) {
                break;
            }
            assert!(ticks < 20_000);
        }
        assert!((10_000..=10_020).contains(&ticks));
        assert_eq!(rig.ctx.positions()[..2], [10_000, 1_000]);
        assert!(rig.metrics.snapshot().speed_limited_ticks > 0);
    }

    #[test]
    fn test_slow_moves_not_limited() {
        let mut rig = rig();
        rig.plans
            .try_send(MotionPlan::new(1, MoveKind::Feed, [100, 50, 0, 0, 0, 0]))
            .unwrap();
        run_until_done(&mut rig.pulse, 100_000);
        assert_eq!(rig.metrics.snapshot().speed_limited_ticks, 0);
    }

    #[test]
    fn test_plan_applies_its_resets_before_starting() {
        let ctx = Arc::new(MotionContext::default());
        ctx.store_axis(Axis::X.index(), 500, 500, 0);
        let (plans, plan_rx) = plan_channel();
        let mut pulse = PulseGenerator::new(
            ctx.clone(),
            Arc::new(MotionMetrics::new()),
            plan_rx,
            CountingStepOutput::new(),
        );

        // 计划基于复位之后的零点计算；之后又来了一次复位请求
        ctx.request_axis_reset(Axis::X);
        let marks = std::array::from_fn(|i| ctx.reset_requests(i));
        plans
            .try_send(MotionPlan::new(1, MoveKind::Rapid, [20, 0, 0, 0, 0, 0]).with_reset_marks(marks))
            .unwrap();
        ctx.request_axis_reset(Axis::X);

        assert_eq!(run_until_done(&mut pulse, 10_000), TickOutcome::Completed { seq: 1 });
        assert_eq!(ctx.position(Axis::X), 20);
        assert_eq!(ctx.applied_resets(Axis::X.index()), 1);

        // 第二次复位在块结束后生效
        assert_eq!(pulse.tick(10.0), TickOutcome::Idle);
        assert_eq!(ctx.position(Axis::X), 0);
        assert_eq!(ctx.applied_resets(Axis::X.index()), 2);
    }
}
