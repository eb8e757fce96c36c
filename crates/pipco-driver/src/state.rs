//! 运动状态存储
//!
//! [`MotionContext`] 是三个线程共享的唯一状态实例。写入遵循"每个字段只有一个写者"：
//!
//! | 字段 | 写者 |
//! |------|------|
//! | `position` / `target` / `remaining` | 脉冲线程 |
//! | `completed_seq` / `deadline_alarm` / 已生效的轴复位计数 | 脉冲线程 |
//! | `settings`（进给、倍率、主轴、坐标系） | 控制线程（分发器、调度器） |
//! | `servo_power` / `cycle_start` / `feed_hold` / `feed_abort` | 控制线程（分发器） |
//! | `limit_switch` / `emergency_stop` | 控制线程（外部输入同步） |
//! | 请求计数器（轴复位、清除报警） | 控制线程 |
//! | `block_state` | 控制线程（调度器） |
//!
//! 脉冲线程只使用原子操作和 `ArcSwap::load`，从不加锁。
//!
//! 位置以整数步数存储；报告和 G 代码使用的单位（mm/度）通过 `steps_per_unit` 换算。
//! 步数限制在 `±MAX_AXIS_STEPS` 内，超出范围的目标在启动块之前就被拒绝。

use crate::block_state::{AtomicBlockState, BlockState};
use crate::config::ControllerConfig;
use arc_swap::ArcSwap;
use pipco_protocol::{AXIS_COUNT, Axis, AxisArray, CoordinateSystem};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

/// 轴位置的可表示范围（步），`f64` 在此范围内可精确表示整数
pub const MAX_AXIS_STEPS: i64 = 1 << 53;

/// 由命令修改的运动参数（温数据）
///
/// 控制线程整体替换（`ArcSwap::rcu`），脉冲线程每个 tick 读取一次快照。
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSettings {
    /// 切削进给（单位/分钟）
    pub feed_rate: f64,
    /// 快速进给（单位/分钟）
    pub rapid_feed_rate: f64,
    /// 快速倍率（百分比），作用于 G0 和 MOVE
    pub override_percent: u32,
    /// 进给倍率（百分比），作用于 G1
    pub feed_rate_override: u32,
    /// 主轴转速
    pub spindle_speed: f64,
    /// 当前工件坐标系
    pub coordinate_system: CoordinateSystem,
}

impl MotionSettings {
    /// 上电默认值
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            feed_rate: config.default_feed_rate,
            rapid_feed_rate: config.default_rapid_feed_rate,
            override_percent: 100,
            feed_rate_override: 100,
            spindle_speed: 0.0,
            coordinate_system: CoordinateSystem::default(),
        }
    }
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfig::default())
    }
}

/// 共享运动状态
#[derive(Debug)]
pub struct MotionContext {
    steps_per_unit: f64,
    pulse_period_us: f64,

    // === 热数据：脉冲线程写 ===
    position: [AtomicI64; AXIS_COUNT],
    target: [AtomicI64; AXIS_COUNT],
    remaining: [AtomicI64; AXIS_COUNT],
    completed_seq: AtomicU64,
    deadline_alarm: AtomicBool,
    applied_resets: [AtomicU32; AXIS_COUNT],

    // === 温数据：控制线程写 ===
    settings: ArcSwap<MotionSettings>,
    block_state: AtomicBlockState,

    servo_power: AtomicBool,
    cycle_start: AtomicBool,
    feed_hold: AtomicBool,
    feed_abort: AtomicBool,
    limit_switch: AtomicBool,
    emergency_stop: AtomicBool,

    // === 请求计数器：控制线程递增，脉冲线程比较 ===
    reset_requests: [AtomicU32; AXIS_COUNT],
    alarm_clear_requests: AtomicU32,
}

impl MotionContext {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            steps_per_unit: config.steps_per_unit,
            pulse_period_us: config.pulse_period_us as f64,
            position: Default::default(),
            target: Default::default(),
            remaining: Default::default(),
            completed_seq: AtomicU64::new(0),
            deadline_alarm: AtomicBool::new(false),
            applied_resets: Default::default(),
            settings: ArcSwap::from_pointee(MotionSettings::from_config(config)),
            block_state: AtomicBlockState::default(),
            servo_power: AtomicBool::new(false),
            cycle_start: AtomicBool::new(false),
            feed_hold: AtomicBool::new(false),
            feed_abort: AtomicBool::new(false),
            limit_switch: AtomicBool::new(false),
            emergency_stop: AtomicBool::new(false),
            reset_requests: Default::default(),
            alarm_clear_requests: AtomicU32::new(0),
        }
    }

    // ------------------------------------------------------------------
    // 单位换算
    // ------------------------------------------------------------------

    pub fn steps_per_unit(&self) -> f64 {
        self.steps_per_unit
    }

    /// 脉冲周期（微秒）
    pub fn pulse_period_us(&self) -> f64 {
        self.pulse_period_us
    }

    /// 单位 → 步数（四舍五入）
    ///
    /// 结果不是有限值或超出 `±MAX_AXIS_STEPS` 时返回 `None`。
    pub fn units_to_steps(&self, units: f64) -> Option<i64> {
        let steps = (units * self.steps_per_unit).round();
        (steps.is_finite() && steps.abs() <= MAX_AXIS_STEPS as f64).then_some(steps as i64)
    }

    /// 步数 → 单位
    pub fn steps_to_units(&self, steps: i64) -> f64 {
        steps as f64 / self.steps_per_unit
    }

    // ------------------------------------------------------------------
    // 轴数据
    // ------------------------------------------------------------------

    pub fn position(&self, axis: Axis) -> i64 {
        self.position[axis.index()].load(Ordering::Relaxed)
    }

    pub fn positions(&self) -> AxisArray<i64> {
        load_all(&self.position)
    }

    pub fn targets(&self) -> AxisArray<i64> {
        load_all(&self.target)
    }

    pub fn remaining(&self) -> AxisArray<i64> {
        load_all(&self.remaining)
    }

    /// 当前机械坐标（单位）
    pub fn position_units(&self) -> AxisArray<f64> {
        self.positions().map(|steps| self.steps_to_units(steps))
    }

    pub(crate) fn store_axis(&self, index: usize, position: i64, target: i64, remaining: i64) {
        self.position[index].store(position, Ordering::Relaxed);
        self.target[index].store(target, Ordering::Relaxed);
        self.remaining[index].store(remaining, Ordering::Relaxed);
    }

    pub(crate) fn store_progress(&self, index: usize, position: i64, remaining: i64) {
        self.position[index].store(position, Ordering::Relaxed);
        self.remaining[index].store(remaining, Ordering::Relaxed);
    }

    /// 发布块结束
    ///
    /// `Release` 保证调度器看到 `seq` 时也能看到此前写入的所有轴数据。
    pub(crate) fn publish_completion(&self, seq: u64) {
        self.completed_seq.store(seq, Ordering::Release);
    }

    /// 最近结束的块序号
    pub fn completed_seq(&self) -> u64 {
        self.completed_seq.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 参数
    // ------------------------------------------------------------------

    /// 当前参数快照
    pub fn settings(&self) -> Arc<MotionSettings> {
        self.settings.load_full()
    }

    /// 无分配地读取参数（脉冲线程使用）
    pub(crate) fn settings_guard(&self) -> arc_swap::Guard<Arc<MotionSettings>> {
        self.settings.load()
    }

    /// 修改参数
    pub(crate) fn update_settings(&self, f: impl Fn(&mut MotionSettings)) {
        self.settings.rcu(|current| {
            let mut next = MotionSettings::clone(current);
            f(&mut next);
            next
        });
    }

    // ------------------------------------------------------------------
    // 调度器状态
    // ------------------------------------------------------------------

    pub fn block_state(&self) -> BlockState {
        self.block_state.get()
    }

    pub(crate) fn advance_block_state(&self, from: BlockState, to: BlockState) -> Result<(), BlockState> {
        self.block_state.advance(from, to)
    }

    // ------------------------------------------------------------------
    // 标志
    // ------------------------------------------------------------------

    pub fn servo_power(&self) -> bool {
        self.servo_power.load(Ordering::Acquire)
    }

    pub(crate) fn set_servo_power(&self, on: bool) {
        self.servo_power.store(on, Ordering::Release);
    }

    pub fn cycle_start(&self) -> bool {
        self.cycle_start.load(Ordering::Acquire)
    }

    pub(crate) fn set_cycle_start(&self, on: bool) {
        self.cycle_start.store(on, Ordering::Release);
    }

    pub fn feed_hold(&self) -> bool {
        self.feed_hold.load(Ordering::Acquire)
    }

    pub(crate) fn set_feed_hold(&self, on: bool) {
        self.feed_hold.store(on, Ordering::Release);
    }

    pub fn feed_abort(&self) -> bool {
        self.feed_abort.load(Ordering::Acquire)
    }

    pub(crate) fn set_feed_abort(&self, on: bool) {
        self.feed_abort.store(on, Ordering::Release);
    }

    pub fn limit_switch(&self) -> bool {
        self.limit_switch.load(Ordering::Acquire)
    }

    pub(crate) fn set_limit_switch(&self, on: bool) {
        self.limit_switch.store(on, Ordering::Release);
    }

    pub fn emergency_stop(&self) -> bool {
        self.emergency_stop.load(Ordering::Acquire)
    }

    pub(crate) fn set_emergency_stop(&self, on: bool) {
        self.emergency_stop.store(on, Ordering::Release);
    }

    /// 实时截止时间报警
    pub fn deadline_alarm(&self) -> bool {
        self.deadline_alarm.load(Ordering::Acquire)
    }

    pub(crate) fn set_deadline_alarm(&self, on: bool) {
        self.deadline_alarm.store(on, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // 请求计数器
    // ------------------------------------------------------------------

    pub(crate) fn request_axis_reset(&self, axis: Axis) {
        self.reset_requests[axis.index()].fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reset_requests(&self, index: usize) -> u32 {
        self.reset_requests[index].load(Ordering::Acquire)
    }

    /// 脉冲线程已经执行到的复位请求计数
    pub(crate) fn applied_resets(&self, index: usize) -> u32 {
        self.applied_resets[index].load(Ordering::Acquire)
    }

    /// 轴清零后调用；`Release` 保证看到计数的线程也能看到清零后的位置
    pub(crate) fn mark_reset_applied(&self, index: usize, requests: u32) {
        self.applied_resets[index].store(requests, Ordering::Release);
    }

    /// 规划用的当前位置：请求了但尚未生效的复位按已清零处理
    ///
    /// 脉冲发生器在启动计划之前执行计划记录的复位，两边看到的起点一致。
    pub(crate) fn planning_positions(&self) -> (AxisArray<i64>, [u32; AXIS_COUNT]) {
        let marks: [u32; AXIS_COUNT] = std::array::from_fn(|i| self.reset_requests(i));
        let positions = std::array::from_fn(|i| {
            if self.applied_resets(i) == marks[i] {
                self.position[i].load(Ordering::Relaxed)
            } else {
                0
            }
        });
        (positions, marks)
    }

    pub(crate) fn request_alarm_clear(&self) {
        self.alarm_clear_requests.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn alarm_clear_requests(&self) -> u32 {
        self.alarm_clear_requests.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // 快照
    // ------------------------------------------------------------------

    /// 读取一致性较好的整体快照
    ///
    /// 先以 `Acquire` 读 `completed_seq`，之后读取的轴数据不早于该块结束时的写入。
    pub fn snapshot(&self) -> MotionSnapshot {
        let completed_seq = self.completed_seq();
        MotionSnapshot {
            position: self.positions(),
            target: self.targets(),
            remaining: self.remaining(),
            settings: MotionSettings::clone(&self.settings.load()),
            block_state: self.block_state(),
            completed_seq,
            servo_power: self.servo_power(),
            cycle_start: self.cycle_start(),
            feed_hold: self.feed_hold(),
            feed_abort: self.feed_abort(),
            limit_switch: self.limit_switch(),
            emergency_stop: self.emergency_stop(),
            deadline_alarm: self.deadline_alarm(),
            steps_per_unit: self.steps_per_unit,
        }
    }
}

impl Default for MotionContext {
    fn default() -> Self {
        Self::new(&ControllerConfig::default())
    }
}

fn load_all(values: &[AtomicI64; AXIS_COUNT]) -> AxisArray<i64> {
    std::array::from_fn(|i| values[i].load(Ordering::Relaxed))
}

/// 运动状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSnapshot {
    pub position: AxisArray<i64>,
    pub target: AxisArray<i64>,
    pub remaining: AxisArray<i64>,
    pub settings: MotionSettings,
    pub block_state: BlockState,
    pub completed_seq: u64,
    pub servo_power: bool,
    pub cycle_start: bool,
    pub feed_hold: bool,
    pub feed_abort: bool,
    pub limit_switch: bool,
    pub emergency_stop: bool,
    pub deadline_alarm: bool,
    pub steps_per_unit: f64,
}

impl MotionSnapshot {
    /// 机械坐标（单位）
    pub fn position_units(&self) -> AxisArray<f64> {
        self.position.map(|steps| steps as f64 / self.steps_per_unit)
    }

    /// 剩余距离（单位）
    pub fn remaining_units(&self) -> AxisArray<f64> {
        self.remaining.map(|steps| steps as f64 / self.steps_per_unit)
    }

    /// 所有轴都没有剩余距离
    pub fn is_at_rest(&self) -> bool {
        self.remaining.iter().all(|&r| r == 0)
    }

    /// `remaining == target - position` 是否在所有轴上成立
    pub fn is_consistent(&self) -> bool {
        (0..AXIS_COUNT).all(|i| self.remaining[i] == self.target[i] - self.position[i])
    }
}
