//! 块调度器
//!
//! 三态机 `IDLE → LOADED → EXECUTING → IDLE`，由控制线程以固定节拍（默认 100ms）驱动：
//!
//! - 分发器提交 G 代码行（或 `MOVE` 点动）时，只有 `IDLE` 才接受，转为 `LOADED`
//! - tick 看到 `LOADED`：应用模态字、计算目标，向脉冲发生器发送 [`MotionPlan`]，转为 `EXECUTING`
//! - tick 看到 `EXECUTING` 且脉冲发生器已发布该块的完成序号：回到 `IDLE`
//!
//! 零位移块在本该启动它的 tick 上直接回到 `IDLE`。任何时刻最多一个块在途。

use crate::block_state::BlockState;
use crate::error::DriverError;
use crate::metrics::MotionMetrics;
use crate::plan::{MotionPlan, MoveKind};
use crate::state::MotionContext;
use crossbeam_channel::{Sender, TrySendError};
use pipco_protocol::{
    AXIS_COUNT, Axis, AxisArray, GCodeBlock, ModalState, MotionMode, WorkOffsets,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, error, trace, warn};

/// 已装载、尚未启动的块
#[derive(Debug, Clone, PartialEq)]
pub enum PendingBlock {
    /// 一行 G 代码
    GCode(GCodeBlock),
    /// `<MOVE>` 相对点动（单位），按快速定位执行
    Jog(AxisArray<f64>),
}

/// 块调度器（控制线程独占）
pub struct BlockScheduler {
    ctx: Arc<MotionContext>,
    metrics: Arc<MotionMetrics>,
    plans: Sender<MotionPlan>,
    modal: ModalState,
    work_offsets: WorkOffsets,
    pending: Option<PendingBlock>,
    in_flight: Option<u64>,
    next_seq: u64,
}

impl BlockScheduler {
    pub fn new(
        ctx: Arc<MotionContext>,
        metrics: Arc<MotionMetrics>,
        plans: Sender<MotionPlan>,
        work_offsets: WorkOffsets,
    ) -> Self {
        Self {
            ctx,
            metrics,
            plans,
            modal: ModalState::default(),
            work_offsets,
            pending: None,
            in_flight: None,
            next_seq: 1,
        }
    }

    pub fn state(&self) -> BlockState {
        self.ctx.block_state()
    }

    /// 当前模态状态
    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    /// 已装载、等待启动的块
    pub fn pending(&self) -> Option<&PendingBlock> {
        self.pending.as_ref()
    }

    /// 正在执行的块序号
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// 提交一行 G 代码
    ///
    /// 非 `IDLE` 时拒绝，返回 [`DriverError::AdmissionRejected`]，执行中的块不受影响。
    /// 解析失败时状态保持 `IDLE`。
    pub fn submit_gcode(&mut self, line: &str) -> Result<(), DriverError> {
        self.check_admission()?;
        let block = GCodeBlock::parse(line)?;
        self.load(PendingBlock::GCode(block))?;
        debug!("Block admitted: {:?}", line);
        Ok(())
    }

    /// 提交相对点动（单位）
    pub fn submit_jog(&mut self, deltas: AxisArray<f64>) -> Result<(), DriverError> {
        self.check_admission()?;
        self.load(PendingBlock::Jog(deltas))?;
        debug!("Jog admitted: {:?}", deltas);
        Ok(())
    }

    fn check_admission(&self) -> Result<(), DriverError> {
        let state = self.state();
        if state.is_idle() {
            return Ok(());
        }
        Err(self.reject(state))
    }

    fn reject(&self, state: BlockState) -> DriverError {
        self.metrics.blocks_rejected.fetch_add(1, Ordering::Relaxed);
        DriverError::AdmissionRejected { state }
    }

    fn load(&mut self, block: PendingBlock) -> Result<(), DriverError> {
        self.ctx
            .advance_block_state(BlockState::Idle, BlockState::Loaded)
            .map_err(|state| self.reject(state))?;
        self.pending = Some(block);
        self.metrics.blocks_admitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn advance(&self, from: BlockState, to: BlockState) {
        if let Err(actual) = self.ctx.advance_block_state(from, to) {
            error!(
                "Block state out of sync: expected {:?} -> {:?}, found {:?}",
                from, to, actual
            );
        }
    }

    /// 周期性调度 tick，返回 tick 之后的状态
    pub fn tick(&mut self) -> BlockState {
        match self.state() {
            BlockState::Idle => {},
            BlockState::Loaded => match self.start_pending() {
                Ok(()) => {},
                Err(e @ DriverError::TargetOutOfRange { .. }) => {
                    warn!("Block dropped: {}", e);
                    self.metrics.commands_malformed.fetch_add(1, Ordering::Relaxed);
                    self.advance(BlockState::Loaded, BlockState::Idle);
                },
                Err(e) => {
                    error!("Failed to start block: {}", e);
                    self.advance(BlockState::Loaded, BlockState::Idle);
                },
            },
            BlockState::Executing => self.poll_completion(),
        }
        self.state()
    }

    fn poll_completion(&mut self) {
        let Some(seq) = self.in_flight else {
            self.advance(BlockState::Executing, BlockState::Idle);
            return;
        };
        if self.ctx.completed_seq() >= seq {
            trace!("Block {} finished", seq);
            self.in_flight = None;
            self.advance(BlockState::Executing, BlockState::Idle);
        }
    }

    /// 启动已装载的块
    ///
    /// 目标越界时模态状态和参数都不变，由调用方丢弃该块。
    fn start_pending(&mut self) -> Result<(), DriverError> {
        let Some(pending) = self.pending.take() else {
            self.advance(BlockState::Loaded, BlockState::Idle);
            return Ok(());
        };

        let (current, reset_marks) = self.ctx.planning_positions();
        let current_units = current.map(|steps| self.ctx.steps_to_units(steps));

        let (kind, modal, feed, target_units) = match pending {
            PendingBlock::GCode(block) => {
                let mut modal = self.modal.clone();
                modal.apply(&block);
                let kind = match modal.motion {
                    MotionMode::Rapid => MoveKind::Rapid,
                    MotionMode::Linear => MoveKind::Feed,
                };
                let target = modal.resolve_targets(&block, &current_units, &self.work_offsets);
                (kind, Some(modal), block.feed, target)
            },
            PendingBlock::Jog(deltas) => {
                let target: AxisArray<f64> =
                    std::array::from_fn(|i| current_units[i] + deltas[i]);
                (MoveKind::Rapid, None, None, target)
            },
        };

        let deltas = self.step_deltas(&current, &target_units)?;

        if let Some(modal) = modal {
            let coordinate_system = modal.coordinate_system;
            self.modal = modal;
            self.ctx.update_settings(|settings| {
                settings.coordinate_system = coordinate_system;
                if let Some(feed) = feed {
                    settings.feed_rate = feed;
                }
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let plan = MotionPlan::new(seq, kind, deltas).with_reset_marks(reset_marks);

        if plan.is_zero() {
            debug!("Block {} has no displacement, completed immediately", seq);
            self.metrics.blocks_completed.fetch_add(1, Ordering::Relaxed);
            self.advance(BlockState::Loaded, BlockState::Idle);
            return Ok(());
        }

        self.plans.try_send(plan).map_err(|e| match e {
            TrySendError::Full(_) => DriverError::ChannelFull,
            TrySendError::Disconnected(_) => DriverError::ChannelClosed,
        })?;

        debug!("Block {} started: {:?} {:?}", seq, kind, deltas);
        self.in_flight = Some(seq);
        self.metrics.blocks_started.fetch_add(1, Ordering::Relaxed);
        self.advance(BlockState::Loaded, BlockState::Executing);
        Ok(())
    }

    /// 目标（单位）→ 相对当前位置的步数位移
    fn step_deltas(
        &self,
        current: &AxisArray<i64>,
        target_units: &AxisArray<f64>,
    ) -> Result<AxisArray<i64>, DriverError> {
        let mut deltas = [0; AXIS_COUNT];
        for (i, delta) in deltas.iter_mut().enumerate() {
            *delta = self
                .ctx
                .units_to_steps(target_units[i])
                .and_then(|target| target.checked_sub(current[i]))
                .ok_or(DriverError::TargetOutOfRange {
                    axis: Axis::ALL[i],
                    units: target_units[i],
                })?;
        }
        Ok(deltas)
    }
}

impl std::fmt::Debug for BlockScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockScheduler")
            .field("state", &self.state())
            .field("modal", &self.modal)
            .field("pending", &self.pending)
            .field("in_flight", &self.in_flight)
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

/// 零偏置表
pub fn zero_offsets() -> WorkOffsets {
    [[0.0; AXIS_COUNT]; 6]
}
