//! Pipeline 循环模块
//!
//! 三个后台线程的主循环：
//!
//! - [`ingest_loop`]：轮询串口，把已到达的字节装入 [`CommandBuffer`] 送入有界队列
//! - [`control_loop`]：从队列取缓冲区交给分发器，按固定节拍驱动调度器，刷新编码器和外部输入
//! - [`pulse_loop`]：按绝对截止时间驱动脉冲发生器，检测实时截止时间错过
//!
//! 所有循环都观察同一个 `is_running` 标志退出。

use crate::command::CommandBuffer;
use crate::dispatcher::Dispatcher;
use crate::hal::{MachineInputs, StepOutput};
use crate::metrics::MotionMetrics;
use crate::pulse::PulseGenerator;
use crate::scheduler::BlockScheduler;
use crate::state::MotionContext;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use pipco_serial::{RxTransport, TxTransport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// 外部输入的最长轮询间隔
///
/// 控制线程在等待命令时最多阻塞这么久，保证急停和限位及时生效。
pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// 摄入循环
///
/// 队列满时不读取串口，字节留在传输层（背压），已排队的命令不会被覆盖。
pub fn ingest_loop(
    mut rx: impl RxTransport,
    buffers: Sender<CommandBuffer>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<MotionMetrics>,
    poll_interval: Duration,
) {
    loop {
        // Acquire: If we see false, we must see all cleanup writes from other threads
        if !is_running.load(Ordering::Acquire) {
            trace!("Ingest thread: is_running flag is false, exiting");
            break;
        }

        if buffers.is_full() {
            metrics.ingest_backpressure.fetch_add(1, Ordering::Relaxed);
            spin_sleep::sleep(poll_interval);
            continue;
        }

        let available = match rx.available() {
            Ok(0) => {
                spin_sleep::sleep(poll_interval);
                continue;
            },
            Ok(count) => count,
            Err(e) if e.is_fatal() => {
                error!("Ingest thread: fatal transport error: {}, stopping controller", e);
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                warn!("Ingest thread: transport error: {}", e);
                metrics.transport_errors.fetch_add(1, Ordering::Relaxed);
                spin_sleep::sleep(poll_interval);
                continue;
            },
        };

        let mut buffer = CommandBuffer::new();
        let read = match buffer.fill_from(&mut rx, available) {
            Ok(0) => continue,
            Ok(read) => {
                if buffer.is_truncated() {
                    metrics.buffers_truncated.fetch_add(1, Ordering::Relaxed);
                }
                read
            },
            Err(e) if e.is_fatal() => {
                error!("Ingest thread: fatal transport error: {}, stopping controller", e);
                is_running.store(false, Ordering::Release);
                break;
            },
            Err(e) => {
                warn!("Ingest thread: read failed: {}", e);
                metrics.transport_errors.fetch_add(1, Ordering::Relaxed);
                continue;
            },
        };

        trace!("Ingest thread: {:?}", buffer);
        // 单一生产者且已确认队列未满，send 不会阻塞
        if buffers.send(buffer).is_err() {
            trace!("Ingest thread: buffer queue disconnected, exiting");
            break;
        }
        // 交付之后再计数：rx_bytes_total 追上输入时，对应缓冲区一定已在队列中
        metrics.buffers_delivered.fetch_add(1, Ordering::Relaxed);
        metrics.rx_bytes_total.fetch_add(read as u64, Ordering::Relaxed);
    }

    trace!("Ingest thread: loop exited");
}

/// 控制循环
///
/// 在 `recv_deadline` 上等待缓冲区（唯一的主动挂起点），到达调度节拍时运行调度器 tick。
pub fn control_loop<W: TxTransport>(
    buffers: Receiver<CommandBuffer>,
    mut dispatcher: Dispatcher<W>,
    mut scheduler: BlockScheduler,
    mut inputs: Box<dyn MachineInputs>,
    ctx: Arc<MotionContext>,
    is_running: Arc<AtomicBool>,
    block_tick: Duration,
) {
    let mut next_tick = Instant::now() + block_tick;

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Control thread: is_running flag is false, exiting");
            break;
        }

        let wake_at = next_tick.min(Instant::now() + INPUT_POLL_INTERVAL);
        match buffers.recv_deadline(wake_at) {
            Ok(buffer) => dispatcher.process(&buffer, &mut scheduler),
            Err(RecvTimeoutError::Timeout) => {},
            Err(RecvTimeoutError::Disconnected) => {
                trace!("Control thread: buffer queue disconnected, exiting");
                break;
            },
        }

        sync_inputs(&ctx, inputs.as_mut());
        dispatcher.refresh_encoder();

        let now = Instant::now();
        if now >= next_tick {
            scheduler.tick();
            next_tick += block_tick;
            // 落后超过一个节拍时不补跑
            if next_tick <= now {
                next_tick = now + block_tick;
            }
        }
    }

    trace!("Control thread: loop exited");
}

/// 把外部输入同步到运动状态
pub fn sync_inputs(ctx: &MotionContext, inputs: &mut dyn MachineInputs) {
    let limit = inputs.limit_switch();
    if limit != ctx.limit_switch() {
        if limit {
            warn!("Limit switch triggered");
        }
        ctx.set_limit_switch(limit);
    }

    let estop = inputs.emergency_stop();
    if estop != ctx.emergency_stop() {
        if estop {
            warn!("Emergency stop engaged");
        }
        ctx.set_emergency_stop(estop);
    }
}

/// 脉冲 tick 的绝对截止时间
///
/// 正常情况下每个 tick 把截止时间推后一个周期。tick 开始时间晚于截止时间超过一个周期
/// 即视为错过，之后从开始时间重新对齐，不补发积压的 tick。
#[derive(Debug, Clone, Copy)]
pub struct DeadlineClock {
    period: Duration,
    deadline: Instant,
}

impl DeadlineClock {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self {
            period,
            deadline: start + period,
        }
    }

    /// 下一个 tick 的截止时间
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 在 `started` 开始一个 tick，推进截止时间
    ///
    /// 错过时返回延迟。
    pub fn begin_tick(&mut self, started: Instant) -> Option<Duration> {
        let lateness = started.saturating_duration_since(self.deadline);
        let missed = lateness > self.period;
        if missed {
            self.deadline = started;
        }
        self.deadline += self.period;
        missed.then_some(lateness)
    }
}

/// 脉冲循环
///
/// 按 [`DeadlineClock`] 推进，用 `spin_sleep` 获得微秒级精度。错过截止时间时计数、
/// 记录最大延迟、置位报警，每次报警只记录一条日志。
pub fn pulse_loop<O: StepOutput>(
    mut generator: PulseGenerator<O>,
    is_running: Arc<AtomicBool>,
    period: Duration,
) {
    // 设置线程优先级（可选 feature）
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;
        use tracing::info;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => {
                info!("Pulse thread priority set to MAX (realtime)");
            },
            Err(e) => {
                warn!(
                    "Failed to set pulse thread priority: {}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                );
            },
        }
    }

    let period_us = period.as_secs_f64() * 1_000_000.0;
    let mut clock = DeadlineClock::new(Instant::now(), period);

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("Pulse thread: is_running flag is false, exiting");
            break;
        }

        let now = Instant::now();
        if now < clock.deadline() {
            spin_sleep::sleep(clock.deadline() - now);
        }

        if let Some(lateness) = clock.begin_tick(Instant::now())
            && generator.record_deadline_miss(lateness)
        {
            warn!(
                "Pulse deadline missed by {:?} (period {:?}), motion timing degraded",
                lateness, period
            );
        }

        generator.tick(period_us);
    }

    // 退出时关闭驱动器使能
    generator.disable_output();
    trace!("Pulse thread: loop exited");
}
