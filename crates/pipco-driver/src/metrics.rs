//! 运动核心性能指标
//!
//! 所有计数器都是原子变量，任何线程都可以无锁读取。脉冲线程只做 `fetch_add`/`fetch_max`，
//! 不会因为指标统计而阻塞。

use std::sync::atomic::{AtomicU64, Ordering};

/// 运动核心实时指标
///
/// # 使用示例
///
/// ```rust
/// use pipco_driver::MotionMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = MotionMetrics::new();
/// metrics.rx_bytes_total.fetch_add(12, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().rx_bytes_total, 12);
/// ```
#[derive(Debug, Default)]
pub struct MotionMetrics {
    // === 摄入线程 ===
    /// 从串口读取的总字节数
    pub rx_bytes_total: AtomicU64,
    /// 交给控制线程的缓冲区数
    pub buffers_delivered: AtomicU64,
    /// 超过单个缓冲区容量、剩余字节留待下次读取的次数
    pub buffers_truncated: AtomicU64,
    /// 因队列已满而暂停读取的次数
    pub ingest_backpressure: AtomicU64,
    /// 传输层非致命错误次数
    pub transport_errors: AtomicU64,

    // === 控制线程 ===
    /// 分发器处理完的缓冲区数
    pub buffers_processed: AtomicU64,
    /// 解码出的完整帧数
    pub frames_decoded: AtomicU64,
    /// 丢弃的帧（溢出、未闭合、非 UTF-8）
    pub frames_dropped: AtomicU64,
    /// 成功执行的 `<...>` 命令数
    pub commands_executed: AtomicU64,
    /// 无法解析的命令或 G 代码行
    pub commands_malformed: AtomicU64,
    /// 被调度器接受的块
    pub blocks_admitted: AtomicU64,
    /// 调度器非 IDLE 时被拒绝的块
    pub blocks_rejected: AtomicU64,
    /// 交给脉冲发生器的块
    pub blocks_started: AtomicU64,
    /// 完成的块（含零位移块）
    pub blocks_completed: AtomicU64,
    /// 被进给中止/急停/限位打断的块
    pub blocks_aborted: AtomicU64,
    /// 发出的报告行数
    pub reports_sent: AtomicU64,

    // === 脉冲线程 ===
    /// 脉冲 tick 总数
    pub pulse_ticks: AtomicU64,
    /// 发出的步进脉冲总数（所有轴）
    pub steps_emitted: AtomicU64,
    /// 错过截止时间的 tick 数
    pub deadline_misses: AtomicU64,
    /// 观察到的最大 tick 延迟（微秒）
    pub max_tick_lateness_us: AtomicU64,
    /// 路径速度超过每 tick 一步、按上限降速执行的 tick 数
    pub speed_limited_ticks: AtomicU64,
}

impl MotionMetrics {
    /// 创建新的指标实例（所有计数器初始化为 0）
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取指标快照
    ///
    /// 各计数器分别读取（`Relaxed`），彼此之间可能有微小的时间差。
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_bytes_total: self.rx_bytes_total.load(Ordering::Relaxed),
            buffers_delivered: self.buffers_delivered.load(Ordering::Relaxed),
            buffers_truncated: self.buffers_truncated.load(Ordering::Relaxed),
            ingest_backpressure: self.ingest_backpressure.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            buffers_processed: self.buffers_processed.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            commands_executed: self.commands_executed.load(Ordering::Relaxed),
            commands_malformed: self.commands_malformed.load(Ordering::Relaxed),
            blocks_admitted: self.blocks_admitted.load(Ordering::Relaxed),
            blocks_rejected: self.blocks_rejected.load(Ordering::Relaxed),
            blocks_started: self.blocks_started.load(Ordering::Relaxed),
            blocks_completed: self.blocks_completed.load(Ordering::Relaxed),
            blocks_aborted: self.blocks_aborted.load(Ordering::Relaxed),
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            pulse_ticks: self.pulse_ticks.load(Ordering::Relaxed),
            steps_emitted: self.steps_emitted.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            max_tick_lateness_us: self.max_tick_lateness_us.load(Ordering::Relaxed),
            speed_limited_ticks: self.speed_limited_ticks.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照（不可变）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub rx_bytes_total: u64,
    pub buffers_delivered: u64,
    pub buffers_truncated: u64,
    pub ingest_backpressure: u64,
    pub transport_errors: u64,
    pub buffers_processed: u64,
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub commands_executed: u64,
    pub commands_malformed: u64,
    pub blocks_admitted: u64,
    pub blocks_rejected: u64,
    pub blocks_started: u64,
    pub blocks_completed: u64,
    pub blocks_aborted: u64,
    pub reports_sent: u64,
    pub pulse_ticks: u64,
    pub steps_emitted: u64,
    pub deadline_misses: u64,
    pub max_tick_lateness_us: u64,
    pub speed_limited_ticks: u64,
}

impl MetricsSnapshot {
    /// 截止时间错过率（百分比）
    ///
    /// 如果 `pulse_ticks` 为 0，返回 0.0。
    pub fn deadline_miss_rate(&self) -> f64 {
        if self.pulse_ticks == 0 {
            return 0.0;
        }
        (self.deadline_misses as f64 / self.pulse_ticks as f64) * 100.0
    }
}
