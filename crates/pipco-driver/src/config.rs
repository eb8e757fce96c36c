//! 控制器配置
//!
//! 所有时间参数以整数微秒/毫秒表示，便于 TOML 书写。启用 `serde` feature 后可直接反序列化，
//! 缺省字段使用 [`ControllerConfig::default`] 中的值。

use crate::error::DriverError;
use pipco_protocol::{AXIS_COUNT, WorkOffsets};
use std::time::Duration;

/// 控制器配置
///
/// # Example
///
/// ```
/// use pipco_driver::ControllerConfig;
///
/// let config = ControllerConfig {
///     block_tick_ms: 50,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    /// 脉冲发生器周期（微秒）
    pub pulse_period_us: u64,
    /// 块调度周期（毫秒）
    pub block_tick_ms: u64,
    /// 摄入线程空闲轮询间隔（微秒）
    pub ingest_poll_us: u64,
    /// 摄入线程与控制线程之间的缓冲区队列容量
    pub command_queue_capacity: usize,
    /// 每单位（mm 或度）对应的步数
    pub steps_per_unit: f64,
    /// 上电默认切削进给（单位/分钟）
    pub default_feed_rate: f64,
    /// 上电默认快速进给（单位/分钟）
    pub default_rapid_feed_rate: f64,
    /// 倍率下限（百分比）
    pub override_min: u32,
    /// 倍率上限（百分比）
    pub override_max: u32,
    /// 倍率步长（百分比）
    pub override_step: u32,
    /// 关闭时等待每个线程退出的超时（毫秒）
    pub join_timeout_ms: u64,
    /// G54-G59 工件坐标偏置（单位）
    pub work_offsets: WorkOffsets,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pulse_period_us: 10,
            block_tick_ms: 100,
            ingest_poll_us: 200,
            command_queue_capacity: 8,
            steps_per_unit: 1000.0,
            default_feed_rate: 1000.0,
            default_rapid_feed_rate: 10_000.0,
            override_min: 0,
            override_max: 200,
            override_step: 10,
            join_timeout_ms: 500,
            work_offsets: [[0.0; AXIS_COUNT]; 6],
        }
    }
}

impl ControllerConfig {
    /// 检查配置的一致性
    pub fn validate(&self) -> Result<(), DriverError> {
        let invalid = |msg: &str| Err(DriverError::InvalidConfig(msg.to_string()));

        if self.pulse_period_us == 0 {
            return invalid("pulse_period_us must be > 0");
        }
        if self.block_tick_ms == 0 {
            return invalid("block_tick_ms must be > 0");
        }
        if self.ingest_poll_us == 0 {
            return invalid("ingest_poll_us must be > 0");
        }
        if self.command_queue_capacity == 0 {
            return invalid("command_queue_capacity must be >= 1");
        }
        if !(self.steps_per_unit.is_finite() && self.steps_per_unit > 0.0) {
            return invalid("steps_per_unit must be a positive number");
        }
        if !(self.default_feed_rate.is_finite() && self.default_feed_rate > 0.0) {
            return invalid("default_feed_rate must be a positive number");
        }
        if !(self.default_rapid_feed_rate.is_finite() && self.default_rapid_feed_rate > 0.0) {
            return invalid("default_rapid_feed_rate must be a positive number");
        }
        if self.override_min > self.override_max {
            return invalid("override_min must not exceed override_max");
        }
        if !(self.override_min..=self.override_max).contains(&100) {
            return invalid("override range must include 100%");
        }
        if self.override_step == 0 {
            return invalid("override_step must be > 0");
        }
        if self.work_offsets.iter().flatten().any(|v| !v.is_finite()) {
            return invalid("work_offsets must be finite");
        }
        Ok(())
    }

    pub fn pulse_period(&self) -> Duration {
        Duration::from_micros(self.pulse_period_us)
    }

    pub fn block_tick(&self) -> Duration {
        Duration::from_millis(self.block_tick_ms)
    }

    pub fn ingest_poll_interval(&self) -> Duration {
        Duration::from_micros(self.ingest_poll_us)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
