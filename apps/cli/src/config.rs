//! 配置文件加载
//!
//! 文件内容直接映射到 [`ControllerConfig`]，缺省字段取默认值：
//!
//! ```toml
//! pulse_period_us = 10
//! block_tick_ms = 100
//! steps_per_unit = 1000.0
//! default_feed_rate = 1000.0
//! ```
//!
//! `work_offsets` 如果出现，必须写满 G54-G59 六组、每组六轴。

use anyhow::{Context, Result};
use pipco_driver::ControllerConfig;
use std::fs;
use std::path::Path;

/// 加载并校验配置；未指定文件时使用默认值
pub fn load(path: Option<&Path>) -> Result<ControllerConfig> {
    let Some(path) = path else {
        return Ok(ControllerConfig::default());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
}

/// 解析 TOML 文本并校验
pub fn parse(content: &str) -> Result<ControllerConfig> {
    let config: ControllerConfig = toml::from_str(content).context("Malformed TOML")?;
    config.validate()?;
    Ok(config)
}

/// 生效配置的 TOML 文本
pub fn render(config: &ControllerConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}
