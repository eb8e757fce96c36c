//! 配置管理命令

use anyhow::Result;
use clap::Subcommand;
use pipco_driver::ControllerConfig;
use std::path::Path;

/// 配置命令
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// 校验配置（文件已在启动时加载，能走到这里就说明合法）
    Check,

    /// 以 TOML 打印生效的配置
    Show,
}

impl ConfigCommand {
    pub fn execute(self, config: &ControllerConfig, source: Option<&Path>) -> Result<()> {
        match self {
            ConfigCommand::Check => {
                match source {
                    Some(path) => println!("Configuration OK: {}", path.display()),
                    None => println!("Configuration OK: built-in defaults"),
                }
                println!("  pulse period:   {} us", config.pulse_period_us);
                println!("  block tick:     {} ms", config.block_tick_ms);
                println!("  queue capacity: {}", config.command_queue_capacity);
                println!("  steps/unit:     {}", config.steps_per_unit);
                println!(
                    "  override range: {}%..{}% step {}%",
                    config.override_min, config.override_max, config.override_step
                );
                Ok(())
            },
            ConfigCommand::Show => {
                print!("{}", crate::config::render(config)?);
                Ok(())
            },
        }
    }
}
