//! # PiPco CLI
//!
//! PiPco 六轴运动控制器的命令行前端。
//!
//! ```bash
//! # 以 stdin/stdout 作为串口运行（报告写到 stdout，日志写到 stderr）
//! printf '"G0X1Y2"\r\n<R_MC>' | pipco-cli run
//!
//! # 在内存传输上回放测试程序
//! pipco-cli simulate
//! pipco-cli --config machine.toml simulate --program part.nc
//!
//! # 检查配置文件
//! pipco-cli --config machine.toml config check
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod stdio;

use commands::{ConfigCommand, RunCommand, SimulateCommand};

/// 缺省日志过滤（可被 `RUST_LOG` 覆盖）
const DEFAULT_LOG_FILTER: &str = "pipco_cli=info,pipco_driver=info";

/// PiPco CLI - 运动控制器命令行工具
#[derive(Parser, Debug)]
#[command(name = "pipco-cli")]
#[command(about = "Command-line front end for the PiPco motion controller", long_about = None)]
#[command(version)]
struct Cli {
    /// 控制器配置文件（TOML，缺省使用内置默认值）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 以标准输入/输出作为串口运行控制器
    Run {
        #[command(flatten)]
        args: RunCommand,
    },

    /// 在内存传输上逐块执行 G 代码程序并打印坐标
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> Result<()> {
    // 日志写到 stderr，stdout 只留给协议报告
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { args } => args.execute(config),
        Commands::Simulate { args } => args.execute(config),
        Commands::Config(cmd) => cmd.execute(&config, cli.config.as_deref()),
    }
}
