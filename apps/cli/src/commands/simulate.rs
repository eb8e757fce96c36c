//! simulate 命令
//!
//! 在内存传输上启动完整的控制器，逐行提交 G 代码：每行等调度器回到 IDLE 后
//! 再提交下一行，并用 `<R_MC>` 读取机械坐标。缺省程序是控制器的验收测试序列。

use anyhow::{Context, Result, bail};
use clap::Args;
use pipco_driver::{ControllerConfig, CountingStepOutput, MetricsSnapshot, MotionController};
use pipco_protocol::Axis;
use pipco_serial::{MockHost, MockTransport};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// 内置测试程序
pub const REFERENCE_PROGRAM: [&str; 5] = ["G1X0Y0Z10F1000", "X10Y10", "X30Y20", "X10Y10", "G80"];

/// simulate 命令参数
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// G 代码程序文件（每行一个块，`;` 开头的行为注释）
    #[arg(short, long)]
    pub program: Option<PathBuf>,

    /// 单个块的最长等待时间（秒）
    #[arg(long, default_value_t = 30)]
    pub block_timeout: u64,
}

impl SimulateCommand {
    pub fn execute(&self, config: ControllerConfig) -> Result<()> {
        let program = match &self.program {
            Some(path) => load_program(path)?,
            None => REFERENCE_PROGRAM.iter().map(|line| line.to_string()).collect(),
        };
        info!("Simulating {} blocks", program.len());

        let (transport, host) = MockTransport::pair();
        let steps = CountingStepOutput::new();
        let controller = MotionController::builder()
            .config(config)
            .step_output(steps.clone())
            .build(transport)
            .context("Failed to start controller")?;

        host.send(b"<SERVO_POWER_ON>");
        let timeout = Duration::from_secs(self.block_timeout);

        for (index, line) in program.iter().enumerate() {
            let settled = index as u64 + 1;
            host.send(format!("\"{}\"\r\n", line).as_bytes());

            // 完成、中止或解析失败都算这一行处理完毕
            let finished = controller.wait_until(timeout, |snapshot, metrics| {
                settled_lines(metrics) >= settled
                    && snapshot.block_state.is_idle()
                    && snapshot.is_at_rest()
            });
            if !finished {
                controller.shutdown();
                bail!(
                    "Block {} ({:?}) did not finish within {}s",
                    index + 1,
                    line,
                    self.block_timeout
                );
            }

            let report = read_position(&controller, &host, settled, timeout)?;
            println!("{:>3}  {:<24} {}", index + 1, line, report);
        }

        let metrics = controller.metrics();
        controller.shutdown();

        println!();
        println!(
            "blocks: {} completed, {} aborted, {} malformed",
            metrics.blocks_completed, metrics.blocks_aborted, metrics.commands_malformed
        );
        let net: Vec<String> = Axis::ALL
            .iter()
            .map(|axis| format!("{}={}", axis.letter(), steps.net_steps(*axis)))
            .collect();
        println!("net steps: {}", net.join(" "));
        println!(
            "pulse ticks: {}, deadline misses: {} (max lateness {} us)",
            metrics.pulse_ticks, metrics.deadline_misses, metrics.max_tick_lateness_us
        );
        Ok(())
    }
}

fn settled_lines(metrics: &MetricsSnapshot) -> u64 {
    metrics.blocks_completed + metrics.blocks_aborted + metrics.commands_malformed
}

/// 发送 `<R_MC>` 并等待回传
fn read_position(
    controller: &MotionController,
    host: &MockHost,
    reports: u64,
    timeout: Duration,
) -> Result<String> {
    host.send(b"<R_MC>");
    if !controller.wait_until(timeout, |_, metrics| metrics.reports_sent >= reports) {
        bail!("No position report within {}s", timeout.as_secs());
    }
    host.take_lines()
        .pop()
        .context("Position report was empty")
}

/// 读取程序文件：去掉空行和 `;` 注释行
pub fn load_program(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read program {}", path.display()))?;
    Ok(parse_program(&content))
}

fn parse_program(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(';'))
        .map(|line| line.trim_matches('"').to_string())
        .collect()
}
