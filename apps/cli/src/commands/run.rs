//! run 命令
//!
//! 把 stdin/stdout 当作上位机串口运行控制器。输入结束后等待已接收的命令处理完、
//! 运动停止，然后退出；Ctrl+C 立即停止。

use anyhow::{Context, Result, bail};
use clap::Args;
use pipco_driver::{ControllerConfig, MetricsSnapshot, MotionController, MotionSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::stdio::{InputStatus, StreamTransport};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// run 命令参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// 输入结束后等待运动完成的最长时间（秒）
    #[arg(long, default_value_t = 60)]
    pub drain_timeout: u64,

    /// 退出时把指标打印到 stderr
    #[arg(long)]
    pub stats: bool,
}

impl RunCommand {
    pub fn execute(&self, config: ControllerConfig) -> Result<()> {
        let interrupted = Arc::new(AtomicBool::new(false));
        ctrlc::set_handler({
            let interrupted = interrupted.clone();
            move || interrupted.store(true, Ordering::Release)
        })
        .context("Failed to set Ctrl+C handler")?;

        let (transport, input) = StreamTransport::stdio().context("Failed to open stdio")?;
        let controller =
            MotionController::start(transport, config).context("Failed to start controller")?;
        info!("Controller running on stdio (Ctrl+C to stop)");

        loop {
            if interrupted.load(Ordering::Acquire) {
                info!("Interrupted, shutting down");
                break;
            }
            if !controller.is_running() {
                warn!("Controller stopped unexpectedly");
                break;
            }
            if input.is_eof() {
                let drained = controller.wait_until(
                    Duration::from_secs(self.drain_timeout),
                    |snapshot, metrics| is_drained(snapshot, metrics, &input),
                );
                if !drained {
                    let metrics = controller.metrics();
                    controller.shutdown();
                    bail!(
                        "Motion did not finish within {}s after end of input ({} blocks completed)",
                        self.drain_timeout,
                        metrics.blocks_completed
                    );
                }
                info!("End of input, all commands processed");
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let metrics = controller.metrics();
        controller.shutdown();
        if self.stats {
            print_stats(&metrics);
        }
        Ok(())
    }
}

/// 全部输入都已被分发器处理，且没有待执行或执行中的块
fn is_drained(snapshot: &MotionSnapshot, metrics: &MetricsSnapshot, input: &InputStatus) -> bool {
    metrics.rx_bytes_total == input.bytes_read()
        && metrics.buffers_processed == metrics.buffers_delivered
        && snapshot.block_state.is_idle()
        && snapshot.is_at_rest()
}

fn print_stats(metrics: &MetricsSnapshot) {
    eprintln!("bytes received:    {}", metrics.rx_bytes_total);
    eprintln!("commands executed: {}", metrics.commands_executed);
    eprintln!("commands malformed:{}", metrics.commands_malformed);
    eprintln!(
        "blocks:            {} admitted, {} rejected, {} completed, {} aborted",
        metrics.blocks_admitted,
        metrics.blocks_rejected,
        metrics.blocks_completed,
        metrics.blocks_aborted
    );
    eprintln!("steps emitted:     {}", metrics.steps_emitted);
    eprintln!("speed-limited:     {} ticks", metrics.speed_limited_ticks);
    eprintln!(
        "deadline misses:   {} ({:.4}%)",
        metrics.deadline_misses,
        metrics.deadline_miss_rate()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipco_driver::{BlockState, MotionContext};

    #[test]
    fn test_is_drained_requires_all_input_processed() {
        let snapshot = MotionContext::default().snapshot();
        let input = InputStatus::default();

        let mut metrics = MetricsSnapshot::default();
        assert!(is_drained(&snapshot, &metrics, &input));

        metrics.buffers_delivered = 1;
        assert!(!is_drained(&snapshot, &metrics, &input));
        metrics.buffers_processed = 1;
        assert!(is_drained(&snapshot, &metrics, &input));
    }

    #[test]
    fn test_is_drained_waits_for_motion() {
        let mut snapshot = MotionContext::default().snapshot();
        let input = InputStatus::default();
        let metrics = MetricsSnapshot::default();

        snapshot.block_state = BlockState::Loaded;
        assert!(!is_drained(&snapshot, &metrics, &input));

        snapshot.block_state = BlockState::Idle;
        snapshot.remaining[0] = 3;
        assert!(!is_drained(&snapshot, &metrics, &input));
    }
}
