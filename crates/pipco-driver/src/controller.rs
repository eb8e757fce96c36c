//! 控制器 API 模块
//!
//! 提供对外的 [`MotionController`]，封装三个后台线程（摄入、控制、脉冲）和状态共享细节。

use crate::block_state::BlockState;
use crate::builder::{MotionControllerBuilder, Peripherals};
use crate::config::ControllerConfig;
use crate::dispatcher::{Dispatcher, OverrideLimits};
use crate::error::DriverError;
use crate::metrics::{MetricsSnapshot, MotionMetrics};
use crate::pipeline::{control_loop, ingest_loop, pulse_loop};
use crate::plan::plan_channel;
use crate::pulse::PulseGenerator;
use crate::scheduler::BlockScheduler;
use crate::state::{MotionContext, MotionSnapshot};
use crossbeam_channel::bounded;
use pipco_serial::SplittableTransport;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> thread::Result<()> {
        use std::sync::mpsc;

        let (tx, rx) = mpsc::channel();

        // 看门狗线程负责 join，本线程带超时等待结果
        thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

fn spawn_named<F>(name: &'static str, f: F) -> Result<JoinHandle<()>, DriverError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|source| DriverError::ThreadSpawn { name, source })
}

/// 运动控制器
///
/// 持有共享状态和三个后台线程。Drop 时通知所有线程退出并等待（带超时）。
///
/// # Example
///
/// ```
/// use pipco_driver::{ControllerConfig, MotionController};
/// use pipco_serial::MockTransport;
///
/// let (transport, host) = MockTransport::pair();
/// let controller = MotionController::start(transport, ControllerConfig::default()).unwrap();
/// host.send(b"<SET_FEED:500>");
/// # drop(controller);
/// ```
pub struct MotionController {
    ctx: Arc<MotionContext>,
    metrics: Arc<MotionMetrics>,
    is_running: Arc<AtomicBool>,
    ingest_thread: Option<JoinHandle<()>>,
    control_thread: Option<JoinHandle<()>>,
    pulse_thread: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl MotionController {
    /// 使用默认外设启动控制器
    pub fn start<T: SplittableTransport>(
        transport: T,
        config: ControllerConfig,
    ) -> Result<Self, DriverError> {
        MotionControllerBuilder::new().config(config).build(transport)
    }

    pub fn builder() -> MotionControllerBuilder {
        MotionControllerBuilder::new()
    }

    pub(crate) fn spawn<T: SplittableTransport>(
        transport: T,
        config: ControllerConfig,
        peripherals: Peripherals,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let (rx, tx) = transport.split()?;

        let ctx = Arc::new(MotionContext::new(&config));
        let metrics = Arc::new(MotionMetrics::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let (plan_tx, plan_rx) = plan_channel();
        let (buffer_tx, buffer_rx) = bounded(config.command_queue_capacity);

        let scheduler = BlockScheduler::new(
            ctx.clone(),
            metrics.clone(),
            plan_tx,
            config.work_offsets,
        );
        let mut dispatcher = Dispatcher::new(
            ctx.clone(),
            metrics.clone(),
            tx,
            OverrideLimits::from_config(&config),
        );
        if let Some(encoder) = peripherals.encoder {
            dispatcher = dispatcher.with_encoder(encoder);
        }
        let generator = PulseGenerator::new(
            ctx.clone(),
            metrics.clone(),
            plan_rx,
            peripherals.step_output,
        );

        // 先构造再逐个启动：任何一步失败时 Drop 会停止已启动的线程
        let mut controller = Self {
            ctx: ctx.clone(),
            metrics: metrics.clone(),
            is_running: is_running.clone(),
            ingest_thread: None,
            control_thread: None,
            pulse_thread: None,
            join_timeout: config.join_timeout(),
        };

        let pulse_period = config.pulse_period();
        controller.pulse_thread = Some(spawn_named("pipco-pulse", {
            let is_running = is_running.clone();
            move || pulse_loop(generator, is_running, pulse_period)
        })?);

        let block_tick = config.block_tick();
        let inputs = peripherals.inputs;
        controller.control_thread = Some(spawn_named("pipco-control", {
            let ctx = ctx.clone();
            let is_running = is_running.clone();
            move || control_loop(buffer_rx, dispatcher, scheduler, inputs, ctx, is_running, block_tick)
        })?);

        let poll_interval = config.ingest_poll_interval();
        controller.ingest_thread = Some(spawn_named("pipco-ingest", {
            let is_running = is_running.clone();
            let metrics = metrics.clone();
            move || ingest_loop(rx, buffer_tx, is_running, metrics, poll_interval)
        })?);

        info!(
            "Motion controller started (pulse {:?}, block tick {:?})",
            pulse_period, block_tick
        );
        Ok(controller)
    }

    /// 共享运动状态
    pub fn context(&self) -> &Arc<MotionContext> {
        &self.ctx
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        self.ctx.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn block_state(&self) -> BlockState {
        self.ctx.block_state()
    }

    /// 后台线程是否仍在运行（致命传输错误会使其变为 false）
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// 轮询直到条件满足或超时
    ///
    /// 返回条件是否在超时前满足。
    pub fn wait_until(
        &self,
        timeout: Duration,
        mut condition: impl FnMut(&MotionSnapshot, &MetricsSnapshot) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if condition(&self.ctx.snapshot(), &self.metrics.snapshot()) {
                return true;
            }
            if Instant::now() >= deadline || !self.is_running() {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// 停止所有线程
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Release: All writes before this are visible to threads that see the false value
        self.is_running.store(false, Ordering::Release);

        let join_timeout = self.join_timeout;
        for (name, handle) in [
            ("Ingest", self.ingest_thread.take()),
            ("Control", self.control_thread.take()),
            ("Pulse", self.pulse_thread.take()),
        ] {
            if let Some(handle) = handle
                && let Err(_e) = handle.join_timeout(join_timeout)
            {
                error!(
                    "{} thread panicked or failed to shut down within {:?}",
                    name, join_timeout
                );
            }
        }
    }
}

impl Drop for MotionController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipco_serial::MockTransport;

    #[test]
    fn test_join_timeout_finished_thread() {
        let handle = thread::spawn(|| {});
        assert!(handle.join_timeout(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_join_timeout_expires() {
        let handle = thread::spawn(|| thread::sleep(Duration::from_millis(500)));
        assert!(handle.join_timeout(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (transport, _host) = MockTransport::pair();
        let config = ControllerConfig {
            command_queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(
            MotionController::start(transport, config),
            Err(DriverError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_start_and_shutdown() {
        let (transport, host) = MockTransport::pair();
        let controller = MotionController::start(transport, ControllerConfig::default()).unwrap();
        assert!(controller.is_running());

        host.send(b"<SET_RAPID_FEED:1234>");
        assert!(controller.wait_until(Duration::from_secs(5), |snapshot, _| {
            snapshot.settings.rapid_feed_rate == 1234.0
        }));
        controller.shutdown();
    }

    #[test]
    fn test_fatal_transport_error_stops_controller() {
        let (transport, host) = MockTransport::pair();
        let controller = MotionController::start(transport, ControllerConfig::default()).unwrap();
        host.disconnect();
        let deadline = Instant::now() + Duration::from_secs(5);
        while controller.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!controller.is_running());
    }
}
