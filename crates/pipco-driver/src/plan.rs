//! 调度器 → 脉冲发生器的运动计划
//!
//! 计划在启动块时一次性计算完成，之后不可变。脉冲线程只读取计划，
//! 因而块执行期间控制线程与脉冲线程之间没有共享的可变数据。

use crossbeam_channel::{Receiver, Sender, bounded};
use pipco_protocol::{AXIS_COUNT, AxisArray};

/// 运动类型（决定使用哪个进给和倍率）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// 快速定位：`rapid_feed_rate * override_percent`
    Rapid,
    /// 切削进给：`feed_rate * feed_rate_override`
    Feed,
}

/// 单个块的运动计划
#[derive(Debug, Clone, PartialEq)]
pub struct MotionPlan {
    /// 单调递增的块序号（从 1 开始）
    pub seq: u64,
    pub kind: MoveKind,
    /// 各轴位移（步数，有符号）
    pub deltas: AxisArray<i64>,
    /// 各轴在合成路径中所占比例 `|d_i| / |d|`
    pub axis_share: AxisArray<f64>,
    /// 计算位移时各轴的复位请求计数
    ///
    /// 脉冲发生器启动计划前执行到这些计数为止的复位，之后的请求推迟到块结束。
    pub reset_marks: [u32; AXIS_COUNT],
}

impl MotionPlan {
    pub fn new(seq: u64, kind: MoveKind, deltas: AxisArray<i64>) -> Self {
        let length = path_length(&deltas);
        let axis_share = if length > 0.0 {
            deltas.map(|d| d.unsigned_abs() as f64 / length)
        } else {
            [0.0; AXIS_COUNT]
        };
        Self {
            seq,
            kind,
            deltas,
            axis_share,
            reset_marks: [0; AXIS_COUNT],
        }
    }

    pub fn with_reset_marks(mut self, marks: [u32; AXIS_COUNT]) -> Self {
        self.reset_marks = marks;
        self
    }

    /// 主导轴（位移最大的轴）的路径比例
    pub fn dominant_share(&self) -> f64 {
        self.axis_share.iter().copied().fold(0.0, f64::max)
    }

    /// 所有轴位移为零
    pub fn is_zero(&self) -> bool {
        self.deltas.iter().all(|&d| d == 0)
    }

    /// 合成路径长度（步数）
    pub fn path_length(&self) -> f64 {
        path_length(&self.deltas)
    }
}

fn path_length(deltas: &AxisArray<i64>) -> f64 {
    deltas
        .iter()
        .map(|&d| {
            let d = d as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// 创建计划通道
///
/// 容量为 1：同一时刻最多只有一个块在途。
pub fn plan_channel() -> (Sender<MotionPlan>, Receiver<MotionPlan>) {
    bounded(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_share() {
        let plan = MotionPlan::new(1, MoveKind::Feed, [3000, -4000, 0, 0, 0, 0]);
        assert_eq!(plan.path_length(), 5000.0);
        assert!((plan.axis_share[0] - 0.6).abs() < 1e-12);
        assert!((plan.axis_share[1] - 0.8).abs() < 1e-12);
        assert_eq!(plan.axis_share[2], 0.0);
        assert_eq!(plan.dominant_share(), plan.axis_share[1]);
        assert!(!plan.is_zero());
    }

    #[test]
    fn test_zero_plan() {
        let plan = MotionPlan::new(7, MoveKind::Rapid, [0; AXIS_COUNT]);
        assert!(plan.is_zero());
        assert_eq!(plan.axis_share, [0.0; AXIS_COUNT]);
    }

    #[test]
    fn test_plan_channel_holds_one() {
        let (tx, rx) = plan_channel();
        tx.try_send(MotionPlan::new(1, MoveKind::Rapid, [1, 0, 0, 0, 0, 0]))
            .unwrap();
        assert!(
            tx.try_send(MotionPlan::new(2, MoveKind::Rapid, [1, 0, 0, 0, 0, 0]))
                .is_err()
        );
        assert_eq!(rx.try_recv().unwrap().seq, 1);
    }
}
