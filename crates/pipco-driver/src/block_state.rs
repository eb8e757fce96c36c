//! 块调度器状态
//!
//! 三态机 `IDLE → LOADED → EXECUTING → IDLE`（`LOADED → IDLE` 用于零位移块和启动失败）。
//! 只有调度器推进状态，每次推进都是一次比较交换：状态与预期不符说明调度器的
//! 内部记录和共享状态出现了分歧，调用方据此拒绝或报错。

use std::sync::atomic::{AtomicU8, Ordering};

/// 块调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum BlockState {
    /// 可以接受新块
    #[default]
    Idle = 0,
    /// 已接收一个块，等待下一个调度 tick 启动
    Loaded = 1,
    /// 块已交给脉冲发生器，等待完成序号
    Executing = 2,
}

impl BlockState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Loaded,
            2 => Self::Executing,
            _ => Self::Idle,
        }
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    pub fn is_executing(self) -> bool {
        self == Self::Executing
    }

    /// 三态机中是否存在 `self → next` 这条边
    pub fn can_advance_to(self, next: BlockState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Loaded)
                | (Self::Loaded, Self::Executing)
                | (Self::Loaded, Self::Idle)
                | (Self::Executing, Self::Idle)
        )
    }
}

/// 共享的调度器状态
///
/// # 示例
///
/// ```rust
/// use pipco_driver::{AtomicBlockState, BlockState};
///
/// let state = AtomicBlockState::default();
/// assert!(state.advance(BlockState::Idle, BlockState::Loaded).is_ok());
/// // 已经不是 IDLE：返回实际状态
/// assert_eq!(
///     state.advance(BlockState::Idle, BlockState::Loaded),
///     Err(BlockState::Loaded)
/// );
/// ```
#[derive(Debug, Default)]
pub struct AtomicBlockState {
    inner: AtomicU8,
}

impl AtomicBlockState {
    pub fn get(&self) -> BlockState {
        BlockState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// 从 `from` 推进到 `to`
    ///
    /// 当前状态不是 `from`，或者三态机中没有这条边时，不做修改并返回当前状态。
    pub fn advance(&self, from: BlockState, to: BlockState) -> Result<(), BlockState> {
        if !from.can_advance_to(to) {
            return Err(self.get());
        }
        self.inner
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(BlockState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_lifecycle() {
        let state = AtomicBlockState::default();
        assert_eq!(state.get(), BlockState::Idle);

        state.advance(BlockState::Idle, BlockState::Loaded).unwrap();
        state
            .advance(BlockState::Loaded, BlockState::Executing)
            .unwrap();
        assert!(state.get().is_executing());
        state.advance(BlockState::Executing, BlockState::Idle).unwrap();
        assert!(state.get().is_idle());
    }

    #[test]
    fn test_stale_expectation_reports_actual_state() {
        let state = AtomicBlockState::default();
        state.advance(BlockState::Idle, BlockState::Loaded).unwrap();
        assert_eq!(
            state.advance(BlockState::Executing, BlockState::Idle),
            Err(BlockState::Loaded)
        );
        assert_eq!(state.get(), BlockState::Loaded);
    }

    #[test]
    fn test_missing_edges_rejected() {
        assert!(!BlockState::Idle.can_advance_to(BlockState::Executing));
        assert!(!BlockState::Executing.can_advance_to(BlockState::Loaded));
        assert!(!BlockState::Idle.can_advance_to(BlockState::Idle));

        let state = AtomicBlockState::default();
        assert_eq!(
            state.advance(BlockState::Idle, BlockState::Executing),
            Err(BlockState::Idle)
        );
        assert_eq!(state.get(), BlockState::Idle);
    }
}
