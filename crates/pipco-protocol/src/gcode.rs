//! G 代码块解析模块
//!
//! 只覆盖运动核心需要的子集：
//!
//! - 运动模式：`G0` 快速定位、`G1` 直线插补
//! - 距离模式：`G90` 绝对、`G91` 增量
//! - 坐标系：`G53`-`G59`
//! - `G17/G18/G19/G21/G80/G94` 接受但不改变行为（没有固定循环可取消）
//! - `F` 进给、`X Y Z A B C` 轴字
//! - `N M S T` 接受并忽略
//!
//! 括号注释 `( ... )` 和 `;` 行尾注释会被跳过。

use crate::axis::{AXIS_COUNT, Axis, AxisArray, CoordinateSystem};
use crate::error::ProtocolError;
use std::str::FromStr;

/// 运动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionMode {
    /// G0
    #[default]
    Rapid,
    /// G1
    Linear,
}

/// 距离模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMode {
    /// G90
    #[default]
    Absolute,
    /// G91
    Incremental,
}

/// 一行 G 代码解析后的块
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GCodeBlock {
    pub motion: Option<MotionMode>,
    pub distance: Option<DistanceMode>,
    pub coordinate_system: Option<CoordinateSystem>,
    pub feed: Option<f64>,
    /// 各轴字的值（未出现的轴为 `None`）
    pub axes: AxisArray<Option<f64>>,
}

impl GCodeBlock {
    /// 解析一行 G 代码
    ///
    /// 行首尾的双引号（如果有）会被去掉。
    ///
    /// # Example
    ///
    /// ```
    /// use pipco_protocol::{Axis, GCodeBlock, MotionMode};
    ///
    /// let block = GCodeBlock::parse("\"G90G54G1X100.000F1000\"").unwrap();
    /// assert_eq!(block.motion, Some(MotionMode::Linear));
    /// assert_eq!(block.axes[Axis::X.index()], Some(100.0));
    /// assert_eq!(block.feed, Some(1000.0));
    /// ```
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim().trim_matches('"');
        let mut block = GCodeBlock::default();
        let mut chars = line.chars().peekable();

        while let Some(c) = chars.next() {
            if c.is_whitespace() {
                continue;
            }
            if c == '(' {
                // 括号注释
                for inner in chars.by_ref() {
                    if inner == ')' {
                        break;
                    }
                }
                continue;
            }
            if c == ';' {
                break;
            }
            if !c.is_ascii_alphabetic() {
                return Err(ProtocolError::UnexpectedChar(c));
            }

            let letter = c.to_ascii_uppercase();
            let mut number = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || matches!(next, '.' | '+' | '-') {
                    number.push(next);
                    chars.next();
                } else if next == ' ' && number.is_empty() {
                    // 允许 "X 10" 这种写法
                    chars.next();
                } else {
                    break;
                }
            }
            let value: f64 = number
                .parse()
                .map_err(|_| ProtocolError::MalformedNumber(letter))?;

            block.apply_word(letter, value)?;
        }

        Ok(block)
    }

    fn apply_word(&mut self, letter: char, value: f64) -> Result<(), ProtocolError> {
        if let Some(axis) = Axis::from_letter(letter) {
            self.axes[axis.index()] = Some(value);
            return Ok(());
        }

        match letter {
            'G' => self.apply_g(value),
            'F' => {
                if value <= 0.0 {
                    return Err(ProtocolError::InvalidFeed(value));
                }
                self.feed = Some(value);
                Ok(())
            },
            // 行号、M 代码、主轴转速、刀具号：运动核心不处理
            'N' | 'M' | 'S' | 'T' => Ok(()),
            _ => Err(ProtocolError::UnsupportedWord { letter, value }),
        }
    }

    fn apply_g(&mut self, value: f64) -> Result<(), ProtocolError> {
        let unsupported = ProtocolError::UnsupportedWord { letter: 'G', value };
        if value.fract() != 0.0 || value < 0.0 {
            return Err(unsupported);
        }

        match value as u32 {
            0 => self.motion = Some(MotionMode::Rapid),
            1 => self.motion = Some(MotionMode::Linear),
            17 | 18 | 19 | 21 | 80 | 94 => {},
            number @ 53..=59 => self.coordinate_system = CoordinateSystem::from_g_number(number),
            90 => self.distance = Some(DistanceMode::Absolute),
            91 => self.distance = Some(DistanceMode::Incremental),
            _ => return Err(unsupported),
        }
        Ok(())
    }

    /// 是否包含任意轴字
    pub fn has_axis_words(&self) -> bool {
        self.axes.iter().any(Option::is_some)
    }
}

impl FromStr for GCodeBlock {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GCodeBlock::parse(s)
    }
}

/// 工件坐标偏置表（G54-G59，各 6 轴）
pub type WorkOffsets = [AxisArray<f64>; 6];

/// G 代码模态状态
///
/// 模态字在块执行开始时生效，并对后续块持续有效。
/// `F` 字直接写入运动参数（`<SET_FEED>` 可以随时覆盖），不在这里保存。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModalState {
    pub motion: MotionMode,
    pub distance: DistanceMode,
    pub coordinate_system: CoordinateSystem,
}

impl ModalState {
    /// 应用块中的模态字
    pub fn apply(&mut self, block: &GCodeBlock) {
        if let Some(motion) = block.motion {
            self.motion = motion;
        }
        if let Some(distance) = block.distance {
            self.distance = distance;
        }
        if let Some(cs) = block.coordinate_system {
            self.coordinate_system = cs;
        }
    }

    /// 计算块的机械坐标目标（单位）
    ///
    /// 调用前应先 [`apply`](Self::apply) 本块的模态字。未出现的轴保持 `current`。
    pub fn resolve_targets(
        &self,
        block: &GCodeBlock,
        current: &AxisArray<f64>,
        offsets: &WorkOffsets,
    ) -> AxisArray<f64> {
        let offset = match self.coordinate_system.offset_index() {
            Some(index) => offsets[index],
            None => [0.0; AXIS_COUNT],
        };

        let mut target = *current;
        for i in 0..AXIS_COUNT {
            if let Some(value) = block.axes[i] {
                target[i] = match self.distance {
                    DistanceMode::Absolute => value + offset[i],
                    DistanceMode::Incremental => current[i] + value,
                };
            }
        }
        target
    }
}
