//! 轴与坐标系定义

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 支持的最大轴数
pub const AXIS_COUNT: usize = 6;

/// 每轴数组（X, Y, Z, A, B, C）
pub type AxisArray<T> = [T; AXIS_COUNT];

/// 机床轴
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    A = 3,
    B = 4,
    C = 5,
}

impl Axis {
    /// 按索引顺序排列的全部轴
    pub const ALL: [Axis; AXIS_COUNT] = [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::B, Axis::C];

    /// 数组索引（0-5）
    #[inline]
    pub fn index(self) -> usize {
        u8::from(self) as usize
    }

    /// G 代码中的轴字母
    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::A => 'A',
            Axis::B => 'B',
            Axis::C => 'C',
        }
    }

    /// 从轴字母解析（大小写不敏感）
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'A' => Some(Axis::A),
            'B' => Some(Axis::B),
            'C' => Some(Axis::C),
            _ => None,
        }
    }
}

/// 坐标系（G53-G59）
///
/// 编号与固件中的 `cod_G53..cod_G59` 常量一致（0-6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CoordinateSystem {
    /// 机械坐标系（无偏置）
    G53 = 0,
    G54 = 1,
    G55 = 2,
    G56 = 3,
    G57 = 4,
    G58 = 5,
    G59 = 6,
}

impl Default for CoordinateSystem {
    /// 上电默认 G54
    fn default() -> Self {
        CoordinateSystem::G54
    }
}

impl CoordinateSystem {
    /// 从 G 代码编号解析（53-59）
    pub fn from_g_number(number: u32) -> Option<Self> {
        match number {
            53..=59 => Self::try_from((number - 53) as u8).ok(),
            _ => None,
        }
    }

    /// 对应的 G 代码编号
    pub fn g_number(self) -> u32 {
        53 + u8::from(self) as u32
    }

    /// 工件坐标偏置表中的索引（G54 → 0 ... G59 → 5），G53 没有偏置
    pub fn offset_index(self) -> Option<usize> {
        match self {
            CoordinateSystem::G53 => None,
            other => Some(u8::from(other) as usize - 1),
        }
    }
}
