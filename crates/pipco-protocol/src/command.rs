//! 司令命令定义模块
//!
//! 解析 `<TOKEN>` 或 `<TOKEN:arg,...>` 形式的命令。参数之间可以用 `:` 或 `,` 分隔。
//!
//! 命令一览：
//!
//! ```text
//! <MOVE:a0:a1:a2:a3:a4:a5>
//! <SET_SPEED:n> <SET_FEED:n> <SET_RAPID_FEED:n>
//! <R_EN> <R_MC> <R_MS> <R_RD>
//! <SERVO_POWER_ON> <SERVO_POWER_OFF> <SERVO_INIT>
//! <RESET_X> <RESET_Y> <RESET_Z> <RESET_A> <RESET_B> <RESET_C>
//! <CYST> <FHLD> <FEED_ABORT>
//! <SET_OVERRIDE_0> <SET_OVERRIDE_+10> <SET_OVERRIDE_-10>
//! <SET_FEED_RATE_0> <SET_FEED_RATE_+10> <SET_FEED_RATE_-10>
//! ```

use crate::axis::{AXIS_COUNT, Axis, AxisArray};
use crate::error::ProtocolError;
use std::str::FromStr;

/// 倍率调整方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideStep {
    /// 归零（`_0`）
    Reset,
    /// 增加一档（`_+10`）
    Increase,
    /// 减少一档（`_-10`）
    Decrease,
}

/// 只读报告类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// `<R_EN>` 编码器计数
    Encoder,
    /// `<R_MC>` 机械坐标
    MachineCoordinate,
    /// `<R_MS>` 停止坐标（当前块的目标位置）
    StopCoordinate,
    /// `<R_RD>` 剩余移动量
    RemainingDistance,
}

impl Report {
    /// 报告标签（与请求令牌相同）
    pub fn tag(self) -> &'static str {
        match self {
            Report::Encoder => "R_EN",
            Report::MachineCoordinate => "R_MC",
            Report::StopCoordinate => "R_MS",
            Report::RemainingDistance => "R_RD",
        }
    }
}

/// 司令命令
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// 各轴相对移动量（单位）
    Move(AxisArray<f64>),
    /// 主轴转速
    SetSpeed(f64),
    /// 切削进给速度（单位/分）
    SetFeed(f64),
    /// 快速进给速度（单位/分）
    SetRapidFeed(f64),
    /// 只读报告
    Read(Report),
    ServoPowerOn,
    ServoPowerOff,
    ServoInit,
    /// 单轴位置清零
    ResetAxis(Axis),
    /// 循环启动
    CycleStart,
    /// 进给保持
    FeedHold,
    /// 进给中止
    FeedAbort,
    /// 快速倍率
    Override(OverrideStep),
    /// 切削进给倍率
    FeedRateOverride(OverrideStep),
}

impl Command {
    /// 解析命令主体（不含 `<` `>`）
    ///
    /// # Example
    ///
    /// ```
    /// use pipco_protocol::{Command, OverrideStep};
    ///
    /// let cmd = Command::parse("SET_FEED:1500").unwrap();
    /// assert_eq!(cmd, Command::SetFeed(1500.0));
    ///
    /// let cmd = Command::parse("SET_OVERRIDE_+10").unwrap();
    /// assert_eq!(cmd, Command::Override(OverrideStep::Increase));
    /// ```
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let body = body.trim();
        let (token, args) = match body.split_once(':') {
            Some((token, args)) => (token.trim(), Some(args)),
            None => (body, None),
        };

        let command = match token {
            "MOVE" => return parse_move(args),
            "SET_SPEED" => {
                let value = single_number("SET_SPEED", args)?;
                if value < 0.0 {
                    return Err(invalid("SET_SPEED", "speed must not be negative"));
                }
                return Ok(Command::SetSpeed(value));
            },
            "SET_FEED" => return positive_number("SET_FEED", args).map(Command::SetFeed),
            "SET_RAPID_FEED" => {
                return positive_number("SET_RAPID_FEED", args).map(Command::SetRapidFeed);
            },
            "R_EN" => Command::Read(Report::Encoder),
            "R_MC" => Command::Read(Report::MachineCoordinate),
            "R_MS" => Command::Read(Report::StopCoordinate),
            "R_RD" => Command::Read(Report::RemainingDistance),
            "SERVO_POWER_ON" => Command::ServoPowerOn,
            "SERVO_POWER_OFF" => Command::ServoPowerOff,
            "SERVO_INIT" => Command::ServoInit,
            "RESET_X" => Command::ResetAxis(Axis::X),
            "RESET_Y" => Command::ResetAxis(Axis::Y),
            "RESET_Z" => Command::ResetAxis(Axis::Z),
            "RESET_A" => Command::ResetAxis(Axis::A),
            "RESET_B" => Command::ResetAxis(Axis::B),
            "RESET_C" => Command::ResetAxis(Axis::C),
            "CYST" => Command::CycleStart,
            "FHLD" => Command::FeedHold,
            "FEED_ABORT" => Command::FeedAbort,
            "SET_OVERRIDE_0" => Command::Override(OverrideStep::Reset),
            "SET_OVERRIDE_+10" => Command::Override(OverrideStep::Increase),
            "SET_OVERRIDE_-10" => Command::Override(OverrideStep::Decrease),
            "SET_FEED_RATE_0" => Command::FeedRateOverride(OverrideStep::Reset),
            "SET_FEED_RATE_+10" => Command::FeedRateOverride(OverrideStep::Increase),
            "SET_FEED_RATE_-10" => Command::FeedRateOverride(OverrideStep::Decrease),
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };

        // 无参命令不接受参数
        if let Some(args) = args
            && !args.trim().is_empty()
        {
            return Err(ProtocolError::InvalidArgument {
                command: command.name(),
                reason: format!("takes no arguments, got '{}'", args),
            });
        }

        Ok(command)
    }

    /// 命令令牌名称
    pub fn name(&self) -> &'static str {
        match self {
            Command::Move(_) => "MOVE",
            Command::SetSpeed(_) => "SET_SPEED",
            Command::SetFeed(_) => "SET_FEED",
            Command::SetRapidFeed(_) => "SET_RAPID_FEED",
            Command::Read(report) => report.tag(),
            Command::ServoPowerOn => "SERVO_POWER_ON",
            Command::ServoPowerOff => "SERVO_POWER_OFF",
            Command::ServoInit => "SERVO_INIT",
            Command::ResetAxis(Axis::X) => "RESET_X",
            Command::ResetAxis(Axis::Y) => "RESET_Y",
            Command::ResetAxis(Axis::Z) => "RESET_Z",
            Command::ResetAxis(Axis::A) => "RESET_A",
            Command::ResetAxis(Axis::B) => "RESET_B",
            Command::ResetAxis(Axis::C) => "RESET_C",
            Command::CycleStart => "CYST",
            Command::FeedHold => "FHLD",
            Command::FeedAbort => "FEED_ABORT",
            Command::Override(_) => "SET_OVERRIDE",
            Command::FeedRateOverride(_) => "SET_FEED_RATE",
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

fn invalid(command: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidArgument {
        command,
        reason: reason.into(),
    }
}

fn split_args(args: &str) -> impl Iterator<Item = &str> {
    args.split([':', ',']).map(str::trim)
}

fn parse_number(command: &'static str, raw: &str) -> Result<f64, ProtocolError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| invalid(command, format!("'{}' is not a number", raw)))?;
    if !value.is_finite() {
        return Err(invalid(command, format!("'{}' is not finite", raw)));
    }
    Ok(value)
}

fn single_number(command: &'static str, args: Option<&str>) -> Result<f64, ProtocolError> {
    let args = args.ok_or_else(|| invalid(command, "expected 1 value"))?;
    let mut values = split_args(args);
    let raw = values.next().unwrap_or_default();
    if values.next().is_some() {
        return Err(invalid(command, "expected 1 value"));
    }
    parse_number(command, raw)
}

fn positive_number(command: &'static str, args: Option<&str>) -> Result<f64, ProtocolError> {
    let value = single_number(command, args)?;
    if value <= 0.0 {
        return Err(invalid(command, format!("{} must be positive", value)));
    }
    Ok(value)
}

fn parse_move(args: Option<&str>) -> Result<Command, ProtocolError> {
    let args = args.ok_or_else(|| invalid("MOVE", "expected 1 to 6 values"))?;
    let mut deltas = [0.0; AXIS_COUNT];
    let mut count = 0;
    for raw in split_args(args) {
        if count == AXIS_COUNT {
            return Err(invalid("MOVE", "more than 6 values"));
        }
        deltas[count] = parse_number("MOVE", raw)?;
        count += 1;
    }
    Ok(Command::Move(deltas))
}
