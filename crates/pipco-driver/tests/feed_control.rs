//! 进给保持、进给中止、轴复位与报告

mod common;

use common::Rig;
use pipco_driver::BlockState;
use std::time::Duration;

#[test]
fn test_feed_hold_freezes_and_cycle_start_resumes() {
    let mut rig = Rig::new();
    rig.send_gcode("G0X10");
    assert_eq!(rig.scheduler.tick(), BlockState::Executing);
    rig.run_pulses(1_000);

    rig.send(b"<FHLD>");
    let held = rig.ctx.snapshot();
    assert!(held.feed_hold);
    assert!(held.position[0] > 0 && held.position[0] < 10_000);

    rig.run_pulses(5_000);
    let after = rig.ctx.snapshot();
    assert_eq!(after.position, held.position);
    assert_eq!(after.remaining, held.remaining);
    assert_eq!(rig.scheduler.tick(), BlockState::Executing);

    rig.send(b"<CYST>");
    assert!(rig.ctx.cycle_start());
    rig.run_until_idle(100);
    assert_eq!(rig.position_units()[0], 10.0);
}

#[test]
fn test_feed_abort_discards_remaining_until_cycle_start() {
    let mut rig = Rig::new();
    rig.send_gcode("G0X10");
    rig.scheduler.tick();
    rig.run_pulses(1_000);

    rig.send(b"<FEED_ABORT>");
    rig.run_pulses(1);
    let snapshot = rig.ctx.snapshot();
    assert_eq!(snapshot.remaining, [0; 6]);
    assert_eq!(snapshot.target, snapshot.position);
    let stopped_at = snapshot.position[0];
    assert!(stopped_at < 10_000);
    assert_eq!(rig.scheduler.tick(), BlockState::Idle);

    // 中止标志保持，新块立即被中止
    rig.send_gcode("G0X20");
    rig.run_until_idle(10);
    assert_eq!(rig.ctx.position(pipco_protocol::Axis::X), stopped_at);
    assert_eq!(rig.metrics.snapshot().blocks_aborted, 2);

    rig.send(b"<CYST>");
    assert!(!rig.ctx.feed_abort());
    rig.send_gcode("G0X20");
    rig.run_until_idle(100);
    assert_eq!(rig.position_units()[0], 20.0);
}

#[test]
fn test_reset_axis_between_blocks() {
    let mut rig = Rig::new();
    rig.send_gcode("G0X5Y5");
    rig.run_until_idle(100);

    rig.send(b"<RESET_X>");
    rig.run_pulses(1);
    let snapshot = rig.ctx.snapshot();
    assert_eq!(snapshot.position[0], 0);
    assert_eq!(snapshot.target[0], 0);
    assert_eq!(snapshot.position[1], 5_000);
}

#[test]
fn test_reset_axis_during_block_is_deferred() {
    let mut rig = Rig::new();
    rig.send_gcode("G0X10");
    rig.scheduler.tick();
    rig.run_pulses(100);

    rig.send(b"<RESET_X>");
    rig.run_pulses(100);
    assert!(rig.ctx.position(pipco_protocol::Axis::X) >= 200);
    assert!(rig.ctx.snapshot().is_consistent());

    // 块完成后的空闲 tick 才清零
    rig.run_until_idle(100);
    let snapshot = rig.ctx.snapshot();
    assert_eq!(snapshot.position[0], 0);
    assert_eq!(snapshot.remaining[0], 0);
    assert_eq!(rig.steps.net_steps(pipco_protocol::Axis::X), 10_000);
}

#[test]
fn test_reports_follow_motion() {
    let mut rig = Rig::new();
    rig.send_gcode("G0X5Y5");
    rig.run_until_idle(100);

    rig.send(b"<R_MC><R_EN><R_RD>");
    assert_eq!(
        rig.host.take_lines(),
        vec![
            "<R_MC:5.000,5.000,0.000,0.000,0.000,0.000>".to_string(),
            "<R_EN:5000,5000,0,0,0,0>".to_string(),
            "<R_RD:0.000,0.000,0.000,0.000,0.000,0.000>".to_string(),
        ]
    );

    rig.send_gcode("G0X10");
    rig.scheduler.tick();
    rig.run_pulses(1_000);
    rig.send(b"<R_MS><R_RD>");
    let lines = rig.host.take_lines();
    assert_eq!(lines[0], "<R_MS:10.000,5.000,0.000,0.000,0.000,0.000>");
    assert_eq!(lines[1], "<R_RD:4.000,0.000,0.000,0.000,0.000,0.000>");
    assert_eq!(rig.metrics.snapshot().reports_sent, 5);
}

#[test]
fn test_servo_power_gates_step_enable() {
    let mut rig = Rig::new();
    rig.run_pulses(1);
    assert!(!rig.steps.is_enabled());

    rig.send(b"<SERVO_POWER_ON>");
    rig.run_pulses(1);
    assert!(rig.steps.is_enabled());

    rig.send(b"<SERVO_POWER_OFF>");
    rig.run_pulses(1);
    assert!(!rig.steps.is_enabled());

    rig.send(b"<SERVO_INIT>");
    rig.run_pulses(1);
    assert!(rig.steps.is_enabled());
}

#[test]
fn test_parameter_commands_update_settings() {
    let mut rig = Rig::new();
    rig.send(b"<SET_FEED:1500><SET_RAPID_FEED:8000><SET_SPEED:12000>");
    let settings = rig.ctx.settings();
    assert_eq!(settings.feed_rate, 1500.0);
    assert_eq!(settings.rapid_feed_rate, 8000.0);
    assert_eq!(settings.spindle_speed, 12000.0);

    // F 字在块开始时写入进给速度
    rig.send_gcode("G1X0.1F250");
    assert_eq!(rig.ctx.settings().feed_rate, 1500.0);
    rig.scheduler.tick();
    assert_eq!(rig.ctx.settings().feed_rate, 250.0);
}

#[test]
fn test_servo_init_clears_deadline_alarm() {
    let mut rig = Rig::new();
    assert!(rig.pulse.record_deadline_miss(Duration::from_micros(40)));
    assert!(rig.ctx.snapshot().deadline_alarm);

    rig.send(b"<SERVO_INIT>");
    rig.run_pulses(1);

    let snapshot = rig.ctx.snapshot();
    assert!(!snapshot.deadline_alarm);
    assert!(snapshot.servo_power);
    let metrics = rig.metrics.snapshot();
    assert_eq!(metrics.deadline_misses, 1);
    assert_eq!(metrics.max_tick_lateness_us, 40);
}
