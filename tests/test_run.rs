// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

use std::cell::RefCell;
use std::rc::Rc;

use opensbp::driver::{StatusReport, TestDriver, TestOp};
use opensbp::interp::{ErrType, MachineState, Runtime, Status};
use opensbp::parse::parse;

fn runtime(src: &str) -> Runtime {
    let prog = parse("test.sbp", src).expect("could not parse the source");
    Runtime::new(prog).expect("could not analyze the program")
}

fn run_program(src: &str) -> TestDriver {
    let mut rt = runtime(src);
    let mut driver = TestDriver::new();
    rt.run(&mut driver).expect("run failed");
    driver
}

#[test]
fn speed_setting_feeds_into_moves() {
    let driver = run_program("VS,5,3\nMX,10\n");
    assert_eq!(driver.gcode(), ["G1X10 F300"]);
}

#[test]
fn user_variables_evaluate_in_arguments() {
    let driver = run_program("&a = 2\n&b = 3\nMX,&a + &b\n");
    assert_eq!(driver.gcode(), ["G1X5 F120"]);
}

#[test]
fn sysvar_read_breaks_the_stack() {
    let mut rt = runtime("MY,1\nMX,%(1)\n");
    let mut driver = TestDriver::new();
    driver.reports.push_back(StatusReport { posx: Some(7.5), ..Default::default() });
    rt.run(&mut driver).unwrap();
    // The pending chunk reaches the driver before the fresh position is
    // read for the argument.
    assert_eq!(driver.segments(), ["G1Y1 F120", "G1X7.5 F120"]);
}

#[test]
fn zeroing_flushes_pending_gcode_first() {
    let mut rt = runtime("MX,1\nZX\n");
    let mut driver = TestDriver::with_params([("mpox", 3.5)]);
    rt.run(&mut driver).unwrap();
    assert_eq!(driver.ops, [
        TestOp::Segment("G1X1 F120".into()),
        TestOp::Get("mpox".into()),
        TestOp::Segment("G10 L2 P2 X3.5".into()),
    ]);
}

#[test]
fn emit_loop_streams_until_stopped() {
    let mut rt = runtime("again:\nMX,1\nGOTO again\n");
    let mut driver = TestDriver::new();
    driver.stop_after = Some((3, rt.stop_handle()));
    rt.run(&mut driver).unwrap();
    assert_eq!(driver.segments().len(), 3);
    assert!(driver.gcode().iter().all(|line| *line == "G1X1 F120"));
    assert_eq!(rt.state(), MachineState::Idle);
}

#[test]
fn gosub_returns_exactly_once() {
    let driver = run_program("GOSUB sub\nEND\nsub:\nMX,1\nRETURN\n");
    assert_eq!(driver.gcode(), ["G1X1 F120"]);
}

#[test]
fn circle_plunge_passes_reach_depth_and_pull_up() {
    let driver = run_program("CG,,1,1,0,1,T,1,0.25,4,1,1,0,0,0\n");
    let gcode = driver.gcode();
    assert_eq!(gcode.iter().filter(|l| l.starts_with("G2")).count(), 4);
    // 4 passes of 0.25 reach Z -1 on the last one, then the tool returns
    // to the starting height.
    assert!(gcode.contains(&"G1Z-1 F60"));
    assert_eq!(*gcode.last().unwrap(), "G0Z0");
}

#[test]
fn cutter_settings_drive_pocket_step_over() {
    let driver = run_program("VC,1,20\nCG,,0,0,0,2,T,1,0,1,1,1,2,0,0\n");
    // Cutter 1 at 20% overlap gives a 0.8 step-over: rings at r=2, 1.2, 0.4.
    assert_eq!(driver.gcode(), [
        "G2X0Y0I0J2 F120",
        "G1X0Y0.8 F120",
        "G2X0Y0.8I0J1.2 F120",
        "G1X0Y1.6 F120",
        "G2X0Y1.6I0J0.4 F120",
    ]);
}

#[test]
fn cg_prop_scales_both_axes() {
    let plain = run_program("CG,,0,0,0,1,T,1,0,1,1,1,1,1,0\n");
    assert_eq!(plain.gcode(), ["G2X0Y0I0J1 F120"]);
    let tall = run_program("CG,,0,0,0,1,T,1,0,1,1,2,1,1,0\n");
    assert_eq!(tall.gcode(), ["G2X0Y0I0J2 F120"]);
}

#[test]
fn spiral_plunge_uses_k_for_the_center_offset() {
    let driver = run_program("CG,,0,0,0,1,T,1,0.5,1,1,1,3,1,0\n");
    assert_eq!(driver.gcode(), ["G2X0Y0Z-0.5I0K1 F120"]);
}

#[test]
fn spiral_with_bottom_pass_finishes_flat() {
    let driver = run_program("CG,,0,0,0,1,T,1,0.5,1,1,1,4,1,0\n");
    assert_eq!(driver.gcode(), [
        "G2X0Y0Z-0.5I0K1 F120",
        "G2X0Y0I0J1 F120",
    ]);
}

#[test]
fn rectangle_centered_start_visits_symmetric_corners() {
    let driver = run_program("JH\nCR,2,2,T,1,0\n");
    assert_eq!(driver.gcode(), [
        "G0X0Y0",
        "G1X-1Y-1 F120",
        "G1X-1Y1 F120",
        "G1X1Y1 F120",
        "G1X1Y-1 F120",
        "G1X-1Y-1 F120",
    ]);
}

#[test]
fn rectangle_spiral_plunge_distributes_quarters() {
    let driver = run_program("JH\nCR,4,4,T,-1,1,1,1,1,0,0,0,1\n");
    assert_eq!(driver.gcode(), [
        "G0X0Y0",
        "G1X4Y0Z-0.25 F120",
        "G1X4Y4Z-0.5 F120",
        "G1X0Y4Z-0.75 F120",
        "G1X0Y0Z-1 F120",
    ]);
}

#[test]
fn modal_move_without_arguments_sets_feed_only() {
    let driver = run_program("M2\n");
    assert_eq!(driver.gcode(), ["G1F120"]);
}

#[test]
fn pause_emits_dwell_only_with_a_time() {
    let driver = run_program("PAUSE 1.5\nPAUSE\nMX,1\n");
    assert_eq!(driver.gcode(), ["G4 P1.5", "G1X1 F120"]);
}

#[test]
fn jog_speed_updates_push_velocity_maxima() {
    let driver = run_program("JS,10,5\nJX,2\n");
    assert_eq!(driver.ops[..3], [
        TestOp::Set("xvm".into(), 600.0),
        TestOp::Set("yvm".into(), 600.0),
        TestOp::Set("zvm".into(), 300.0),
    ]);
    assert_eq!(driver.gcode(), ["G0X2"]);
}

#[test]
fn unit_recalculation_round_trips_motor_parameters() {
    let mut rt = runtime("VU,200\n");
    let mut driver = TestDriver::with_params([("1sa", 2.0), ("1mi", 10.0)]);
    rt.run(&mut driver).unwrap();
    // (360 / 2) * 10 = 1800 steps per revolution at 200 steps per unit
    // means 9 units of travel per revolution.
    assert_eq!(driver.ops, [
        TestOp::Get("1sa".into()),
        TestOp::Get("1mi".into()),
        TestOp::Set("1tr".into(), 9.0),
    ]);
}

#[test]
fn location_set_adjusts_work_offsets() {
    let mut rt = runtime("VA,1,2\n");
    let mut driver = TestDriver::with_params([("mpox", 5.0), ("mpoy", 5.0)]);
    rt.run(&mut driver).unwrap();
    assert_eq!(driver.segments(), ["G10 L2 P2 X4 Y3"]);
}

#[test]
fn multi_axis_zero_chains_reads() {
    let mut rt = runtime("Z3\n");
    let mut driver = TestDriver::with_params([
        ("mpox", 1.0), ("mpoy", 2.0), ("mpoz", 3.0),
    ]);
    rt.run(&mut driver).unwrap();
    assert_eq!(driver.ops, [
        TestOp::Get("mpox".into()),
        TestOp::Get("mpoy".into()),
        TestOp::Get("mpoz".into()),
        TestOp::Segment("G10 L2 P2 X1 Y2 Z3".into()),
    ]);
}

#[test]
fn zeroing_with_empty_chunk_skips_the_driver_wait() {
    let mut rt = runtime("ZX\n");
    let mut driver = TestDriver::with_params([("mpox", 2.0)]);
    rt.run(&mut driver).unwrap();
    // Nothing was pending, so the first driver contact is the read.
    assert_eq!(driver.ops, [
        TestOp::Get("mpox".into()),
        TestOp::Segment("G10 L2 P2 X2".into()),
    ]);
}

#[test]
fn probe_runs_as_its_own_segment() {
    let driver = run_program("MX,1\nEP,-0.5\n");
    assert_eq!(driver.segments(), ["G1X1 F120", "G38.2 Z-0.5"]);
}

#[test]
fn spindle_and_mode_shortcuts() {
    let driver = run_program("C6\nSA\nST\nC7\n");
    assert_eq!(driver.gcode(), ["M3", "M8", "G90", "G54", "M5", "M9"]);
}

#[test]
fn unknown_commands_are_skipped() {
    let driver = run_program("QQ,1\nMX,1\n");
    assert_eq!(driver.gcode(), ["G1X1 F120"]);
}

#[test]
fn return_without_gosub_is_an_error() {
    let mut rt = runtime("RETURN\n");
    let err = rt.run(&mut TestDriver::new()).unwrap_err();
    assert!(matches!(err.errtype, ErrType::ReturnWithoutGosub));
    assert_eq!(err.lineno, 1);
    assert_eq!(rt.state(), MachineState::Idle);
}

#[test]
fn duplicate_and_missing_labels_fail_analysis() {
    let prog = parse("test.sbp", "a:\na:\n").unwrap();
    assert!(matches!(Runtime::new(prog).unwrap_err().errtype,
                     ErrType::DuplicateLabel(_)));

    let prog = parse("test.sbp", "MX,1\nGOTO nowhere\n").unwrap();
    let err = Runtime::new(prog).unwrap_err();
    assert!(matches!(err.errtype, ErrType::UndefinedLabel(_)));
    assert_eq!(err.lineno, 2);

    let prog = parse("test.sbp", "IF 1 > 2 THEN GOTO missing\n").unwrap();
    assert!(matches!(Runtime::new(prog).unwrap_err().errtype,
                     ErrType::UndefinedLabel(_)));
}

#[test]
fn status_line_is_projected_onto_the_source() {
    let mut rt = runtime("MX,1\nMX,2\nMX,%(1)\n");
    let seen: Rc<RefCell<Vec<usize>>> = Rc::default();
    let sink = seen.clone();
    rt.add_listener(move |status: &Status| sink.borrow_mut().push(status.line));
    let mut driver = TestDriver::new();
    driver.reports.push_back(StatusReport { line: Some(1), posx: Some(4.0), ..Default::default() });
    rt.run(&mut driver).unwrap();
    // The report arrived while the chunk starting at statement 0 was
    // executing, so segment line 1 maps straight onto program line 1.
    assert!(seen.borrow().contains(&1));
}
