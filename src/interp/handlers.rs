// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Command handlers: one per OpenSBP mnemonic.
//!
//! A handler either synthesizes G-code into the pending chunk, mutates the
//! runtime settings, or performs driver round trips.  Arguments are
//! positional with per-command defaults; missing argument slots take the
//! default.  Feeds are emitted in mm/min (speed × 60); rapids carry no
//! feed word because the driver's velocity maxima govern them.

use slog::{debug, warn};

use crate::ast::Expr;
use crate::driver::Driver;
use crate::transform::{self, Point};
use crate::util::fmt_num;
use super::Runtime;
use super::enums::Axis;
use super::error::ErrType;

/// Commands that must complete a driver round trip before the next
/// statement can be interpreted: the zero family, absolute-location and
/// unit updates, and the probe.
pub(super) fn breaks(mnemonic: &str) -> bool {
    matches!(mnemonic,
             "ZX" | "ZY" | "ZZ" | "ZA" | "ZB" | "ZC" |
             "Z2" | "Z3" | "Z4" | "Z5" | "Z6" | "ZT" |
             "VA" | "VU" | "EP")
}

/// Cutter compensation side for the circle and rectangle cuts.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CutSide {
    Inside,
    Outside,
    OnPath,
}

/// The I/O/T argument: a bare letter token, defaulting to tool-on-path.
fn cut_side(args: &[Option<Expr>], index: usize) -> Result<CutSide, ErrType> {
    match args.get(index).and_then(Option::as_ref) {
        None => Ok(CutSide::OnPath),
        Some(Expr::Text(t)) => match t.to_ascii_uppercase().as_str() {
            "I" => Ok(CutSide::Inside),
            "O" => Ok(CutSide::Outside),
            "T" => Ok(CutSide::OnPath),
            _ => Err(ErrType::Other(format!("invalid cut side '{}'", t))),
        },
        Some(ex) => Err(ErrType::Other(format!("invalid cut side '{}'", ex))),
    }
}

/// Rotate a fully specified XY point; helper over [`transform::rotate`].
fn rotated(x: f64, y: f64, angle: f64, cx: f64, cy: f64) -> (f64, f64) {
    if angle == 0.0 {
        return (x, y);
    }
    match transform::rotate(Point::xy(x, y), angle, cx, cy) {
        Point { x: Some(x), y: Some(y), .. } => (x, y),
        _ => (x, y),
    }
}

/// The five vertices of one rectangular lap (back to the start), beginning
/// at corner `first` and running clockwise or counterclockwise.
fn lap_points(origin: (f64, f64), lx: f64, ly: f64, first: usize, cw: bool)
              -> [(f64, f64); 5] {
    let corners = [
        (origin.0, origin.1),
        (origin.0 + lx, origin.1),
        (origin.0 + lx, origin.1 + ly),
        (origin.0, origin.1 + ly),
    ];
    let mut points = [(0.0, 0.0); 5];
    for (k, point) in points.iter_mut().enumerate() {
        let idx = if cw {
            (first + 4 - (k % 4)) % 4
        } else {
            (first + k) % 4
        };
        *point = corners[idx];
    }
    points
}

impl Runtime {
    pub(super) fn command<D: Driver>(&mut self, mnemonic: &str, args: &[Option<Expr>],
                                     driver: &mut D) -> Result<(), ErrType> {
        match mnemonic {
            "MX" => self.single_move(Axis::X, args),
            "MY" => self.single_move(Axis::Y, args),
            "MZ" => self.single_move(Axis::Z, args),
            "MA" => self.single_move(Axis::A, args),
            "MB" => self.single_move(Axis::B, args),
            "MC" => self.single_move(Axis::C, args),
            "M2" => self.modal_move(&Axis::ALL[..2], args),
            "M3" => self.modal_move(&Axis::ALL[..3], args),
            "M4" => self.modal_move(&Axis::ALL[..4], args),
            "M5" => self.modal_move(&Axis::ALL[..5], args),
            "M6" => self.modal_move(&Axis::ALL[..6], args),
            "MH" | "JH" => self.jog_home(),
            "MS" => self.set_move_speeds(args),

            "JX" => self.single_jog(Axis::X, args),
            "JY" => self.single_jog(Axis::Y, args),
            "JZ" => self.single_jog(Axis::Z, args),
            "JA" => self.single_jog(Axis::A, args),
            "JB" => self.single_jog(Axis::B, args),
            "JC" => self.single_jog(Axis::C, args),
            "J2" => self.modal_jog(&Axis::ALL[..2], args),
            "J3" => self.modal_jog(&Axis::ALL[..3], args),
            "J4" => self.modal_jog(&Axis::ALL[..4], args),
            "J5" => self.modal_jog(&Axis::ALL[..5], args),
            "J6" => self.modal_jog(&Axis::ALL[..6], args),
            "JS" => self.set_jog_speeds(args, driver),

            "CG" => self.cut_circle(args),
            "CR" => self.cut_rectangle(args),

            "ZX" => self.zero_axes(&[Axis::X], driver),
            "ZY" => self.zero_axes(&[Axis::Y], driver),
            "ZZ" => self.zero_axes(&[Axis::Z], driver),
            "ZA" => self.zero_axes(&[Axis::A], driver),
            "ZB" => self.zero_axes(&[Axis::B], driver),
            "ZC" => self.zero_axes(&[Axis::C], driver),
            "Z2" => self.zero_axes(&Axis::ALL[..2], driver),
            "Z3" => self.zero_axes(&Axis::ALL[..3], driver),
            "Z4" => self.zero_axes(&Axis::ALL[..4], driver),
            "Z5" => self.zero_axes(&Axis::ALL[..5], driver),
            "Z6" => self.zero_axes(&Axis::ALL[..6], driver),
            "ZT" => self.zero_axes(&Axis::ALL[..3], driver),

            "VA" => self.set_locations(args, driver),
            "VC" => self.set_cutter(args),
            "VS" => self.set_speeds(args),
            "VU" => self.set_units(args, driver),
            "VD" | "VL" | "VN" | "VP" | "VR" => {
                debug!(self.log, "setting command has no effect"; "cmd" => mnemonic);
                Ok(())
            }

            "EP" => self.probe(args, driver),
            "C6" => {
                self.emit("M3".into());
                self.emit("M8".into());
                Ok(())
            }
            "C7" => {
                self.emit("M5".into());
                self.emit("M9".into());
                Ok(())
            }
            "SA" => {
                self.emit("G90".into());
                Ok(())
            }
            "SR" => {
                self.emit("G91".into());
                Ok(())
            }
            "ST" => {
                self.emit("G54".into());
                Ok(())
            }
            _ => {
                // Legacy files carry commands this runtime does not speak;
                // skipping them keeps old programs loadable.
                warn!(self.log, "unhandled command"; "cmd" => mnemonic);
                Ok(())
            }
        }
    }

    // -- argument helpers --

    /// Evaluate the argument at `index`, or `default` if the slot is empty.
    fn arg(&mut self, args: &[Option<Expr>], index: usize, default: f64)
           -> Result<f64, ErrType> {
        match args.get(index).and_then(Option::as_ref) {
            Some(ex) => self.eval(ex),
            None => Ok(default),
        }
    }

    fn arg_opt(&mut self, args: &[Option<Expr>], index: usize)
               -> Result<Option<f64>, ErrType> {
        args.get(index).and_then(Option::as_ref).map(|ex| self.eval(ex)).transpose()
    }

    /// Evaluate the argument at `index`; an empty slot is an error.
    fn arg_req(&mut self, args: &[Option<Expr>], index: usize, cmd: &str)
               -> Result<f64, ErrType> {
        match args.get(index).and_then(Option::as_ref) {
            Some(ex) => self.eval(ex),
            None => Err(ErrType::MissingArg(cmd.into(), index + 1)),
        }
    }

    // -- move and jog families --

    fn single_move(&mut self, axis: Axis, args: &[Option<Expr>]) -> Result<(), ErrType> {
        let target = self.arg_req(args, 0, &format!("M{}", axis))?;
        let feed = self.settings.move_speed(axis) * 60.0;
        self.emit(format!("G1{}{} F{}", axis, fmt_num(target), fmt_num(feed)));
        self.cmd_pos.set(axis, target);
        Ok(())
    }

    /// Multi-axis feed move; omitted axes emit no word and keep their
    /// commanded position.
    fn modal_move(&mut self, axes: &[Axis], args: &[Option<Expr>]) -> Result<(), ErrType> {
        let mut words = String::new();
        let mut targets = vec![];
        for (i, &axis) in axes.iter().enumerate() {
            if let Some(value) = self.arg_opt(args, i)? {
                words.push_str(&format!("{}{}", axis, fmt_num(value)));
                targets.push((axis, value));
            }
        }
        let feed = fmt_num(self.settings.movexy_speed * 60.0);
        if words.is_empty() {
            self.emit(format!("G1F{}", feed));
        } else {
            self.emit(format!("G1{} F{}", words, feed));
        }
        for (axis, value) in targets {
            self.cmd_pos.set(axis, value);
        }
        Ok(())
    }

    fn single_jog(&mut self, axis: Axis, args: &[Option<Expr>]) -> Result<(), ErrType> {
        let target = self.arg_req(args, 0, &format!("J{}", axis))?;
        self.emit(format!("G0{}{}", axis, fmt_num(target)));
        self.cmd_pos.set(axis, target);
        Ok(())
    }

    fn modal_jog(&mut self, axes: &[Axis], args: &[Option<Expr>]) -> Result<(), ErrType> {
        let mut words = String::new();
        let mut targets = vec![];
        for (i, &axis) in axes.iter().enumerate() {
            if let Some(value) = self.arg_opt(args, i)? {
                words.push_str(&format!("{}{}", axis, fmt_num(value)));
                targets.push((axis, value));
            }
        }
        if !words.is_empty() {
            self.emit(format!("G0{}", words));
        }
        for (axis, value) in targets {
            self.cmd_pos.set(axis, value);
        }
        Ok(())
    }

    fn jog_home(&mut self) -> Result<(), ErrType> {
        self.emit("G0X0Y0".into());
        self.cmd_pos.x = 0.0;
        self.cmd_pos.y = 0.0;
        Ok(())
    }

    // -- speed and settings families --

    /// MS: move speeds for XY, Z, A, B, C.
    fn set_move_speeds(&mut self, args: &[Option<Expr>]) -> Result<(), ErrType> {
        if let Some(v) = self.arg_opt(args, 0)? { self.settings.movexy_speed = v; }
        if let Some(v) = self.arg_opt(args, 1)? { self.settings.movez_speed = v; }
        if let Some(v) = self.arg_opt(args, 2)? { self.settings.movea_speed = v; }
        if let Some(v) = self.arg_opt(args, 3)? { self.settings.moveb_speed = v; }
        if let Some(v) = self.arg_opt(args, 4)? { self.settings.movec_speed = v; }
        Ok(())
    }

    /// VS: the full speed block, move speeds then jog speeds.
    fn set_speeds(&mut self, args: &[Option<Expr>]) -> Result<(), ErrType> {
        self.set_move_speeds(args)?;
        if let Some(v) = self.arg_opt(args, 5)? { self.settings.jogxy_speed = v; }
        if let Some(v) = self.arg_opt(args, 6)? { self.settings.jogz_speed = v; }
        if let Some(v) = self.arg_opt(args, 7)? { self.settings.joga_speed = v; }
        if let Some(v) = self.arg_opt(args, 8)? { self.settings.jogb_speed = v; }
        if let Some(v) = self.arg_opt(args, 9)? { self.settings.jogc_speed = v; }
        Ok(())
    }

    /// JS: jog speeds, also pushed into the driver's per-axis velocity
    /// maxima.  The driver writes are fire-and-forget, so this does not
    /// pause execution.
    fn set_jog_speeds<D: Driver>(&mut self, args: &[Option<Expr>], driver: &mut D)
                                 -> Result<(), ErrType> {
        if let Some(v) = self.arg_opt(args, 0)? {
            self.settings.jogxy_speed = v;
            driver.set("xvm", v * 60.0)?;
            driver.set("yvm", v * 60.0)?;
        }
        if let Some(v) = self.arg_opt(args, 1)? {
            self.settings.jogz_speed = v;
            driver.set("zvm", v * 60.0)?;
        }
        if let Some(v) = self.arg_opt(args, 2)? {
            self.settings.joga_speed = v;
            driver.set("avm", v * 60.0)?;
        }
        if let Some(v) = self.arg_opt(args, 3)? {
            self.settings.jogb_speed = v;
            driver.set("bvm", v * 60.0)?;
        }
        if let Some(v) = self.arg_opt(args, 4)? {
            self.settings.jogc_speed = v;
            driver.set("cvm", v * 60.0)?;
        }
        Ok(())
    }

    /// VC: cutter values.
    fn set_cutter(&mut self, args: &[Option<Expr>]) -> Result<(), ErrType> {
        if let Some(v) = self.arg_opt(args, 0)? { self.settings.cutter_dia = v; }
        if let Some(v) = self.arg_opt(args, 1)? { self.settings.pocket_overlap = v; }
        if let Some(v) = self.arg_opt(args, 2)? { self.settings.safe_z_pull_up = v; }
        if let Some(v) = self.arg_opt(args, 3)? { self.settings.safe_a_pull_up = v; }
        if let Some(v) = self.arg_opt(args, 4)? { self.settings.plunge_dir = v; }
        Ok(())
    }

    /// VA: set the current location of each supplied axis by adjusting the
    /// work offset, computed from fresh machine coordinates.
    fn set_locations<D: Driver>(&mut self, args: &[Option<Expr>], driver: &mut D)
                                -> Result<(), ErrType> {
        let mut words = String::new();
        for (i, &axis) in Axis::ALL.iter().enumerate() {
            if let Some(value) = self.arg_opt(args, i)? {
                let mpo = driver.get(&format!("mpo{}", axis.lower()))?;
                words.push_str(&format!(" {}{}", axis, fmt_num(mpo - value)));
                self.cmd_pos.set(axis, value);
            }
        }
        if !words.is_empty() {
            self.emit(format!("G10 L2 P2{}", words));
        }
        Ok(())
    }

    /// VU: unit recalculation.  Reads each supplied motor's step angle and
    /// microstepping, computes the new travel-per-revolution and writes it
    /// back.
    fn set_units<D: Driver>(&mut self, args: &[Option<Expr>], driver: &mut D)
                            -> Result<(), ErrType> {
        for motor in 1..=4usize {
            if let Some(units) = self.arg_opt(args, motor - 1)? {
                if units == 0.0 {
                    return Err(ErrType::DivByZero);
                }
                let sa = driver.get(&format!("{}sa", motor))?;
                let mi = driver.get(&format!("{}mi", motor))?;
                if sa == 0.0 {
                    return Err(ErrType::DivByZero);
                }
                let steps_per_rev = 360.0 / sa * mi;
                driver.set(&format!("{}tr", motor), steps_per_rev / units)?;
            }
        }
        Ok(())
    }

    // -- zeroing and probing --

    /// Set the secondary work-coordinate origin for the given axes from the
    /// current machine position.
    fn zero_axes<D: Driver>(&mut self, axes: &[Axis], driver: &mut D)
                            -> Result<(), ErrType> {
        let mut words = String::new();
        for &axis in axes {
            let mpo = driver.get(&format!("mpo{}", axis.lower()))?;
            words.push_str(&format!(" {}{}", axis, fmt_num(mpo)));
            self.cmd_pos.set(axis, 0.0);
        }
        self.emit(format!("G10 L2 P2{}", words));
        Ok(())
    }

    /// EP: probe straight down.  The probe move runs as its own segment so
    /// the driver result is known before the program continues.
    fn probe<D: Driver>(&mut self, args: &[Option<Expr>], driver: &mut D)
                        -> Result<(), ErrType> {
        let depth = self.arg_req(args, 0, "EP")?;
        driver.run_segment(&format!("G38.2 Z{}", fmt_num(depth)))?;
        self.wait_for_stop(driver)
    }

    // -- toolpath synthesis --

    /// CG: cut an arc or full circle, with optional pocketing and spiral
    /// plunge passes.
    fn cut_circle(&mut self, args: &[Option<Expr>]) -> Result<(), ErrType> {
        let start = self.cmd_pos;
        let dia = self.arg_opt(args, 0)?;
        let end_x = self.arg(args, 1, start.x)?;
        let end_y = self.arg(args, 2, start.y)?;
        let cx_off = self.arg_opt(args, 3)?;
        let cy_off = self.arg_opt(args, 4)?;
        let side = cut_side(args, 5)?;
        let dir = self.arg(args, 6, 1.0)?;
        let plunge = self.arg(args, 7, 0.0)?;
        let reps = self.arg(args, 8, 1.0)?.max(1.0) as usize;
        let prop_x = self.arg(args, 9, 1.0)?;
        let prop_y = self.arg(args, 10, 1.0)?;
        let option = self.arg(args, 11, 1.0)? as i32;
        let no_pull_up = self.arg(args, 12, 0.0)? != 0.0;
        let plunge_from_zero = self.arg(args, 13, 0.0)? != 0.0;

        // A diameter can stand in for the center offsets.
        let (cx_off, cy_off) = match (cx_off, cy_off, dia) {
            (None, None, Some(d)) => (d / 2.0, 0.0),
            (x, y, _) => (x.unwrap_or(0.0), y.unwrap_or(0.0)),
        };
        let cx_off = cx_off * prop_x;
        let cy_off = cy_off * prop_y;
        let end_x = start.x + (end_x - start.x) * prop_x;
        let end_y = start.y + (end_y - start.y) * prop_y;

        let center = (start.x + cx_off, start.y + cy_off);
        let radius = (cx_off * cx_off + cy_off * cy_off).sqrt();
        if radius == 0.0 {
            return Err(ErrType::Other("circle center coincides with the start point".into()));
        }
        let comp = match side {
            CutSide::OnPath => 0.0,
            CutSide::Inside => -self.settings.cutter_dia / 2.0,
            CutSide::Outside => self.settings.cutter_dia / 2.0,
        };
        let scale = (radius + comp) / radius;
        let sx = center.0 + (start.x - center.0) * scale;
        let sy = center.1 + (start.y - center.1) * scale;
        let ex = center.0 + (end_x - center.0) * scale;
        let ey = center.1 + (end_y - center.1) * scale;

        let arc = if dir == 1.0 { "G2" } else { "G3" };
        let xy_feed = self.settings.movexy_speed * 60.0;
        let z_feed = self.settings.movez_speed * 60.0;
        let z0 = if plunge_from_zero { 0.0 } else { start.z };
        let safe_z = start.z + self.settings.safe_z_pull_up;
        let closed = (end_x - start.x).abs() < 1e-9 && (end_y - start.y).abs() < 1e-9;

        let mut px = start.x;
        let mut py = start.y;
        let mut pz = start.z;

        if comp != 0.0 {
            self.emit(format!("G1X{}Y{} F{}", fmt_num(sx), fmt_num(sy), fmt_num(xy_feed)));
            px = sx;
            py = sy;
        }

        match option {
            // Pocket: concentric full circles from the outside in, the pass
            // start always along the start-from-center direction.
            2 => {
                let step = self.settings.cutter_dia
                    * (1.0 - self.settings.pocket_overlap / 100.0);
                if step <= 0.0 {
                    return Err(ErrType::Other("pocket overlap leaves no step-over".into()));
                }
                let outer = radius + comp;
                let ux = (start.x - center.0) / radius;
                let uy = (start.y - center.1) / radius;
                for rep in 0..reps {
                    if plunge != 0.0 {
                        let z = z0 - plunge * (rep + 1) as f64;
                        self.emit(format!("G1Z{} F{}", fmt_num(z), fmt_num(z_feed)));
                        pz = z;
                    }
                    let mut r = outer;
                    while r > 1e-9 {
                        let rx = center.0 + ux * r;
                        let ry = center.1 + uy * r;
                        if (rx - px).abs() > 1e-9 || (ry - py).abs() > 1e-9 {
                            self.emit(format!("G1X{}Y{} F{}",
                                              fmt_num(rx), fmt_num(ry), fmt_num(xy_feed)));
                        }
                        self.emit(format!("{}X{}Y{}I{}J{} F{}", arc,
                                          fmt_num(rx), fmt_num(ry),
                                          fmt_num(center.0 - rx), fmt_num(center.1 - ry),
                                          fmt_num(xy_feed)));
                        px = rx;
                        py = ry;
                        r -= step;
                    }
                    if rep + 1 < reps {
                        self.emit(format!("G0Z{}", fmt_num(safe_z)));
                        pz = safe_z;
                        self.emit(format!("G0X{}Y{}", fmt_num(sx), fmt_num(sy)));
                        px = sx;
                        py = sy;
                    }
                }
            }
            // Spiral plunge: Z descends across each revolution.  The legacy
            // dialect carries the arc center's J offset in the K word here.
            3 | 4 => {
                for rep in 0..reps {
                    let z = z0 - plunge * (rep + 1) as f64;
                    self.emit(format!("{}X{}Y{}Z{}I{}K{} F{}", arc,
                                      fmt_num(ex), fmt_num(ey), fmt_num(z),
                                      fmt_num(center.0 - px), fmt_num(center.1 - py),
                                      fmt_num(xy_feed)));
                    px = ex;
                    py = ey;
                    pz = z;
                }
                if option == 4 {
                    // One flat finishing pass at the bottom.
                    self.emit(format!("{}X{}Y{}I{}J{} F{}", arc,
                                      fmt_num(ex), fmt_num(ey),
                                      fmt_num(center.0 - px), fmt_num(center.1 - py),
                                      fmt_num(xy_feed)));
                    px = ex;
                    py = ey;
                }
            }
            // Simple arc or circle with optional multi-pass plunge.
            _ => {
                for rep in 0..reps {
                    if plunge != 0.0 {
                        let z = z0 - plunge * (rep + 1) as f64;
                        self.emit(format!("G1Z{} F{}", fmt_num(z), fmt_num(z_feed)));
                        pz = z;
                    }
                    self.emit(format!("{}X{}Y{}I{}J{} F{}", arc,
                                      fmt_num(ex), fmt_num(ey),
                                      fmt_num(center.0 - px), fmt_num(center.1 - py),
                                      fmt_num(xy_feed)));
                    px = ex;
                    py = ey;
                    if !closed && rep + 1 < reps {
                        self.emit(format!("G0Z{}", fmt_num(safe_z)));
                        pz = safe_z;
                        self.emit(format!("G0X{}Y{}", fmt_num(sx), fmt_num(sy)));
                        px = sx;
                        py = sy;
                    }
                }
            }
        }

        if !no_pull_up && (pz - start.z).abs() > 1e-9 {
            self.emit(format!("G0Z{}", fmt_num(start.z)));
            pz = start.z;
        }
        self.cmd_pos.x = px;
        self.cmd_pos.y = py;
        self.cmd_pos.z = pz;
        Ok(())
    }

    /// CR: cut a rectangle outline or pocket.
    fn cut_rectangle(&mut self, args: &[Option<Expr>]) -> Result<(), ErrType> {
        let start = self.cmd_pos;
        let len_x = self.arg_req(args, 0, "CR")?;
        let len_y = self.arg(args, 1, len_x)?;
        let side = cut_side(args, 2)?;
        let dir = self.arg(args, 3, 1.0)?;
        let st_corner = self.arg(args, 4, 1.0)? as i32;
        let plunge = self.arg(args, 5, 0.0)?;
        let reps = self.arg(args, 6, 1.0)?.max(1.0) as usize;
        let option = self.arg(args, 7, 1.0)? as i32;
        let plunge_from_zero = self.arg(args, 8, 0.0)? != 0.0;
        let rot_angle = self.arg(args, 9, 0.0)?;
        // Only the Z axis plunges here; the slot is accepted for
        // compatibility with the wider dialect.
        let _plunge_axis = self.arg(args, 10, 0.0)?;
        let spiral_plunge = self.arg(args, 11, 0.0)? != 0.0;

        let comp = match side {
            CutSide::OnPath => 0.0,
            CutSide::Inside => -self.settings.cutter_dia,
            CutSide::Outside => self.settings.cutter_dia,
        };
        let lx = len_x + comp;
        let ly = len_y + comp;
        if lx <= 0.0 || ly <= 0.0 {
            return Err(ErrType::Other("cutter does not fit the rectangle".into()));
        }

        let origin = match st_corner {
            0 => (start.x - lx / 2.0, start.y - ly / 2.0),
            2 => (start.x - lx, start.y),
            3 => (start.x - lx, start.y - ly),
            4 => (start.x, start.y - ly),
            _ => (start.x, start.y),
        };
        let first_corner = match st_corner {
            2 => 1,
            3 => 2,
            4 => 3,
            _ => 0,
        };
        let cw = dir == 1.0;

        // Ring layout: the outline is a single ring; pockets shrink inward
        // by the step-over, inside-out pockets run the same rings reversed.
        let rings: Vec<(f64, f64, f64, f64)> = match option {
            2 | 3 => {
                let step = self.settings.cutter_dia
                    * (1.0 - self.settings.pocket_overlap / 100.0);
                if step <= 0.0 {
                    return Err(ErrType::Other("pocket overlap leaves no step-over".into()));
                }
                let n = ((lx.min(ly) / 2.0) / step).floor() as usize + 1;
                let mut rings: Vec<_> = (0..n)
                    .map(|i| {
                        let inset = i as f64 * step;
                        (origin.0 + inset, origin.1 + inset,
                         (lx - 2.0 * inset).max(0.0), (ly - 2.0 * inset).max(0.0))
                    })
                    .collect();
                if option == 3 {
                    rings.reverse();
                }
                rings
            }
            _ => vec![(origin.0, origin.1, lx, ly)],
        };

        let xy_feed = self.settings.movexy_speed * 60.0;
        let z_feed = self.settings.movez_speed * 60.0;
        let z0 = if plunge_from_zero { 0.0 } else { start.z };
        let safe_z = start.z + self.settings.safe_z_pull_up;

        let mut px = start.x;
        let mut py = start.y;
        let mut pz = start.z;

        for rep in 0..reps {
            let prev_z = z0 - plunge * rep as f64;
            let target_z = z0 - plunge * (rep + 1) as f64;
            let mut first_ring = true;
            for &(ox, oy, rlx, rly) in &rings {
                let pts = lap_points((ox, oy), rlx, rly, first_corner, cw);
                let (lap_x, lap_y) = rotated(pts[0].0, pts[0].1, rot_angle,
                                             start.x, start.y);
                if (lap_x - px).abs() > 1e-9 || (lap_y - py).abs() > 1e-9 {
                    self.emit(format!("G1X{}Y{} F{}",
                                      fmt_num(lap_x), fmt_num(lap_y), fmt_num(xy_feed)));
                    px = lap_x;
                    py = lap_y;
                }
                if first_ring && plunge != 0.0 && !spiral_plunge {
                    self.emit(format!("G1Z{} F{}", fmt_num(target_z), fmt_num(z_feed)));
                    pz = target_z;
                }
                for (k, &(cx, cy)) in pts.iter().enumerate().skip(1) {
                    let (x, y) = rotated(cx, cy, rot_angle, start.x, start.y);
                    if first_ring && spiral_plunge && plunge != 0.0 {
                        // Distribute the plunge across the four vertices of
                        // the first lap.
                        let z = prev_z - plunge * k as f64 / 4.0;
                        self.emit(format!("G1X{}Y{}Z{} F{}",
                                          fmt_num(x), fmt_num(y), fmt_num(z),
                                          fmt_num(xy_feed)));
                        pz = z;
                    } else {
                        self.emit(format!("G1X{}Y{} F{}",
                                          fmt_num(x), fmt_num(y), fmt_num(xy_feed)));
                    }
                    px = x;
                    py = y;
                }
                first_ring = false;
            }
            if rep + 1 < reps {
                self.emit(format!("G0Z{}", fmt_num(safe_z)));
                pz = safe_z;
                let home = lap_points((rings[0].0, rings[0].1), rings[0].2, rings[0].3,
                                      first_corner, cw)[0];
                let (hx, hy) = rotated(home.0, home.1, rot_angle, start.x, start.y);
                if (hx - px).abs() > 1e-9 || (hy - py).abs() > 1e-9 {
                    self.emit(format!("G0X{}Y{}", fmt_num(hx), fmt_num(hy)));
                    px = hx;
                    py = hy;
                }
            }
        }

        self.cmd_pos.x = px;
        self.cmd_pos.y = py;
        self.cmd_pos.z = pz;
        Ok(())
    }
}
