// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! The OpenSBP runtime: walks a parsed program, evaluates expressions
//! against live machine state and streams G-code segments to the driver.
//!
//! G-code produced by the command handlers collects in a chunk until a
//! *stack break*: a statement that needs the driver to finish in-flight
//! motion before the program can continue, either because its handler does
//! driver round trips (zeroing, probing, unit updates) or because one of
//! its expressions reads a system variable.  At a break the chunk is
//! flushed as one segment and the runtime waits for the driver's
//! running → stop transition; everything emitted before the break reaches
//! the driver before any value is read at the break.

mod enums;
mod error;
mod expr;
mod handlers;

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use slog::{Logger, o, trace, debug, info};

use crate::ast::{Program, Statement};
use crate::driver::{Driver, DriverState, StatusReport};
use crate::util::fmt_num;

pub use self::enums::*;
pub use self::error::*;
pub use self::expr::EvalContext;

/// Number of G-code lines after which a chunk is shipped even without a
/// natural flush point, so emit-only loops still stream to the driver.
const MAX_CHUNK_LINES: usize = 128;

/// Shared flag for requesting that a running program stop.
///
/// The engine checks it on every iteration and on resume from every
/// suspension; a tripped flag discards the pending chunk and ends the run
/// without advancing the program counter further.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    fn is_stopped(&self) -> bool {
        self.0.get()
    }

    fn clear(&self) {
        self.0.set(false);
    }
}

/// Trait for observers of merged status records.
pub trait StatusListener {
    /// Called whenever the mirrored status has been updated.
    fn status(&mut self, status: &Status);
}

impl<F> StatusListener for F where F: FnMut(&Status) {
    fn status(&mut self, status: &Status) {
        self(status)
    }
}

/// The part-program runtime.
///
/// Owns the mirrored machine status, the machining settings and the
/// program-counter state of one run.  A `Runtime` is single-threaded and
/// holds the driver connection exclusively while [`run`](Runtime::run) is
/// executing.
pub struct Runtime {
    program: Program,
    labels: HashMap<String, usize>,
    log: Logger,

    pc: usize,
    stack: Vec<usize>,
    vars: HashMap<String, f64>,
    /// Where the runtime has last sent the tool; geometry handlers work
    /// from this, never from the (possibly stale) mirrored status.
    pub(crate) cmd_pos: Pos,
    pub(crate) settings: Settings,
    status: Status,
    state: MachineState,
    started: bool,
    sysvar_evaluated: bool,
    chunk_broken_for_eval: bool,

    chunk: Vec<String>,
    /// Statement index at which the current chunk began; used to project
    /// driver-reported line numbers back onto the source.
    chunk_start: usize,

    stop: StopHandle,
    listeners: Vec<Box<dyn StatusListener>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("pc", &self.pc)
            .field("state", &self.state)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Create a runtime for a parsed program.
    ///
    /// The program's labels are analyzed here; a duplicate label or an
    /// unresolved branch target is reported before anything executes.
    pub fn new(program: Program) -> Result<Runtime, RuntimeError> {
        Runtime::with_logger(program, Logger::root(slog::Discard, o!()))
    }

    pub fn with_logger(program: Program, log: Logger) -> Result<Runtime, RuntimeError> {
        let labels = analyze(&program)?;
        Ok(Runtime {
            program,
            labels,
            log,
            pc: 0,
            stack: vec![],
            vars: HashMap::new(),
            cmd_pos: Pos::default(),
            settings: Settings::default(),
            status: Status::default(),
            state: MachineState::Idle,
            started: false,
            sysvar_evaluated: false,
            chunk_broken_for_eval: false,
            chunk: vec![],
            chunk_start: 0,
            stop: StopHandle::default(),
            listeners: vec![],
        })
    }

    /// A handle an external actor can use to stop the run at the next
    /// opportunity.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Whether a run has been started on this runtime and not yet finished.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Whether any expression evaluated so far in the current statement
    /// window read a system variable.
    pub fn sysvar_evaluated(&self) -> bool {
        self.sysvar_evaluated
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_listener<L: StatusListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    pub fn clear_listeners(&mut self) {
        self.listeners.clear();
    }

    /// Execute the program against a driver, from the first statement to
    /// `END` (or the end of the source), streaming G-code as it goes.
    ///
    /// On a runtime error the pending chunk is discarded, the machine
    /// returns to idle and the error is reported with its source line.  An
    /// externally requested stop ends the run without an error.
    pub fn run<D: Driver>(&mut self, driver: &mut D) -> Result<(), RuntimeError> {
        info!(self.log, "run started";
              "file" => %self.program.filename, "lines" => self.program.lines.len());
        self.stop.clear();
        self.state = MachineState::Running;
        self.started = true;
        self.status.filename = Some(self.program.filename.clone());
        self.status.nb_lines = Some(self.program.lines.len());
        self.publish();

        let result = self.exec_loop(driver);
        let stopped = self.stop.is_stopped();
        self.finish();
        match result {
            Ok(()) => {
                info!(self.log, "run finished"; "stopped" => stopped);
                Ok(())
            }
            Err(err) => {
                info!(self.log, "run failed"; "error" => %err);
                Err(err)
            }
        }
    }

    // -- private API --

    fn exec_loop<D: Driver>(&mut self, driver: &mut D) -> Result<(), RuntimeError> {
        loop {
            if self.stop.is_stopped() {
                debug!(self.log, "stop requested; discarding pending chunk";
                       "lines" => self.chunk.len());
                self.chunk.clear();
                self.state = MachineState::Stopped;
                return Ok(());
            }
            if self.pc >= self.program.lines.len() {
                return self.flush(driver).map_err(|e| self.error_here(e));
            }
            self.sysvar_evaluated = false;
            let stmt = self.program.lines[self.pc].stmt.clone();
            if self.breaks_stack(&stmt) {
                let handler_break = matches!(&stmt,
                    Statement::Cmd { mnemonic, .. } if handlers::breaks(mnemonic));
                self.chunk_broken_for_eval = !handler_break;
                self.flush(driver).map_err(|e| self.error_here(e))?;
                if self.stop.is_stopped() {
                    continue;
                }
            }
            self.execute(&stmt, driver).map_err(|e| self.error_here(e))?;
            if self.chunk.len() >= MAX_CHUNK_LINES {
                self.flush(driver).map_err(|e| self.error_here(e))?;
            }
        }
    }

    /// Whether the statement needs a flush and a driver round trip before
    /// the next statement can be interpreted.
    fn breaks_stack(&self, stmt: &Statement) -> bool {
        match stmt {
            Statement::Cmd { mnemonic, args } => {
                handlers::breaks(mnemonic)
                    || args.iter().flatten().any(expr::reads_sysvar)
            }
            Statement::Assign { expr, .. } => expr::reads_sysvar(expr),
            Statement::If { test, then } => {
                expr::reads_sysvar(test) || self.breaks_stack(then)
            }
            Statement::Pause(Some(ex)) => expr::reads_sysvar(ex),
            _ => false,
        }
    }

    fn execute<D: Driver>(&mut self, stmt: &Statement, driver: &mut D)
                          -> Result<(), ErrType> {
        match stmt {
            Statement::Cmd { mnemonic, args } => {
                self.command(mnemonic, args, driver)?;
                self.pc += 1;
            }
            Statement::Assign { name, expr } => {
                let value = self.eval(expr)?;
                self.vars.insert(name.clone(), value);
                self.pc += 1;
            }
            Statement::If { test, then } => {
                if self.eval(test)? != 0.0 {
                    self.execute(then, driver)?;
                } else {
                    self.pc += 1;
                }
            }
            Statement::Goto(label) => self.pc = self.labels[label.as_str()],
            Statement::Gosub(label) => {
                self.stack.push(self.pc + 1);
                self.pc = self.labels[label.as_str()];
            }
            Statement::Return => {
                self.pc = self.stack.pop().ok_or(ErrType::ReturnWithoutGosub)?;
            }
            Statement::End => self.pc = self.program.lines.len(),
            Statement::Label(..) | Statement::Comment(..) => self.pc += 1,
            Statement::Pause(expr) => {
                // An indefinite pause needs an interactive surface, which
                // this runtime does not own; only timed dwells are emitted.
                if let Some(ex) = expr {
                    let seconds = self.eval(ex)?;
                    self.emit(format!("G4 P{}", fmt_num(seconds)));
                }
                self.pc += 1;
            }
        }
        Ok(())
    }

    pub(crate) fn eval(&mut self, expr: &crate::ast::Expr) -> Result<f64, ErrType> {
        let mut ctx = EvalContext::new(&self.vars, &self.status, &self.settings);
        let value = ctx.eval(expr)?;
        self.sysvar_evaluated |= ctx.sysvar_read;
        Ok(value)
    }

    /// Append one G-code line to the pending chunk.
    pub(crate) fn emit(&mut self, line: String) {
        if self.chunk.is_empty() {
            self.chunk_start = self.pc;
        }
        trace!(self.log, "emit"; "gcode" => %line);
        self.chunk.push(line);
    }

    /// Ship the pending chunk as one segment and wait for the driver to
    /// come back to a stop.  A flush with nothing pending does not touch
    /// the driver at all.
    fn flush<D: Driver>(&mut self, driver: &mut D) -> Result<(), ErrType> {
        if self.chunk.is_empty() {
            return Ok(());
        }
        let lines = self.chunk.len();
        let segment = self.chunk.join("\n");
        self.chunk.clear();
        debug!(self.log, "flushing chunk"; "lines" => lines, "start" => self.chunk_start,
               "for_eval" => self.chunk_broken_for_eval);
        driver.run_segment(&segment)?;
        self.wait_for_stop(driver)
    }

    /// Block until the driver reports a stop, mirroring status on the way.
    pub(crate) fn wait_for_stop<D: Driver>(&mut self, driver: &mut D)
                                           -> Result<(), ErrType> {
        loop {
            self.drain_status(driver);
            match driver.next_state()? {
                DriverState::Stop => break,
                state => trace!(self.log, "driver state"; "state" => ?state),
            }
        }
        self.drain_status(driver);
        Ok(())
    }

    fn drain_status<D: Driver>(&mut self, driver: &mut D) {
        for report in driver.poll_status() {
            self.mirror(report);
        }
    }

    /// Merge one driver report into the local status record, projecting the
    /// segment-relative line number back onto the source program.
    fn mirror(&mut self, report: StatusReport) {
        if let Some(v) = report.posx { self.status.posx = v; }
        if let Some(v) = report.posy { self.status.posy = v; }
        if let Some(v) = report.posz { self.status.posz = v; }
        if let Some(v) = report.posa { self.status.posa = v; }
        if let Some(v) = report.posb { self.status.posb = v; }
        if let Some(v) = report.posc { self.status.posc = v; }
        if let Some(line) = report.line {
            self.status.line = line + self.chunk_start;
        }
        self.publish();
    }

    fn publish(&mut self) {
        let status = self.status.clone();
        for listener in &mut self.listeners {
            listener.status(&status);
        }
    }

    /// Reset per-run state and return the machine to idle.
    fn finish(&mut self) {
        self.pc = 0;
        self.stack.clear();
        self.chunk.clear();
        self.vars.clear();
        self.started = false;
        self.sysvar_evaluated = false;
        self.chunk_broken_for_eval = false;
        self.status.filename = None;
        self.status.nb_lines = None;
        self.status.line = 0;
        self.state = MachineState::Idle;
        self.publish();
    }

    fn error_here(&self, errtype: ErrType) -> RuntimeError {
        let lineno = self.program.lines.get(self.pc)
            .or_else(|| self.program.lines.last())
            .map(|line| line.lineno)
            .unwrap_or(0);
        RuntimeError { lineno, errtype }
    }
}

/// Build the label table (duplicates are fatal), then check that every
/// branch target resolves.
fn analyze(program: &Program) -> Result<HashMap<String, usize>, RuntimeError> {
    let mut labels = HashMap::new();
    for (index, line) in program.lines.iter().enumerate() {
        if let Statement::Label(name) = &line.stmt {
            if labels.insert(name.clone(), index).is_some() {
                return Err(RuntimeError {
                    lineno: line.lineno,
                    errtype: ErrType::DuplicateLabel(name.clone()),
                });
            }
        }
    }
    for line in &program.lines {
        check_targets(&line.stmt, line.lineno, &labels)?;
    }
    Ok(labels)
}

fn check_targets(stmt: &Statement, lineno: usize, labels: &HashMap<String, usize>)
                 -> Result<(), RuntimeError> {
    match stmt {
        Statement::Goto(label) | Statement::Gosub(label) => {
            if !labels.contains_key(label) {
                return Err(RuntimeError {
                    lineno,
                    errtype: ErrType::UndefinedLabel(label.clone()),
                });
            }
        }
        Statement::If { then, .. } => check_targets(then, lineno, labels)?,
        _ => (),
    }
    Ok(())
}
