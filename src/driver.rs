// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Contract with the motion-control driver.
//!
//! The driver is the physical motor controller: it accepts G-code segments,
//! exposes named parameters, and reports state transitions and position
//! status.  The runtime talks to it synchronously; every call that touches
//! the wire blocks until the driver answers.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::interp::StopHandle;

/// States the driver reports for its motion machinery.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DriverState {
    Running,
    Homing,
    Probe,
    Stop,
    /// Any state the runtime has no special handling for.
    Other,
}

/// A status record pushed by the driver.
///
/// Absent fields leave the corresponding mirrored value untouched.  The
/// `line` field counts from the start of the currently executing segment;
/// the runtime projects it back onto the source program.
#[derive(Clone, Debug, Default)]
pub struct StatusReport {
    pub posx: Option<f64>,
    pub posy: Option<f64>,
    pub posz: Option<f64>,
    pub posa: Option<f64>,
    pub posb: Option<f64>,
    pub posc: Option<f64>,
    pub line: Option<usize>,
}

/// A failed driver interaction.
#[derive(Debug)]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> DriverError {
        DriverError { message: message.into() }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "driver error: {}", self.message)
    }
}

/// Interface to the motion controller.
pub trait Driver {
    /// Submit a newline-joined G-code segment for execution.  Submission
    /// returns as soon as the segment is queued; completion is observed
    /// through [`next_state`](Driver::next_state).
    fn run_segment(&mut self, text: &str) -> Result<(), DriverError>;

    /// Read a named driver parameter (e.g. `mpox`, `1sa`).
    fn get(&mut self, key: &str) -> Result<f64, DriverError>;

    /// Write a named driver parameter.
    fn set(&mut self, key: &str, value: f64) -> Result<(), DriverError>;

    /// Block until the driver reports its next state transition.
    fn next_state(&mut self) -> Result<DriverState, DriverError>;

    /// Drain the status reports received since the last call.
    fn poll_status(&mut self) -> Vec<StatusReport>;
}

/// An in-memory driver for tests and examples.
///
/// Records every interaction in order, serves parameter reads from a map,
/// and answers each submitted segment with a `Running` → `Stop` transition
/// pair.  Status reports queued in `reports` are handed out on the next
/// poll.
#[derive(Default)]
pub struct TestDriver {
    /// Ordered log of everything the runtime asked for.
    pub ops: Vec<TestOp>,
    /// Parameter values served by `get` and updated by `set`.
    pub params: HashMap<String, f64>,
    /// Status reports delivered by the next `poll_status`.
    pub reports: VecDeque<StatusReport>,
    /// Trip this handle once the given number of segments has been run.
    pub stop_after: Option<(usize, StopHandle)>,
    segments_run: usize,
    states: VecDeque<DriverState>,
}

/// One recorded driver interaction.
#[derive(Clone, Debug, PartialEq)]
pub enum TestOp {
    Segment(String),
    Get(String),
    Set(String, f64),
}

impl TestDriver {
    pub fn new() -> TestDriver {
        TestDriver::default()
    }

    pub fn with_params<I>(params: I) -> TestDriver
        where I: IntoIterator<Item = (&'static str, f64)>
    {
        TestDriver {
            params: params.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            ..TestDriver::default()
        }
    }

    /// The G-code segments run so far, in submission order.
    pub fn segments(&self) -> Vec<&str> {
        self.ops.iter()
            .filter_map(|op| match op {
                TestOp::Segment(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All G-code lines run so far, segment boundaries flattened away.
    pub fn gcode(&self) -> Vec<&str> {
        self.segments().into_iter().flat_map(|s| s.lines()).collect()
    }
}

impl Driver for TestDriver {
    fn run_segment(&mut self, text: &str) -> Result<(), DriverError> {
        self.ops.push(TestOp::Segment(text.into()));
        self.segments_run += 1;
        self.states.push_back(DriverState::Running);
        self.states.push_back(DriverState::Stop);
        if let Some((limit, handle)) = &self.stop_after {
            if self.segments_run >= *limit {
                handle.stop();
            }
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<f64, DriverError> {
        self.ops.push(TestOp::Get(key.into()));
        self.params.get(key).copied()
            .ok_or_else(|| DriverError::new(format!("no such parameter: {}", key)))
    }

    fn set(&mut self, key: &str, value: f64) -> Result<(), DriverError> {
        self.ops.push(TestOp::Set(key.into(), value));
        self.params.insert(key.into(), value);
        Ok(())
    }

    fn next_state(&mut self) -> Result<DriverState, DriverError> {
        Ok(self.states.pop_front().unwrap_or(DriverState::Stop))
    }

    fn poll_status(&mut self) -> Vec<StatusReport> {
        self.reports.drain(..).collect()
    }
}
