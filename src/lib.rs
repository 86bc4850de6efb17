// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! An OpenSBP part-program runtime for ShopBot-class CNC machine tools.
//!
//! OpenSBP is a line-oriented command language: two-letter mnemonics with
//! comma-separated arguments, `&name` user variables, `%(n)` system
//! variables exposing live machine state, and label-based control flow.
//! This crate parses the dialect into an AST (`ast`, `parse`) and executes
//! it with the runtime in `interp`, which turns each command into G-code
//! and streams it in ordered segments to a motion-control
//! [`Driver`](driver::Driver).
//!
//! Statements whose execution depends on fresh driver data (zeroing,
//! probing, system-variable reads) force the pending G-code out and a wait
//! for the driver to come to a stop before the program continues; see the
//! `interp` module docs for the chunking model.
//!
//! ## Basic usage
//!
//! The following code (the same as the "sbp-run" demo binary, minus the
//! logger) takes a file as an argument and prints the G-code a driver
//! would receive.
//!
//! ```rust,no_run
//! use std::{env, fs};
//! use opensbp::{driver::TestDriver, interp::Runtime, parse::parse};
//!
//! fn main() {
//!     let filename = env::args().nth(1).unwrap();
//!     let input = fs::read_to_string(&filename).unwrap();
//!
//!     let prog = parse(&filename, &input).unwrap();
//!     let mut runtime = Runtime::new(prog).unwrap();
//!     let mut driver = TestDriver::new();
//!     runtime.run(&mut driver).unwrap();
//!     for line in driver.gcode() {
//!         println!("{}", line);
//!     }
//! }
//! ```
//!
//! ## Unsupported features
//!
//! The interactive manual-drive mode of the machines is a separate concern
//! and not part of this crate; `PAUSE` without a dwell time is accepted
//! but does not hold the program.


pub mod ast;
pub mod parse;
pub mod driver;
pub mod interp;
pub mod transform;

// internal helpers
pub(crate) mod util;
