// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

use std::{env, fs};

use slog::{Drain, Logger, o};
use slog_term::{TermDecorator, FullFormat};

use opensbp::driver::{Driver, DriverError, DriverState, StatusReport};
use opensbp::interp::Runtime;
use opensbp::parse::parse;

/// A driver that prints every segment to stdout and completes it instantly.
struct StdoutDriver;

impl Driver for StdoutDriver {
    fn run_segment(&mut self, text: &str) -> Result<(), DriverError> {
        println!("{}", text);
        Ok(())
    }

    fn get(&mut self, _key: &str) -> Result<f64, DriverError> {
        Ok(0.0)
    }

    fn set(&mut self, _key: &str, _value: f64) -> Result<(), DriverError> {
        Ok(())
    }

    fn next_state(&mut self) -> Result<DriverState, DriverError> {
        Ok(DriverState::Stop)
    }

    fn poll_status(&mut self) -> Vec<StatusReport> {
        vec![]
    }
}

fn main() {
    let filename = env::args().nth(1).expect("file name required");
    let input = fs::read_to_string(&filename).unwrap();

    let decorator = TermDecorator::new().build();
    let drain = FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = Logger::root(drain, o!());

    match parse(&filename, &input) {
        Err(e) => eprintln!("Parse error: {}", e),
        Ok(prog) => match Runtime::with_logger(prog, logger) {
            Err(e) => eprintln!("{}", e),
            Ok(mut runtime) => {
                let mut driver = StdoutDriver;
                if let Err(e) = runtime.run(&mut driver) {
                    eprintln!("{}", e);
                }
            }
        },
    }
}
