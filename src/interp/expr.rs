// Copyright (c) 2019 Georg Brandl.  Licensed under the Apache License,
// Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at
// your option. This file may not be copied, modified, or distributed except
// according to those terms.

//! Expression evaluation against live machine state.

use std::collections::HashMap;

use crate::ast::{Expr, Op};
use super::enums::{Settings, Status};
use super::error::ErrType;

/// Evaluation context for one statement.
///
/// Evaluation is eager, left-to-right and recursive; the only value type is
/// a floating-point number, with comparisons producing 0.0 or 1.0.  Reading
/// a system variable is recorded in `sysvar_read`, so callers know the
/// result depended on fresh driver data.
pub struct EvalContext<'a> {
    vars: &'a HashMap<String, f64>,
    status: &'a Status,
    settings: &'a Settings,
    pub sysvar_read: bool,
}

impl<'a> EvalContext<'a> {
    pub fn new(vars: &'a HashMap<String, f64>, status: &'a Status,
               settings: &'a Settings) -> EvalContext<'a> {
        EvalContext { vars, status, settings, sysvar_read: false }
    }

    pub fn eval(&mut self, expr: &Expr) -> Result<f64, ErrType> {
        Ok(match expr {
            Expr::Num(value) => *value,
            Expr::Text(text) => text.trim().parse()
                .map_err(|_| ErrType::NotANumber(text.clone()))?,
            Expr::UserVar(name) => match self.vars.get(name) {
                Some(value) => *value,
                None => return Err(ErrType::UndefinedUserVar(name.clone())),
            },
            Expr::SysVar(sel) => {
                let selector = self.eval(sel)?;
                self.sysvar(selector)?
            }
            Expr::Op(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                match op {
                    Op::Add => left + right,
                    Op::Sub => left - right,
                    Op::Mul => left * right,
                    Op::Div => if right == 0. {
                        return Err(ErrType::DivByZero)
                    } else { left / right },
                    Op::Lt => if left <  right { 1.0 } else { 0.0 },
                    Op::Gt => if left >  right { 1.0 } else { 0.0 },
                    Op::Le => if left <= right { 1.0 } else { 0.0 },
                    Op::Ge => if left >= right { 1.0 } else { 0.0 },
                    Op::Eq => if left == right { 1.0 } else { 0.0 },
                    Op::Ne => if left != right { 1.0 } else { 0.0 },
                }
            }
        })
    }

    /// Resolve a system variable by its numeric selector.
    fn sysvar(&mut self, selector: f64) -> Result<f64, ErrType> {
        let rounded = selector.round();
        if (selector - rounded).abs() > 1e-9 {
            return Err(ErrType::UnknownSysVar(selector));
        }
        let value = match rounded as i64 {
            1 => self.status.posx,
            2 => self.status.posy,
            3 => self.status.posz,
            4 => self.status.posa,
            5 => self.status.posb,
            71 | 72 => self.settings.movexy_speed,
            73 => self.settings.movez_speed,
            74 => self.settings.movea_speed,
            75 => self.settings.moveb_speed,
            76 => self.settings.movec_speed,
            144 => self.status.posc,
            _ => return Err(ErrType::UnknownSysVar(selector)),
        };
        self.sysvar_read = true;
        Ok(value)
    }
}

/// Whether evaluating this expression would read a system variable.
///
/// This is a static walk, so the stack-break classifier stays pure.
pub(super) fn reads_sysvar(expr: &Expr) -> bool {
    match expr {
        Expr::SysVar(..) => true,
        Expr::Op(_, left, right) => reads_sysvar(left) || reads_sysvar(right),
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, ErrType> {
        let status = Status { posx: 7.5, ..Status::default() };
        EvalContext::new(vars, &status, &Settings::default()).eval(expr)
    }

    fn binop(op: Op, l: Expr, r: Expr) -> Expr {
        Expr::Op(op, Box::new(l), Box::new(r))
    }

    #[test]
    fn arithmetic_and_comparison() {
        let vars = HashMap::new();
        let e = binop(Op::Add, Expr::Num(2.0), Expr::Num(3.0));
        assert_eq!(eval(&e, &vars).unwrap(), 5.0);
        let e = binop(Op::Le, Expr::Num(2.0), Expr::Num(3.0));
        assert_eq!(eval(&e, &vars).unwrap(), 1.0);
        let e = binop(Op::Div, Expr::Num(1.0), Expr::Num(0.0));
        assert!(matches!(eval(&e, &vars), Err(ErrType::DivByZero)));
    }

    #[test]
    fn sysvar_read_sets_the_flag() {
        let vars = HashMap::new();
        let status = Status { posx: 7.5, ..Status::default() };
        let settings = Settings::default();
        let mut ctx = EvalContext::new(&vars, &status, &settings);
        let e = Expr::SysVar(Box::new(Expr::Num(1.0)));
        assert_eq!(ctx.eval(&e).unwrap(), 7.5);
        assert!(ctx.sysvar_read);
    }

    #[test]
    fn unknown_sysvar_is_an_error() {
        let vars = HashMap::new();
        let e = Expr::SysVar(Box::new(Expr::Num(9999.0)));
        assert!(matches!(eval(&e, &vars), Err(ErrType::UnknownSysVar(_))));
    }

    #[test]
    fn undefined_user_var_is_an_error() {
        let vars = HashMap::new();
        let e = Expr::UserVar("depth".into());
        assert!(matches!(eval(&e, &vars), Err(ErrType::UndefinedUserVar(_))));
    }

    #[test]
    fn classifier_walk_is_static() {
        let e = binop(Op::Add, Expr::Num(1.0),
                      Expr::SysVar(Box::new(Expr::Num(3.0))));
        assert!(reads_sysvar(&e));
        assert!(!reads_sysvar(&Expr::UserVar("a".into())));
    }
}
