// SPDX-License-Identifier: AGPL-3.0

//! A path's solver handle, backtrace, and completed-state query interface.
//!
//! The teacher's own `Path` tracked `conditions`/`related`/`var_to_conds`/
//! `term_to_vars` to avoid re-sending assertion history to an external
//! SMT-LIB2 process on every branch probe. That problem does not exist
//! here: `symex-solver::Solver` already runs `z3` in-process and its own
//! `fork`/`check_assuming` give a path everything it needs, so this `Path`
//! is a thin wrapper adding only what the solver facade doesn't: a
//! human-readable backtrace of executed statements, and the witness-style
//! query methods (`any_int`, `any_str`, ...) the external interface exposes
//! on a completed path.

use symex_ast::SourceLoc;
use symex_functions::Datum;
use symex_solver::{SatResult, Solver, Term};
use symex_values::{BitVecValue, IntValue, Value};
use z3::Context;

use crate::objects::ObjectManager;

/// One executed statement, recorded for `format_backtrace`/debugging and for
/// property P6's "backtrace length" scenario.
#[derive(Debug, Clone)]
pub struct BacktraceEntry {
    pub description: String,
    pub loc: SourceLoc,
}

/// A path's solver handle plus everything needed to answer queries once the
/// path is `completed`: the object manager (for name lookups) and an
/// execution backtrace.
pub struct Path<'ctx> {
    pub solver: Solver<'ctx>,
    pub backtrace: Vec<BacktraceEntry>,
}

impl<'ctx> Path<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            solver: Solver::new(ctx),
            backtrace: Vec::new(),
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.solver.context()
    }

    /// Deep-copies the solver's assertion log and the backtrace so far.
    /// Called once per successor on every fork (invariant 5).
    pub fn fork(&self) -> Self {
        Self {
            solver: self.solver.fork(),
            backtrace: self.backtrace.clone(),
        }
    }

    pub fn record(&mut self, description: impl Into<String>, loc: SourceLoc) {
        self.backtrace.push(BacktraceEntry {
            description: description.into(),
            loc,
        });
    }

    /// Probes whether `extra` is satisfiable alongside everything already
    /// asserted, without persisting `extra`. Used by `If`/`While` to decide
    /// whether a branch is worth forking into at all.
    pub fn is_feasible(&mut self, extra: &[z3::ast::Bool<'ctx>]) -> bool {
        matches!(self.solver.check_assuming(extra), SatResult::Sat)
    }

    pub fn check(&mut self) -> SatResult {
        self.solver.check()
    }

    /// A single satisfying integer witness for `name` in `ctx`, or `None` if
    /// the name is unbound, not integer/bit-vector sorted, or the path is
    /// infeasible.
    pub fn any_int(&mut self, objects: &ObjectManager<'ctx>, ctx: u64, name: &str) -> Option<i64> {
        let datum = objects.current(ctx, name)?;
        if self.solver.check() != SatResult::Sat {
            return None;
        }
        match datum {
            Datum::Scalar(Value::Int(v)) => match v {
                IntValue::Concrete(n) => Some(*n),
                IntValue::Symbolic(_) => {
                    let term = Term::Int(v.as_z3(self.context()));
                    let evaluated = self.solver.model_eval(&term).ok()?;
                    evaluated.as_int()?.as_i64()
                }
            },
            Datum::Scalar(Value::BitVec(v)) => {
                let evaluated = self
                    .solver
                    .model_eval(&Term::BitVec(v.as_z3(self.context())))
                    .ok()?;
                let bv = BitVecValue::from_z3(evaluated.as_bv()?.clone());
                Some(bv.as_biguint().ok()?.to_string().parse().ok()?)
            }
            _ => None,
        }
    }

    /// A single satisfying real witness, accepting an integer-valued witness
    /// implicitly (the query is defined over "a real or an integer that
    /// stands in for one").
    pub fn any_real(&mut self, objects: &ObjectManager<'ctx>, ctx: u64, name: &str) -> Option<f64> {
        let datum = objects.current(ctx, name)?;
        if self.solver.check() != SatResult::Sat {
            return None;
        }
        match datum {
            Datum::Scalar(Value::Real(v)) => {
                let evaluated = self.solver.model_eval(&Term::Real(v.as_z3().clone())).ok()?;
                real_term_to_f64(evaluated)
            }
            Datum::Scalar(Value::Int(_)) => self
                .any_int(objects, ctx, name)
                .map(|n| n as f64),
            _ => None,
        }
    }

    /// Materializes a `String` binding byte-wise via its `Char` sequence.
    pub fn any_str(&mut self, objects: &ObjectManager<'ctx>, ctx: u64, name: &str) -> Option<String> {
        let datum = objects.current(ctx, name)?;
        let Datum::Str(s) = datum else { return None };
        if self.solver.check() != SatResult::Sat {
            return None;
        }
        let mut bytes = Vec::with_capacity(s.len());
        for ch in s.chars() {
            let evaluated = self
                .solver
                .model_eval(&Term::BitVec(ch.0.as_z3(self.context())))
                .ok()?;
            let bv = BitVecValue::from_z3(evaluated.as_bv()?.clone());
            bytes.push(bv.as_biguint().ok()?.to_string().parse::<u32>().ok()? as u8);
        }
        String::from_utf8(bytes).ok()
    }

    /// Recursively materializes a `List` binding's scalar elements.
    pub fn any_list(
        &mut self,
        objects: &ObjectManager<'ctx>,
        ctx: u64,
        name: &str,
    ) -> Option<Vec<i64>> {
        let datum = objects.current(ctx, name)?.clone();
        let Datum::List(list) = datum else { return None };
        if self.solver.check() != SatResult::Sat {
            return None;
        }
        list.elements()
            .iter()
            .map(|v| self.eval_scalar_as_int(v))
            .collect()
    }

    fn eval_scalar_as_int(&mut self, value: &Value<'ctx>) -> Option<i64> {
        match value {
            Value::Int(IntValue::Concrete(n)) => Some(*n),
            Value::Int(IntValue::Symbolic(n)) => {
                let evaluated = self.solver.model_eval(&Term::Int(n.clone())).ok()?;
                evaluated.as_int()?.as_i64()
            }
            Value::BitVec(bv) => {
                let evaluated = self
                    .solver
                    .model_eval(&Term::BitVec(bv.as_z3(self.context())))
                    .ok()?;
                BitVecValue::from_z3(evaluated.as_bv()?.clone())
                    .as_biguint()
                    .ok()?
                    .to_string()
                    .parse()
                    .ok()
            }
            _ => None,
        }
    }

    /// Up to `n` distinct integer witnesses for `name`, found by iteratively
    /// asserting `var != previous` in a scratch fork. A name is "static" iff
    /// this returns exactly one witness.
    pub fn any_n_int(
        &mut self,
        objects: &ObjectManager<'ctx>,
        ctx: u64,
        name: &str,
        n: usize,
    ) -> Vec<i64> {
        let term = match objects.current(ctx, name) {
            Some(Datum::Scalar(Value::Int(IntValue::Concrete(c)))) => return vec![*c],
            Some(Datum::Scalar(Value::Int(IntValue::Symbolic(t)))) => t.clone(),
            _ => return Vec::new(),
        };
        let z3ctx = self.context();
        let mut witnesses = Vec::new();
        let mut scratch = self.solver.fork();
        while witnesses.len() < n {
            if scratch.check() != SatResult::Sat {
                break;
            }
            let evaluated = match scratch.model_eval(&Term::Int(term.clone())) {
                Ok(v) => v,
                Err(_) => break,
            };
            let Some(value) = evaluated.as_int().and_then(|i| i.as_i64()) else {
                break;
            };
            witnesses.push(value);
            let distinct = IntValue::Symbolic(term.clone())
                .eq(&IntValue::concrete(value), z3ctx)
                .not(z3ctx);
            scratch.add(distinct.as_z3(z3ctx));
        }
        witnesses
    }
}

fn real_term_to_f64(term: Term<'_>) -> Option<f64> {
    let real = term.as_real()?;
    let (num, den) = real.as_real()?;
    Some(num as f64 / den as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symex_constants::CTX_GLOBAL;
    use symex_solver::new_context;

    #[test]
    fn concrete_int_witness_needs_no_model() {
        let ctx = new_context();
        let mut path = Path::new(&ctx);
        let mut objects = ObjectManager::new();
        objects.bind(CTX_GLOBAL, "x", Datum::Scalar(Value::Int(IntValue::concrete(5))));
        assert_eq!(path.any_int(&objects, CTX_GLOBAL, "x"), Some(5));
    }

    #[test]
    fn symbolic_int_witness_respects_constraints() {
        let ctx = new_context();
        let mut path = Path::new(&ctx);
        let mut objects = ObjectManager::new();
        let x = IntValue::symbolic(&ctx, "0x@0");
        objects.bind(CTX_GLOBAL, "x", Datum::Scalar(Value::Int(x.clone())));
        path.solver.add(x.eq(&IntValue::concrete(7), &ctx).as_z3(&ctx));
        assert_eq!(path.any_int(&objects, CTX_GLOBAL, "x"), Some(7));
    }

    #[test]
    fn unbound_name_has_no_witness() {
        let ctx = new_context();
        let mut path = Path::new(&ctx);
        let objects = ObjectManager::new();
        assert_eq!(path.any_int(&objects, CTX_GLOBAL, "missing"), None);
    }
}
