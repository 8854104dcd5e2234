// SPDX-License-Identifier: AGPL-3.0

//! In-process SMT solving over Int, Real, Bool and BitVec sorts.
//!
//! Every symbolic state carries a [`Solver`]. Forking a state clones the
//! solver's assertion log rather than the solver itself: `z3`'s term types
//! are reference-counted handles into the shared [`Context`], so cloning the
//! log is cheap and a fresh `z3::Solver` is only materialized when `check()`
//! actually needs to ask the prover a question.

use std::fmt;

use symex_exceptions::SymError;
use z3::ast::{Ast, Bool, Dynamic, Int, Real, BV};
use z3::{Config, Context, Model};

/// Owns the single [`Context`] every solver and term in a run is built from.
///
/// `z3::Context` is not `Clone`; a run allocates exactly one and shares it by
/// reference across every forked path's [`Solver`].
pub fn new_context() -> Context {
    Context::new(&Config::new())
}

/// Like [`new_context`], but every `check()` on a `Solver` built from it
/// gives up after `timeout_ms` and reports [`SatResult::Unknown`] rather
/// than running forever. `symex-cli` wires this to `Config::solver_timeout_ms`.
pub fn new_context_with_timeout(timeout_ms: u32) -> Context {
    let mut cfg = Config::new();
    cfg.set_timeout_msec(timeout_ms);
    Context::new(&cfg)
}

/// Outcome of a satisfiability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

impl fmt::Display for SatResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SatResult::Sat => write!(f, "sat"),
            SatResult::Unsat => write!(f, "unsat"),
            SatResult::Unknown => write!(f, "unknown"),
        }
    }
}

/// The sorts the engine ever constructs a variable or literal of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    Int,
    Real,
    Bool,
    BitVec(u32),
}

/// A typed handle into the solver's term algebra.
///
/// `symex-values` builds its `Value` enum on top of this rather than on the
/// raw `z3::ast` types directly, so sort coercion stays in one place.
#[derive(Clone)]
pub enum Term<'ctx> {
    Int(Int<'ctx>),
    Real(Real<'ctx>),
    Bool(Bool<'ctx>),
    BitVec(BV<'ctx>),
}

impl<'ctx> Term<'ctx> {
    pub fn sort(&self) -> Sort {
        match self {
            Term::Int(_) => Sort::Int,
            Term::Real(_) => Sort::Real,
            Term::Bool(_) => Sort::Bool,
            Term::BitVec(bv) => Sort::BitVec(bv.get_size()),
        }
    }

    pub fn as_bool(&self) -> Option<&Bool<'ctx>> {
        match self {
            Term::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bv(&self) -> Option<&BV<'ctx>> {
        match self {
            Term::BitVec(bv) => Some(bv),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&Int<'ctx>> {
        match self {
            Term::Int(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<&Real<'ctx>> {
        match self {
            Term::Real(r) => Some(r),
            _ => None,
        }
    }

    fn as_dynamic(&self) -> Dynamic<'ctx> {
        match self {
            Term::Int(i) => Dynamic::from_ast(i),
            Term::Real(r) => Dynamic::from_ast(r),
            Term::Bool(b) => Dynamic::from_ast(b),
            Term::BitVec(bv) => Dynamic::from_ast(bv),
        }
    }
}

/// Constructs a fresh named constant of `sort` in `ctx`.
///
/// Mirrors the original interpreter's sort-kind dispatch: the sort tag picks
/// which z3 constructor to call, and the caller never touches `z3::Sort`
/// directly.
pub fn mk_var<'ctx>(ctx: &'ctx Context, name: &str, sort: Sort) -> Term<'ctx> {
    match sort {
        Sort::Int => Term::Int(Int::new_const(ctx, name)),
        Sort::Real => Term::Real(Real::new_const(ctx, name)),
        Sort::Bool => Term::Bool(Bool::new_const(ctx, name)),
        Sort::BitVec(width) => Term::BitVec(BV::new_const(ctx, name, width)),
    }
}

/// A solver bound to a path. Assertions accumulate in an append-only log;
/// `check()` replays them into a scratch `z3::Solver` and discards it.
pub struct Solver<'ctx> {
    ctx: &'ctx Context,
    assertions: Vec<Bool<'ctx>>,
    last_model: Option<Model<'ctx>>,
}

impl<'ctx> Solver<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self {
            ctx,
            assertions: Vec::new(),
            last_model: None,
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    /// Adds a constraint. Permanent for this path; forking clones the log
    /// before the branch-specific constraint is added.
    pub fn add(&mut self, formula: Bool<'ctx>) {
        self.last_model = None;
        self.assertions.push(formula);
    }

    pub fn assertions(&self) -> &[Bool<'ctx>] {
        &self.assertions
    }

    /// Checks satisfiability of the accumulated assertions.
    pub fn check(&mut self) -> SatResult {
        self.check_assuming(&[])
    }

    /// Checks satisfiability of the accumulated assertions plus `extra`,
    /// without adding `extra` to the permanent log. This is how the step
    /// interpreter probes whether a branch condition is reachable before
    /// committing to forking a state for it.
    pub fn check_assuming(&mut self, extra: &[Bool<'ctx>]) -> SatResult {
        let scratch = z3::Solver::new(self.ctx);
        for a in &self.assertions {
            scratch.assert(a);
        }
        for a in extra {
            scratch.assert(a);
        }
        match scratch.check() {
            z3::SatResult::Sat => {
                self.last_model = scratch.get_model();
                SatResult::Sat
            }
            z3::SatResult::Unsat => {
                self.last_model = None;
                SatResult::Unsat
            }
            z3::SatResult::Unknown => {
                self.last_model = None;
                SatResult::Unknown
            }
        }
    }

    /// The model produced by the most recent satisfiable `check`.
    ///
    /// Returns `SolverError` rather than panicking if called before a
    /// successful check, since that indicates a bug in the caller rather
    /// than a meaningfully absent model.
    pub fn model(&self) -> Result<&Model<'ctx>, SymError> {
        self.last_model
            .as_ref()
            .ok_or_else(|| SymError::SolverError("no model: last check was not sat".to_string()))
    }

    /// Evaluates `term` against the last model, instantiating free variables
    /// it doesn't mention (`model_completion = true`).
    pub fn model_eval(&self, term: &Term<'ctx>) -> Result<Term<'ctx>, SymError> {
        let model = self.model()?;
        let evaluated = model
            .eval(&term.as_dynamic(), true)
            .ok_or_else(|| SymError::SolverError("model evaluation failed".to_string()))?;
        dynamic_to_term(evaluated, term.sort())
    }

    /// Deep-clones the assertion log into a new `Solver` over the same
    /// `Context`. This is the operation the path-group explorer calls on
    /// every fork: cheap, since each `Bool<'ctx>` clone is a refcount bump.
    pub fn fork(&self) -> Self {
        Self {
            ctx: self.ctx,
            assertions: self.assertions.clone(),
            last_model: None,
        }
    }
}

fn dynamic_to_term<'ctx>(value: Dynamic<'ctx>, sort: Sort) -> Result<Term<'ctx>, SymError> {
    match sort {
        Sort::Int => value
            .as_int()
            .map(Term::Int)
            .ok_or_else(|| SymError::Internal("model value was not Int-sorted".to_string())),
        Sort::Real => value
            .as_real()
            .map(Term::Real)
            .ok_or_else(|| SymError::Internal("model value was not Real-sorted".to_string())),
        Sort::Bool => value
            .as_bool()
            .map(Term::Bool)
            .ok_or_else(|| SymError::Internal("model value was not Bool-sorted".to_string())),
        Sort::BitVec(_) => value
            .as_bv()
            .map(Term::BitVec)
            .ok_or_else(|| SymError::Internal("model value was not BitVec-sorted".to_string())),
    }
}
