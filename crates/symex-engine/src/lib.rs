// SPDX-License-Identifier: AGPL-3.0

//! Per-path symbolic state, the statement-stepping interpreter, and the
//! path-group explorer that drives a program to completion.
//!
//! A `State` is one path: its solver, its variable bindings, and a work
//! list of statements still to run. `step::step` advances one `State` by
//! one statement (forking it when a conditional branches both ways);
//! `PathGroup` owns the active/completed/deadended/errored buckets and
//! drives many `State`s to completion.

pub mod group;
pub mod objects;
pub mod path;
pub mod resolve;
pub mod step;

pub use group::{Budget, CompletedPath, PathGroup, Strategy};
pub use objects::{Kind, ObjectManager};
pub use path::{BacktraceEntry, Path};
pub use resolve::{resolve_expr, resolve_top, Outcome, Suspension, TopOutcome};

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use symex_ast::{Expr, Param, Program, Stmt};
use symex_constants::{CTX_GLOBAL, CTX_RETURNS};
use symex_functions::{FunctionRegistry, SymbolFactory};
use z3::Context;

/// A user-defined function's signature and body, registered into a
/// `State::functions` table the moment its `FunctionDef` statement executes.
/// Definitions are not hoisted: a call reaching a name before its `def` has
/// run is an undefined-function error, matching top-to-bottom execution
/// order in the source program.
#[derive(Debug, Clone)]
pub struct UserFunction {
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

/// One statement queued for execution, paired with the ledger recording
/// which of its nested user-function calls have already completed across
/// earlier suspend/resume attempts at this same statement.
#[derive(Clone)]
pub struct WorkItem {
    pub stmt: Stmt,
    pub ledger: CallLedger,
}

impl WorkItem {
    pub fn fresh(stmt: Stmt) -> Self {
        Self { stmt, ledger: CallLedger::default() }
    }
}

/// Records, in left-to-right call order, the `ret` ids a statement's nested
/// calls have already resolved to. A retry of the same statement (after its
/// most recent call's callee has returned) replays the identical expression
/// traversal and consumes the next entry instead of suspending again.
#[derive(Clone, Default)]
pub struct CallLedger {
    pub completed: Vec<u64>,
    pub cursor: usize,
}

impl CallLedger {
    pub fn resumed_with(&self, ret_id: u64) -> Self {
        let mut completed = self.completed.clone();
        completed.push(ret_id);
        Self { completed, cursor: 0 }
    }
}

/// The innermost `While` a path is iterating: its test/body/orelse (cloned
/// out so the condition can be re-checked on every pass without re-walking
/// `work`) and the `call_stack` depth of the single control frame pushed
/// when the loop was first entered. That one frame is reused across every
/// iteration — `step::recheck_loop` re-evaluates the condition directly
/// rather than re-dispatching the `While` statement, since dispatching it
/// again would push a second frame per iteration and never pop back to one.
/// `iterations` counts completed passes of the body, checked against
/// `State::loop_bound` on every recheck (the teacher's JUMPI unroll cap,
/// generalized from a per-opcode counter to a per-loop one).
#[derive(Clone)]
pub struct LoopMarker {
    pub test: Expr,
    pub body: Vec<Stmt>,
    pub orelse: Vec<Stmt>,
    pub depth: usize,
    pub iterations: usize,
}

/// What a suspended path resumes into: the caller's remaining work, the
/// context it executes in, and the loop marker it should restore. Both a
/// user-function call and an `If`/`While` branch entry push one of these
/// (spec's wording for both is "pushed onto the call stack"); a call-frame
/// carries the `ret` id its `Return` should bind, `If`/`While` frames carry
/// `None`. Draining `State::work` to empty pops exactly one, which
/// uniformly handles a callee falling off the end of its body and an `If`'s
/// fall-through; `Return` and `Break` unwind explicitly past several frames
/// at once when they need to skip nested `If`/`While` contexts.
#[derive(Clone)]
pub struct Frame {
    pub resume_work: VecDeque<WorkItem>,
    pub resume_ctx: u64,
    pub resume_loop: Option<LoopMarker>,
    pub ret_id: Option<u64>,
}

/// One symbolic execution path: its solver and backtrace, its variable
/// bindings, its pending work, and its call/loop control stack.
pub struct State<'ctx> {
    pub path: Path<'ctx>,
    pub objects: ObjectManager<'ctx>,
    pub work: VecDeque<WorkItem>,
    pub call_stack: Vec<Frame>,
    pub loop_frame: Option<LoopMarker>,
    pub cur_ctx: u64,
    pub functions: HashMap<String, Rc<UserFunction>>,
    pub registry: Rc<FunctionRegistry<'ctx>>,
    pub symbols: SymbolFactory<'ctx>,
    /// Maximum completed passes of any one loop's body before its next
    /// iteration is refused with `SymError::Budget`. Defaults to
    /// `symex_constants::DEFAULT_LOOP_UNROLL_BOUND`; `symex-cli` overrides
    /// it from `Config::loop_bound`.
    pub loop_bound: usize,
    next_ctx: u64,
    next_ret: u64,
    temp_counter: u64,
}

impl<'ctx> State<'ctx> {
    pub fn new(ctx: &'ctx Context, program: Program, registry: Rc<FunctionRegistry<'ctx>>) -> Self {
        Self {
            path: Path::new(ctx),
            objects: ObjectManager::new(),
            work: program.into_iter().map(WorkItem::fresh).collect(),
            call_stack: Vec::new(),
            loop_frame: None,
            cur_ctx: CTX_GLOBAL,
            functions: HashMap::new(),
            registry,
            symbols: SymbolFactory::new(ctx),
            loop_bound: symex_constants::DEFAULT_LOOP_UNROLL_BOUND,
            next_ctx: CTX_RETURNS + 1,
            next_ret: 0,
            temp_counter: 0,
        }
    }

    pub fn alloc_ctx(&mut self) -> u64 {
        let id = self.next_ctx;
        self.next_ctx += 1;
        id
    }

    pub fn alloc_ret(&mut self) -> u64 {
        let id = self.next_ret;
        self.next_ret += 1;
        id
    }

    pub fn fresh_temp_name(&mut self) -> String {
        self.temp_counter += 1;
        format!("~t{}@{}", self.temp_counter, self.cur_ctx)
    }

    pub fn is_done(&self) -> bool {
        self.work.is_empty() && self.call_stack.is_empty()
    }

    /// Deep-copies everything a path exclusively owns (invariant 5): the
    /// solver's assertion log, the object table, the pending work, and the
    /// call/loop stack. `registry` is shared, read-only state built once at
    /// startup and `Rc`-cloned rather than copied.
    pub fn fork(&self) -> Self {
        Self {
            path: self.path.fork(),
            objects: self.objects.deep_copy(),
            work: self.work.clone(),
            call_stack: self.call_stack.clone(),
            loop_frame: self.loop_frame.clone(),
            cur_ctx: self.cur_ctx,
            functions: self.functions.clone(),
            registry: Rc::clone(&self.registry),
            symbols: self.symbols.clone(),
            loop_bound: self.loop_bound,
            next_ctx: self.next_ctx,
            next_ret: self.next_ret,
            temp_counter: self.temp_counter,
        }
    }
}
