// SPDX-License-Identifier: AGPL-3.0

//! Drives every `State` spawned from a program to completion, sorting
//! each into one of four buckets as it finishes: `completed` (ran off the
//! end of the program with a satisfiable path condition), `deadended` (an
//! `If`/`While` branch whose every arm was infeasible), or `errored` (a
//! `SymError` or an exhausted budget). Generalizes the teacher's
//! `Worklist<T>` — a DFS-only stack — into a configurable scheduling
//! policy, since a single discipline doesn't fit every program shape.

use std::collections::VecDeque;

use symex_exceptions::SymError;
use symex_functions::Datum;
use symex_solver::SatResult;
use symex_values::Value;

use crate::objects::ObjectManager;
use crate::path::{BacktraceEntry, Path};
use crate::step::{step, StepOutcome};
use crate::State;

/// Scheduling policy for which active path `PathGroup::step` advances next.
/// Breadth-first is the default: it keeps sibling branches of the same
/// conditional at a similar depth, which surfaces shallow bugs across many
/// branches before diving deep into any one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Bfs,
    Dfs,
}

/// A path that ran off the end of the program with a satisfiable path
/// condition: its solver (for re-querying witnesses), its object table (for
/// name resolution), and the backtrace of statements it executed.
pub struct CompletedPath<'ctx> {
    pub path: Path<'ctx>,
    pub objects: ObjectManager<'ctx>,
}

impl<'ctx> CompletedPath<'ctx> {
    fn from_state(state: State<'ctx>) -> Self {
        Self { path: state.path, objects: state.objects }
    }

    pub fn backtrace(&self) -> &[BacktraceEntry] {
        &self.path.backtrace
    }

    pub fn any_int(&mut self, ctx: u64, name: &str) -> Option<i64> {
        self.path.any_int(&self.objects, ctx, name)
    }

    pub fn any_real(&mut self, ctx: u64, name: &str) -> Option<f64> {
        self.path.any_real(&self.objects, ctx, name)
    }

    pub fn any_str(&mut self, ctx: u64, name: &str) -> Option<String> {
        self.path.any_str(&self.objects, ctx, name)
    }

    pub fn any_list(&mut self, ctx: u64, name: &str) -> Option<Vec<i64>> {
        self.path.any_list(&self.objects, ctx, name)
    }

    pub fn any_n_int(&mut self, ctx: u64, name: &str, n: usize) -> Vec<i64> {
        self.path.any_n_int(&self.objects, ctx, name, n)
    }

    /// Whether an assertion (modeled as a named `Bool`/`Int`/`BitVec`
    /// binding that must hold) is violated on this path: `name` evaluates
    /// to a falsy witness under the path's own constraints.
    pub fn assertion_holds(&mut self, ctx: u64, name: &str) -> bool {
        let Some(datum) = self.objects.current(ctx, name).cloned() else {
            return true;
        };
        match datum {
            Datum::Scalar(Value::Bool(b)) => {
                if self.path.check() != SatResult::Sat {
                    return true;
                }
                let term = symex_solver::Term::Bool(b.as_z3(self.path.context()));
                match self.path.solver.model_eval(&term) {
                    Ok(evaluated) => evaluated.as_bool().and_then(|b| b.as_bool()).unwrap_or(true),
                    Err(_) => true,
                }
            }
            Datum::Scalar(Value::Int(_)) | Datum::Scalar(Value::BitVec(_)) => {
                self.any_int(ctx, name).map(|n| n != 0).unwrap_or(true)
            }
            _ => true,
        }
    }
}

/// Budgets bounding a single `PathGroup::explore` run, preventing an
/// unconditionally-looping program (`while True: pass` with no symbolic
/// exit) from hanging the explorer forever.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    pub max_paths: usize,
    pub max_steps: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_paths: symex_constants::DEFAULT_MAX_PATHS,
            max_steps: symex_constants::DEFAULT_MAX_STEPS,
        }
    }
}

/// Owns every path spawned while exploring one program, bucketed by how it
/// ended. `active` holds paths still being stepped; the other three buckets
/// are terminal.
pub struct PathGroup<'ctx> {
    strategy: Strategy,
    budget: Budget,
    active: VecDeque<State<'ctx>>,
    pub completed: Vec<CompletedPath<'ctx>>,
    pub deadended: Vec<CompletedPath<'ctx>>,
    pub errored: Vec<(CompletedPath<'ctx>, SymError)>,
    steps_taken: usize,
    spawned: usize,
}

impl<'ctx> PathGroup<'ctx> {
    pub fn new(initial: State<'ctx>, strategy: Strategy, budget: Budget) -> Self {
        let mut active = VecDeque::new();
        active.push_back(initial);
        Self {
            strategy,
            budget,
            active,
            completed: Vec::new(),
            deadended: Vec::new(),
            errored: Vec::new(),
            steps_taken: 0,
            spawned: 1,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn pop_next(&mut self) -> Option<State<'ctx>> {
        match self.strategy {
            Strategy::Bfs => self.active.pop_front(),
            Strategy::Dfs => self.active.pop_back(),
        }
    }

    /// Queues a successor, unless doing so would exceed the path budget —
    /// in which case it is routed straight to `errored` instead of silently
    /// dropped. Both strategies enqueue at the same end; the difference is
    /// entirely in which end `pop_next` drains from.
    fn push_successor(&mut self, state: State<'ctx>) {
        if self.spawned >= self.budget.max_paths {
            self.errored.push((
                CompletedPath::from_state(state),
                SymError::Budget(format!("exceeded max_paths={}", self.budget.max_paths)),
            ));
            return;
        }
        self.spawned += 1;
        self.active.push_back(state);
    }

    /// Advances exactly one active path by one statement, routing it into a
    /// terminal bucket if it finished or errored, or re-queuing it (once, or
    /// twice for a fork) otherwise. Returns `false` once there is nothing
    /// left to step, `true` otherwise — `while group.step() {}` drives a
    /// whole group to completion without a budget.
    pub fn step(&mut self) -> bool {
        let Some(state) = self.pop_next() else {
            return false;
        };
        self.steps_taken += 1;
        if self.steps_taken > self.budget.max_steps {
            self.errored.push((
                CompletedPath::from_state(state),
                SymError::Budget(format!("exceeded max_steps={}", self.budget.max_steps)),
            ));
            return true;
        }
        // `step` consumes its argument and a `SymError` carries no state
        // back, so a cheap-relative-to-correctness snapshot is taken first:
        // only used, and only deep-copied once, on the rare error path.
        let snapshot = state.fork();
        match step(state) {
            Ok(StepOutcome::Continue(next)) => self.push_successor(next),
            Ok(StepOutcome::Fork(successors)) => {
                for succ in successors {
                    self.push_successor(succ);
                }
            }
            Ok(StepOutcome::Deadended(state)) => self.deadended.push(CompletedPath::from_state(state)),
            Ok(StepOutcome::Done(state)) => self.completed.push(CompletedPath::from_state(state)),
            Err(err) => self.errored.push((CompletedPath::from_state(snapshot), err)),
        }
        true
    }

    /// Steps every active path to completion, subject to the group's
    /// budget. Use `step` directly when interleaving with external
    /// scheduling (e.g. a CLI progress bar) is desired.
    pub fn explore(&mut self) {
        while self.step() {}
    }
}
