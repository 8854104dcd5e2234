// SPDX-License-Identifier: AGPL-3.0

//! Statement dispatch: advances one `State` by exactly one queued
//! statement, forking it when a branch (an `If`/`While` test, or a
//! forking simulated call) is satisfiable both ways.

use std::rc::Rc;

use symex_ast::Stmt;
use symex_constants::CTX_RETURNS;
use symex_exceptions::{SymError, SymResult};
use symex_functions::{Branch, Datum};
use symex_values::{BoolValue, Value};

use crate::resolve::{bind_value, eval_numeric_binop, resolve_expr, resolve_top, Outcome, TopOutcome};
use crate::{CallLedger, Frame, LoopMarker, State, UserFunction, WorkItem};

/// What running one statement produced.
pub enum StepOutcome<'ctx> {
    /// The path is still active; `work` may now be empty, in which case the
    /// next call to `step` pops a `Frame` or finds the path complete.
    Continue(State<'ctx>),
    /// The statement forked the path (an `If`/`While` satisfiable on both
    /// sides, or a simulated call returning several branches). Each
    /// successor is an independent path the caller should schedule.
    Fork(Vec<State<'ctx>>),
    /// Every branch of a conditional was infeasible: the path is pruned.
    Deadended(State<'ctx>),
    /// `work` and `call_stack` are both empty: the path ran to completion.
    Done(State<'ctx>),
}

/// Advances `state` by one statement. Consumes and returns `state` (rather
/// than `&mut State`) so a fork can hand back several independent owners.
pub fn step<'ctx>(mut state: State<'ctx>) -> SymResult<StepOutcome<'ctx>> {
    if state.is_done() {
        return Ok(StepOutcome::Done(state));
    }

    let Some(item) = state.work.pop_front() else {
        return unwind_one(state);
    };

    let WorkItem { stmt, ledger } = item;
    dispatch(state, stmt, ledger)
}

fn dispatch<'ctx>(mut state: State<'ctx>, stmt: Stmt, mut ledger: CallLedger) -> SymResult<StepOutcome<'ctx>> {
    match &stmt {
        Stmt::Pass { loc } => {
            state.path.record("pass", *loc);
            Ok(StepOutcome::Continue(state))
        }

        Stmt::Break { loc } => {
            state.path.record("break", *loc);
            unwind_break(state)
        }

        Stmt::FunctionDef { name, params, body, loc } => {
            state.path.record(format!("def {name}"), *loc);
            state.functions.insert(
                name.clone(),
                Rc::new(UserFunction { params: params.clone(), body: body.clone() }),
            );
            Ok(StepOutcome::Continue(state))
        }

        Stmt::Assign { target, value, loc } => match resolve_top(&mut state, &mut ledger, value)? {
            TopOutcome::Suspend(s) => Ok(suspend(state, stmt, ledger, s)),
            TopOutcome::Value(datum) => {
                state.path.record(format!("{target} = ..."), *loc);
                let ctx_id = state.cur_ctx;
                bind_value(&mut state, ctx_id, target, datum);
                Ok(StepOutcome::Continue(state))
            }
            TopOutcome::Fork(branches) => {
                state.path.record(format!("{target} = ..."), *loc);
                let target = target.clone();
                fork_on_branches(state, branches, move |s, result| {
                    let ctx_id = s.cur_ctx;
                    bind_value(s, ctx_id, &target, result);
                })
            }
        },

        Stmt::AugAssign { target, op, value, loc } => {
            let current = state
                .objects
                .current(state.cur_ctx, target)
                .cloned()
                .ok_or_else(|| SymError::Internal(format!("unbound name `{target}` at {loc}")))?;
            let Datum::Scalar(current) = current else {
                return Err(SymError::TypeClash {
                    op: format!("{op:?}="),
                    left: current.kind().to_string(),
                    right: "scalar".to_string(),
                });
            };
            let rhs = match resolve_expr(&mut state, &mut ledger, value)? {
                Outcome::Suspend(s) => return Ok(suspend(state, stmt, ledger, s)),
                Outcome::Value(Datum::Scalar(v)) => v,
                Outcome::Value(other) => {
                    return Err(SymError::TypeClash {
                        op: format!("{op:?}="),
                        left: other.kind().to_string(),
                        right: "scalar".to_string(),
                    })
                }
            };
            state.path.record(format!("{target} {op:?}= ..."), *loc);
            let result = eval_numeric_binop(&mut state, *op, current, rhs)?;
            let ctx_id = state.cur_ctx;
            bind_value(&mut state, ctx_id, target, Datum::Scalar(result));
            Ok(StepOutcome::Continue(state))
        }

        Stmt::Expr { value, loc } => match resolve_top(&mut state, &mut ledger, value)? {
            TopOutcome::Suspend(s) => Ok(suspend(state, stmt, ledger, s)),
            TopOutcome::Value(_) => {
                state.path.record("expr", *loc);
                Ok(StepOutcome::Continue(state))
            }
            TopOutcome::Fork(branches) => {
                state.path.record("expr", *loc);
                fork_on_branches(state, branches, |_, _| {})
            }
        },

        Stmt::Return { value, loc } => {
            let resolved = match value {
                None => None,
                Some(expr) => match resolve_expr(&mut state, &mut ledger, expr)? {
                    Outcome::Suspend(s) => return Ok(suspend(state, stmt, ledger, s)),
                    Outcome::Value(datum) => Some(datum),
                },
            };
            state.path.record("return", *loc);
            unwind_return(state, resolved)
        }

        Stmt::If { test, body, orelse, loc } => match resolve_expr(&mut state, &mut ledger, test)? {
            Outcome::Suspend(s) => Ok(suspend(state, stmt, ledger, s)),
            Outcome::Value(Datum::Scalar(Value::Bool(cond))) => {
                state.path.record("if", *loc);
                push_control_frame(&mut state);
                let then_body = body.clone();
                let else_body = orelse.clone();
                fork_cond(
                    state,
                    cond,
                    move |s| {
                        s.loop_frame = None;
                        s.work = then_body.into_iter().map(WorkItem::fresh).collect();
                    },
                    move |s| {
                        s.loop_frame = None;
                        s.work = else_body.into_iter().map(WorkItem::fresh).collect();
                    },
                )
            }
            Outcome::Value(other) => Err(SymError::TypeClash {
                op: "If".to_string(),
                left: other.kind().to_string(),
                right: "Bool".to_string(),
            }),
        },

        // A user call inside the test itself would need to suspend and
        // retry on every recheck of the loop, which `recheck_loop` doesn't
        // support (it re-evaluates `test` directly, without a `dispatch`
        // round trip to hang a `Frame` off); out of scope, same as a call
        // inside a list-comprehension element or a symbolic subscript.
        Stmt::While { test, body, orelse, loc } => match resolve_expr(&mut state, &mut ledger, test)? {
            Outcome::Suspend(_) => Err(SymError::Internal(
                "a `while` condition may not itself call a user function".to_string(),
            )),
            Outcome::Value(Datum::Scalar(Value::Bool(cond))) => {
                state.path.record("while", *loc);
                push_control_frame(&mut state);
                let marker = LoopMarker {
                    test: test.clone(),
                    body: body.clone(),
                    orelse: orelse.clone(),
                    depth: state.call_stack.len(),
                    iterations: 0,
                };
                enter_loop(state, cond, marker)
            }
            Outcome::Value(other) => Err(SymError::TypeClash {
                op: "While".to_string(),
                left: other.kind().to_string(),
                right: "Bool".to_string(),
            }),
        },
    }
}

/// Parks the remaining `work` and the current loop marker in a fresh
/// control `Frame` (a call-frame with no `ret_id`), so `Return`/`Break` can
/// unwind past it by counting frames and a natural fall-through restores it
/// once `work` drains. Pushed exactly once per `If`/`While` encountered —
/// `While`'s repeated condition rechecks reuse this same frame instead of
/// pushing another one each iteration (see `recheck_loop`).
fn push_control_frame<'ctx>(state: &mut State<'ctx>) {
    let resume_work = std::mem::take(&mut state.work);
    state.call_stack.push(Frame {
        resume_work,
        resume_ctx: state.cur_ctx,
        resume_loop: state.loop_frame.take(),
        ret_id: None,
    });
}

/// Forks on a freshly-entered or just-rechecked loop's condition, installing
/// `marker` (with its iteration count bumped) on the body branch so the
/// next fall-through re-checks it via `recheck_loop`.
fn enter_loop<'ctx>(state: State<'ctx>, cond: BoolValue<'ctx>, marker: LoopMarker) -> SymResult<StepOutcome<'ctx>> {
    let loop_body = marker.body.clone();
    let loop_orelse = marker.orelse.clone();
    let mut entering = marker;
    entering.iterations += 1;
    fork_cond(
        state,
        cond,
        move |s| {
            s.loop_frame = Some(entering);
            s.work = loop_body.into_iter().map(WorkItem::fresh).collect();
        },
        move |s| {
            s.loop_frame = None;
            s.work = loop_orelse.into_iter().map(WorkItem::fresh).collect();
        },
    )
}

/// Re-enqueues `stmt` with its ledger advanced by `suspension.ret_id`,
/// parks it (plus everything still left in `work`) in a new `Frame`, and
/// switches the path into the callee's body.
fn suspend<'ctx>(
    mut state: State<'ctx>,
    stmt: Stmt,
    ledger: CallLedger,
    suspension: crate::resolve::Suspension<'ctx>,
) -> StepOutcome<'ctx> {
    let mut resume_work = std::mem::take(&mut state.work);
    resume_work.push_front(WorkItem { stmt, ledger: ledger.resumed_with(suspension.ret_id) });
    state.call_stack.push(Frame {
        resume_work,
        resume_ctx: state.cur_ctx,
        resume_loop: state.loop_frame.take(),
        ret_id: Some(suspension.ret_id),
    });
    state.work = suspension.callee_work;
    state.cur_ctx = suspension.new_ctx;
    StepOutcome::Continue(state)
}

/// Checks both sides of a boolean condition for feasibility and forks into
/// whichever are satisfiable, running `then_action`/`else_action` on the
/// surviving successor(s) to install whatever `work`/`loop_frame` that
/// branch should resume into. Knows nothing about `call_stack` — callers
/// push (or reuse) their own `Frame` before calling this, since `If` pushes
/// once per encounter but `While`'s repeated rechecks must reuse the same
/// frame across every iteration rather than pushing a new one each time.
fn fork_cond<'ctx>(
    mut state: State<'ctx>,
    cond: BoolValue<'ctx>,
    then_action: impl FnOnce(&mut State<'ctx>),
    else_action: impl FnOnce(&mut State<'ctx>),
) -> SymResult<StepOutcome<'ctx>> {
    let ctx = state.path.context();
    let true_term = cond.as_z3(ctx);
    let false_term = cond.not(ctx).as_z3(ctx);

    let then_feasible = state.path.is_feasible(&[true_term.clone()]);
    let else_feasible = state.path.is_feasible(&[false_term.clone()]);

    if !then_feasible && !else_feasible {
        return Ok(StepOutcome::Deadended(state));
    }

    let (mut then_state, mut else_state) = match (then_feasible, else_feasible) {
        (true, true) => {
            let forked = state.fork();
            (Some(forked), Some(state))
        }
        (true, false) => (Some(state), None),
        (false, true) => (None, Some(state)),
        (false, false) => unreachable!("handled above"),
    };

    if let Some(succ) = then_state.as_mut() {
        succ.path.solver.add(true_term);
        then_action(succ);
    }
    if let Some(succ) = else_state.as_mut() {
        succ.path.solver.add(false_term);
        else_action(succ);
    }

    let mut successors: Vec<State<'ctx>> = then_state.into_iter().chain(else_state).collect();
    match successors.len() {
        1 => Ok(StepOutcome::Continue(successors.pop().expect("length checked"))),
        _ => Ok(StepOutcome::Fork(successors)),
    }
}

/// A forking simulated call at the top level of a statement: materializes
/// one successor path per feasible branch, asserting its extra constraint
/// (if any) and handing `apply` the branch's result to bind however the
/// calling statement needs (an assignment target, or nothing for a bare
/// expression statement). All but the last successor fork from the
/// original state; the last reuses it directly.
fn fork_on_branches<'ctx>(
    state: State<'ctx>,
    branches: Vec<Branch<'ctx>>,
    apply: impl Fn(&mut State<'ctx>, Datum<'ctx>),
) -> SymResult<StepOutcome<'ctx>> {
    let total = branches.len();
    let mut successors = Vec::with_capacity(total);
    let mut base = Some(state);
    for (i, branch) in branches.into_iter().enumerate() {
        let is_last = i + 1 == total;
        let mut succ = if is_last {
            base.take().expect("base state consumed exactly once, on the last branch")
        } else {
            base.as_ref().expect("base state present until the last branch").fork()
        };
        if let Some(constraint) = &branch.constraint {
            let ctx = succ.path.context();
            let term = constraint.as_z3(ctx);
            if !succ.path.is_feasible(&[term.clone()]) {
                continue;
            }
            succ.path.solver.add(term);
        }
        apply(&mut succ, branch.result);
        successors.push(succ);
    }
    match successors.len() {
        0 => Err(SymError::Internal("every branch of a forking call was infeasible".to_string())),
        1 => Ok(StepOutcome::Continue(successors.pop().expect("length checked"))),
        _ => Ok(StepOutcome::Fork(successors)),
    }
}

/// `work` drained naturally (no `Return`/`Break` ran): pop exactly one
/// frame and resume from it, unless the path has just completed one full
/// iteration of its innermost loop, in which case its condition is
/// rechecked in place instead of popping the loop's frame.
fn unwind_one<'ctx>(mut state: State<'ctx>) -> SymResult<StepOutcome<'ctx>> {
    if let Some(marker) = state.loop_frame.clone() {
        if state.call_stack.len() == marker.depth {
            return recheck_loop(state, marker);
        }
    }
    let Some(frame) = state.call_stack.pop() else {
        return Ok(StepOutcome::Done(state));
    };
    state.work = frame.resume_work;
    state.cur_ctx = frame.resume_ctx;
    state.loop_frame = frame.resume_loop;
    Ok(StepOutcome::Continue(state))
}

/// Re-evaluates a loop's condition in place, reusing the `Frame` pushed
/// when it was first entered rather than pushing another — that frame's
/// depth is what `unwind_one` compares against on every subsequent pass, so
/// pushing a second one here would never let the loop's own frame come back
/// up to be popped.
fn recheck_loop<'ctx>(mut state: State<'ctx>, marker: LoopMarker) -> SymResult<StepOutcome<'ctx>> {
    if marker.iterations >= state.loop_bound {
        return Err(SymError::Budget(format!(
            "loop exceeded loop_bound={} iterations",
            state.loop_bound
        )));
    }
    let mut ledger = CallLedger::default();
    match resolve_expr(&mut state, &mut ledger, &marker.test)? {
        Outcome::Suspend(_) => Err(SymError::Internal(
            "a `while` condition may not itself call a user function".to_string(),
        )),
        Outcome::Value(Datum::Scalar(Value::Bool(cond))) => enter_loop(state, cond, marker),
        Outcome::Value(other) => Err(SymError::TypeClash {
            op: "While".to_string(),
            left: other.kind().to_string(),
            right: "Bool".to_string(),
        }),
    }
}

/// `Return` unwinds past any `If`/`While` frames the callee itself pushed,
/// binds its value (if any) to the nearest enclosing call-frame's `ret`
/// name, and resumes the caller from that frame.
fn unwind_return<'ctx>(mut state: State<'ctx>, value: Option<Datum<'ctx>>) -> SymResult<StepOutcome<'ctx>> {
    loop {
        let Some(frame) = state.call_stack.pop() else {
            // A bare top-level `return` outside any function body: nothing
            // left to resume into, so the path is simply complete.
            state.work.clear();
            return Ok(StepOutcome::Done(state));
        };
        if let Some(ret_id) = frame.ret_id {
            if let Some(datum) = value {
                let ret_name = format!("ret{ret_id}");
                bind_value(&mut state, CTX_RETURNS, &ret_name, datum);
            }
            state.work = frame.resume_work;
            state.cur_ctx = frame.resume_ctx;
            state.loop_frame = frame.resume_loop;
            return Ok(StepOutcome::Continue(state));
        }
        // An `If`/`While` frame the callee itself entered: discard it, its
        // body never finishes now that `return` has aborted it.
    }
}

/// `break` unwinds past any nested `If`/`While` frames down to the
/// innermost enclosing loop's recorded depth, then pops that loop's own
/// exit frame — deliberately bypassing its `orelse`.
fn unwind_break<'ctx>(mut state: State<'ctx>) -> SymResult<StepOutcome<'ctx>> {
    let Some(marker) = state.loop_frame.take() else {
        return Err(SymError::Internal("`break` outside a loop".to_string()));
    };
    while state.call_stack.len() > marker.depth {
        state.call_stack.pop();
    }
    let Some(frame) = state.call_stack.pop() else {
        return Err(SymError::Internal("`break`'s loop frame is missing".to_string()));
    };
    state.work = frame.resume_work;
    state.cur_ctx = frame.resume_ctx;
    state.loop_frame = frame.resume_loop;
    Ok(StepOutcome::Continue(state))
}

#[cfg(test)]
mod tests {
    use super::*;

    use symex_ast::{CmpOp, Expr, NumLiteral, SourceLoc};
    use symex_functions::FunctionRegistry;
    use symex_solver::new_context;
    use symex_values::IntValue;

    fn loc() -> SourceLoc {
        SourceLoc::default()
    }

    fn new_state(ctx: &z3::Context, program: Vec<Stmt>) -> State<'_> {
        State::new(ctx, program, Rc::new(FunctionRegistry::with_builtins()))
    }

    #[test]
    fn pass_then_done() {
        let ctx = new_context();
        let state = new_state(&ctx, vec![Stmt::Pass { loc: loc() }]);
        let state = match step(state).unwrap() {
            StepOutcome::Continue(s) => s,
            _ => panic!("expected Continue"),
        };
        match step(state).unwrap() {
            StepOutcome::Done(_) => {}
            _ => panic!("expected Done"),
        }
    }

    #[test]
    fn assign_binds_concrete_value() {
        let ctx = new_context();
        let program = vec![Stmt::Assign {
            target: "x".to_string(),
            value: Expr::Num { value: NumLiteral::Int(5), loc: loc() },
            loc: loc(),
        }];
        let state = new_state(&ctx, program);
        let state = match step(state).unwrap() {
            StepOutcome::Continue(s) => s,
            _ => panic!("expected Continue"),
        };
        match state.objects.current(symex_constants::CTX_GLOBAL, "x") {
            Some(Datum::Scalar(Value::Int(IntValue::Concrete(5)))) => {}
            other => panic!("expected x bound to concrete 5, got {other:?}"),
        }
    }

    #[test]
    fn if_with_concrete_true_condition_does_not_fork() {
        let ctx = new_context();
        let program = vec![Stmt::If {
            test: Expr::Compare {
                left: Box::new(Expr::Num { value: NumLiteral::Int(1), loc: loc() }),
                ops: vec![CmpOp::Eq],
                comparators: vec![Expr::Num { value: NumLiteral::Int(1), loc: loc() }],
                loc: loc(),
            },
            body: vec![Stmt::Pass { loc: loc() }],
            orelse: vec![Stmt::Pass { loc: loc() }],
            loc: loc(),
        }];
        let state = new_state(&ctx, program);
        match step(state).unwrap() {
            StepOutcome::Continue(_) => {}
            other => panic!(
                "expected a single Continue successor, not a fork: {}",
                matches!(other, StepOutcome::Fork(_))
            ),
        }
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let ctx = new_context();
        let state = new_state(&ctx, vec![Stmt::Break { loc: loc() }]);
        assert!(step(state).is_err());
    }

    /// `while i < 3: i += 1` with a concrete starting value never forks and
    /// must terminate in exactly as many rechecks as iterations, not grow
    /// `call_stack` by one frame per pass of the loop body.
    #[test]
    fn concrete_while_loop_terminates_without_growing_the_call_stack() {
        let ctx = new_context();
        let program = vec![
            Stmt::Assign {
                target: "i".to_string(),
                value: Expr::Num { value: NumLiteral::Int(0), loc: loc() },
                loc: loc(),
            },
            Stmt::While {
                test: Expr::Compare {
                    left: Box::new(Expr::Name { id: "i".to_string(), loc: loc() }),
                    ops: vec![CmpOp::Lt],
                    comparators: vec![Expr::Num { value: NumLiteral::Int(3), loc: loc() }],
                    loc: loc(),
                },
                body: vec![Stmt::AugAssign {
                    target: "i".to_string(),
                    op: symex_values::BinOpKind::Add,
                    value: Expr::Num { value: NumLiteral::Int(1), loc: loc() },
                    loc: loc(),
                }],
                orelse: vec![],
                loc: loc(),
            },
        ];
        let mut state = new_state(&ctx, program);
        let mut steps = 0;
        loop {
            steps += 1;
            assert!(steps < 100, "loop never terminated");
            assert!(state.call_stack.len() <= 1, "call_stack grew past the loop's single control frame");
            match step(state).unwrap() {
                StepOutcome::Continue(s) => state = s,
                StepOutcome::Done(s) => {
                    match s.objects.current(symex_constants::CTX_GLOBAL, "i") {
                        Some(Datum::Scalar(Value::Int(IntValue::Concrete(3)))) => {}
                        other => panic!("expected i bound to concrete 3, got {other:?}"),
                    }
                    break;
                }
                other => panic!("expected Continue or Done for a concrete loop, got a fork/deadend: {}", matches!(other, StepOutcome::Fork(_))),
            }
        }
    }

    /// `while True: pass` with no symbolic exit must not hang the engine —
    /// `loop_bound` caps it, routing the path to an error rather than
    /// looping `step` forever.
    #[test]
    fn an_unconditional_loop_is_capped_by_loop_bound() {
        let ctx = new_context();
        let always_true = Expr::Compare {
            left: Box::new(Expr::Num { value: NumLiteral::Int(1), loc: loc() }),
            ops: vec![CmpOp::Eq],
            comparators: vec![Expr::Num { value: NumLiteral::Int(1), loc: loc() }],
            loc: loc(),
        };
        let program = vec![Stmt::While {
            test: always_true,
            body: vec![Stmt::Pass { loc: loc() }],
            orelse: vec![],
            loc: loc(),
        }];
        let mut state = new_state(&ctx, program);
        state.loop_bound = 5;
        let mut steps = 0;
        loop {
            steps += 1;
            assert!(steps < 1000, "loop_bound did not terminate the path");
            match step(state) {
                Ok(StepOutcome::Continue(s)) => state = s,
                Err(SymError::Budget(_)) => break,
                other => panic!("expected Continue or a Budget error, got something else: {}", other.is_ok()),
            }
        }
    }
}
