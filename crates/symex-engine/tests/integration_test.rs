// SPDX-License-Identifier: AGPL-3.0

//! End-to-end exploration of small programs, built directly as `Stmt`/`Expr`
//! trees the same way `symex-ast`'s own unit tests do, since parsing from
//! JSON text is an orthogonal concern already covered there. Each test
//! mirrors one of the concrete input/observation scenarios a completed path
//! query interface must satisfy, plus the fork-disjointness and
//! branch-completeness properties a conditional with a symbolic test must
//! uphold.

use std::rc::Rc;

use symex_ast::{CmpOp, Expr, Keyword, NumLiteral, Param, SourceLoc, Stmt};
use symex_constants::CTX_GLOBAL;
use symex_engine::{Budget, PathGroup, State, Strategy};
use symex_functions::FunctionRegistry;
use symex_solver::new_context;
use symex_values::BinOpKind;

fn loc() -> SourceLoc {
    SourceLoc::default()
}

fn name(id: &str) -> Expr {
    Expr::Name { id: id.to_string(), loc: loc() }
}

fn int(n: i64) -> Expr {
    Expr::Num { value: NumLiteral::Int(n), loc: loc() }
}

fn real(f: f64) -> Expr {
    Expr::Num { value: NumLiteral::Real(f), loc: loc() }
}

fn string(s: &str) -> Expr {
    Expr::Str { value: s.to_string(), loc: loc() }
}

fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign { target: target.to_string(), value, loc: loc() }
}

fn call(func: &str, args: Vec<Expr>) -> Expr {
    Expr::Call { func: Box::new(name(func)), args, keywords: Vec::<Keyword>::new(), loc: loc() }
}

fn explore<'ctx>(ctx: &'ctx z3::Context, program: Vec<Stmt>) -> PathGroup<'ctx> {
    let state = State::new(ctx, program, Rc::new(FunctionRegistry::with_builtins()));
    let mut group = PathGroup::new(state, Strategy::Bfs, Budget::default());
    group.explore();
    group
}

/// Scenario 1: reassigning a name from `Int` to `Real` leaves the name's
/// current binding real-sorted; the SSA constants for the earlier `Int`
/// assignments remain asserted but name a distinct, now-unread constant.
#[test]
fn reassigning_int_to_real_leaves_only_the_real_binding_readable() {
    let program = vec![
        assign("x", int(1)),
        assign("x", int(2)),
        assign("x", real(3.1415)),
    ];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 1);
    assert!(group.deadended.is_empty());
    assert!(group.errored.is_empty());

    let path = &mut group.completed[0];
    assert_eq!(path.any_int(CTX_GLOBAL, "x"), None);
    let x = path.any_real(CTX_GLOBAL, "x").expect("x should be readable as a real");
    assert!((x - 3.1415).abs() < 1e-9);
}

/// Scenario 2: a zero-argument call's return value is visible to the
/// caller's assignment, and a sibling statement after the call still runs.
#[test]
fn a_function_call_binds_its_return_value_in_the_caller() {
    let program = vec![
        Stmt::FunctionDef {
            name: "f".to_string(),
            params: Vec::<Param>::new(),
            body: vec![Stmt::Return { value: Some(int(5)), loc: loc() }],
            loc: loc(),
        },
        assign("x", call("f", vec![])),
        assign("z", int(1)),
    ];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 1);
    assert!(group.errored.is_empty());
    let path = &mut group.completed[0];
    assert_eq!(path.any_int(CTX_GLOBAL, "x"), Some(5));
    assert_eq!(path.any_int(CTX_GLOBAL, "z"), Some(1));
}

/// Scenario 3: nested calls (`t` calling `t2` twice) each suspend and
/// resume independently within the same statement, and the backtrace
/// records every statement both callees executed.
#[test]
fn nested_calls_within_one_expression_each_suspend_and_resume() {
    let program = vec![
        Stmt::FunctionDef {
            name: "t2".to_string(),
            params: Vec::<Param>::new(),
            body: vec![Stmt::Return { value: Some(int(5)), loc: loc() }],
            loc: loc(),
        },
        Stmt::FunctionDef {
            name: "t".to_string(),
            params: Vec::<Param>::new(),
            body: vec![Stmt::Return {
                value: Some(Expr::BinOp {
                    op: BinOpKind::Add,
                    left: Box::new(call("t2", vec![])),
                    right: Box::new(call("t2", vec![])),
                    loc: loc(),
                }),
                loc: loc(),
            }],
            loc: loc(),
        },
        assign("x", call("t", vec![])),
    ];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 1);
    assert!(group.errored.is_empty());
    let path = &mut group.completed[0];
    assert_eq!(path.any_int(CTX_GLOBAL, "x"), Some(10));
    assert!(path.backtrace().len() >= 11, "backtrace only recorded {} statements", path.backtrace().len());
}

/// Scenario 4: a list comprehension over a concrete `range(5)` materializes
/// every element, dispatched through the same call-suspension machinery as
/// an ordinary user-function call.
#[test]
fn a_list_comprehension_over_range_materializes_every_element() {
    let program = vec![assign(
        "l",
        Expr::ListComp {
            element: Box::new(name("x")),
            target: "x".to_string(),
            iter: Box::new(call("range", vec![int(5)])),
            loc: loc(),
        },
    )];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 1);
    assert!(group.errored.is_empty());
    let path = &mut group.completed[0];
    assert_eq!(path.any_list(CTX_GLOBAL, "l"), Some(vec![0, 1, 2, 3, 4]));
}

/// Scenario 5: indexing a fully symbolic 8-character string forks one
/// branch per candidate first-occurrence position, and every branch is
/// feasible since no character is constrained against another.
#[test]
fn indexing_a_symbolic_string_forks_one_path_per_candidate_position() {
    let program = vec![
        assign("s", call("Symbolic.String", vec![int(8)])),
        assign("x", call("String.index", vec![name("s"), string("a")])),
    ];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 8);
    assert!(group.errored.is_empty());

    let mut witnesses: Vec<i64> = group
        .completed
        .iter_mut()
        .map(|p| p.any_int(CTX_GLOBAL, "x").expect("x should be bound on every completed path"))
        .collect();
    witnesses.sort_unstable();
    assert_eq!(witnesses, vec![0, 1, 2, 3, 4, 5, 6, 7]);
}

/// Scenario 6 (success half): an explicit base parses a non-decimal string
/// literal.
#[test]
fn int_with_an_explicit_base_parses_a_binary_literal() {
    let program = vec![assign("x", call("int", vec![string("0b1101"), int(2)]))];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 1);
    assert!(group.errored.is_empty());
    assert_eq!(group.completed[0].any_int(CTX_GLOBAL, "x"), Some(13));
}

/// Scenario 6 (failure half): a non-integer base argument errors the path
/// rather than silently coercing.
#[test]
fn int_with_a_non_integer_base_errors_the_path() {
    let program = vec![assign("q", call("int", vec![string("12"), string("10")]))];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.errored.len(), 1);
    assert!(group.completed.is_empty());
}

/// P2 (fork disjointness) + P4 (branch completeness): a symbolic-valued
/// condition's `If` must produce both branches as independent completed
/// paths, each keeping its own binding for `y` regardless of the other.
#[test]
fn a_symbolic_if_condition_forks_into_both_independently_complete_branches() {
    let program = vec![
        assign("x", call("Symbolic.Int", vec![])),
        Stmt::If {
            test: Expr::Compare {
                left: Box::new(name("x")),
                ops: vec![CmpOp::Gt],
                comparators: vec![int(0)],
                loc: loc(),
            },
            body: vec![assign("y", int(1))],
            orelse: vec![assign("y", int(2))],
            loc: loc(),
        },
    ];
    let ctx = new_context();
    let mut group = explore(&ctx, program);
    assert_eq!(group.completed.len(), 2);
    assert!(group.deadended.is_empty());
    assert!(group.errored.is_empty());

    let mut ys: Vec<i64> = group
        .completed
        .iter_mut()
        .map(|p| p.any_int(CTX_GLOBAL, "y").expect("y should be bound on both branches"))
        .collect();
    ys.sort_unstable();
    assert_eq!(ys, vec![1, 2]);
}
