// SPDX-License-Identifier: AGPL-3.0

//! Expression resolution: walks an `Expr` to a `Datum`, or suspends a
//! statement mid-resolution when it hits a user-function call that has not
//! been dispatched yet.
//!
//! A call's return value is never available the first time `resolve_expr`
//! reaches its `Call` node — the callee hasn't run. Since `Expr`/`Stmt` are
//! owned trees with no in-place rewrite, `resolve_expr` cannot literally
//! replace the call node with its result the way the original interpreter's
//! `PendingReturn` substitution does. Instead a `CallLedger` threaded through
//! one statement's resolution attempts records, in left-to-right order, the
//! `ret` ids already dispatched; a retry of the same statement replays the
//! identical traversal and consumes the next ledger entry instead of
//! re-suspending. `step::run_state` owns the retry loop.

use std::collections::VecDeque;
use std::rc::Rc;

use symex_ast::{BoolOpKind, CmpOp, Expr, NumLiteral, Param, Slice, Stmt, UnaryOpKind};
use symex_constants::CTX_RETURNS;
use symex_containers::{PyList, PyString};
use symex_exceptions::{SourceLoc, SymError, SymResult};
use symex_functions::{CallArgs, CallOutcome, Datum};
use symex_values::{
    match_left_right, BitVecValue, BoolValue, CharValue, IntValue, RealValue, Value,
};
use z3::Context;

use crate::{CallLedger, State, UserFunction, WorkItem};

/// What resolving one expression produced.
pub enum Outcome<'ctx> {
    Value(Datum<'ctx>),
    Suspend(Suspension<'ctx>),
}

/// A user-function call that needs its callee to run before this statement
/// can make further progress. `step::run_state` pushes a `Frame` capturing
/// the rest of the caller's work, switches `State::work` to `callee_work`,
/// and resumes the caller once `ret{ret_id}` is bound in `CTX_RETURNS`.
pub struct Suspension<'ctx> {
    pub ret_id: u64,
    pub new_ctx: u64,
    pub callee_work: VecDeque<WorkItem>,
}

/// Entry point for a statement's top-level value expression. Identical to
/// `resolve_expr` except a bare call to a *simulated* (not user-defined)
/// function is allowed to fork into several branches — something only
/// meaningful at the statement boundary, since a fork there becomes several
/// sibling states rather than several values inside one larger expression.
pub enum TopOutcome<'ctx> {
    Value(Datum<'ctx>),
    Suspend(Suspension<'ctx>),
    Fork(Vec<symex_functions::Branch<'ctx>>),
}

pub fn resolve_top<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    expr: &Expr,
) -> SymResult<TopOutcome<'ctx>> {
    if let Expr::Call { func, args, keywords, .. } = expr {
        if let Some(name) = callee_name(func) {
            if let Some(sim) = state.registry.get(&name).cloned() {
                return match resolve_call_args(state, ledger, args, keywords)? {
                    ArgOutcome::Suspend(s) => Ok(TopOutcome::Suspend(s)),
                    ArgOutcome::Args(call_args) => {
                        match sim.call(&mut state.symbols, call_args)? {
                            CallOutcome::Single(datum) => Ok(TopOutcome::Value(datum)),
                            CallOutcome::Fork(branches) => Ok(TopOutcome::Fork(branches)),
                        }
                    }
                };
            }
        }
    }
    Ok(match resolve_expr(state, ledger, expr)? {
        Outcome::Value(v) => TopOutcome::Value(v),
        Outcome::Suspend(s) => TopOutcome::Suspend(s),
    })
}

enum ArgOutcome<'ctx> {
    Args(CallArgs<'ctx>),
    Suspend(Suspension<'ctx>),
}

fn resolve_call_args<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    args: &[Expr],
    keywords: &[symex_ast::Keyword],
) -> SymResult<ArgOutcome<'ctx>> {
    let mut positional = Vec::with_capacity(args.len());
    for a in args {
        match resolve_expr(state, ledger, a)? {
            Outcome::Value(v) => positional.push(v),
            Outcome::Suspend(s) => return Ok(ArgOutcome::Suspend(s)),
        }
    }
    let mut kw = Vec::with_capacity(keywords.len());
    for k in keywords {
        match resolve_expr(state, ledger, &k.value)? {
            Outcome::Value(v) => kw.push((k.name.clone(), v)),
            Outcome::Suspend(s) => return Ok(ArgOutcome::Suspend(s)),
        }
    }
    Ok(ArgOutcome::Args(CallArgs { positional, keywords: kw }))
}

fn callee_name(func: &Expr) -> Option<String> {
    match func {
        Expr::Name { id, .. } => Some(id.clone()),
        _ => None,
    }
}

pub fn resolve_expr<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    expr: &Expr,
) -> SymResult<Outcome<'ctx>> {
    match expr {
        Expr::Num { value, .. } => Ok(Outcome::Value(Datum::Scalar(match value {
            NumLiteral::Int(n) => Value::Int(IntValue::concrete(*n)),
            NumLiteral::Real(f) => Value::Real(real_literal(state.path.context(), *f)),
        }))),
        Expr::Str { value, .. } => Ok(Outcome::Value(Datum::Str(PyString::from_str(value)))),
        Expr::Name { id, loc } => {
            let datum = state
                .objects
                .current(state.cur_ctx, id)
                .cloned()
                .ok_or_else(|| SymError::Internal(format!("unbound name `{id}` at {loc}")))?;
            Ok(Outcome::Value(datum))
        }
        Expr::List { elements, .. } => {
            let mut values = Vec::with_capacity(elements.len());
            for e in elements {
                match resolve_expr(state, ledger, e)? {
                    Outcome::Value(Datum::Scalar(v)) => values.push(v),
                    Outcome::Value(other) => {
                        return Err(SymError::TypeClash {
                            op: "list literal".to_string(),
                            left: other.kind().to_string(),
                            right: "scalar".to_string(),
                        })
                    }
                    Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
                }
            }
            Ok(Outcome::Value(Datum::List(PyList::new(values))))
        }
        Expr::UnaryOp { op, operand, .. } => {
            let value = match resolve_expr(state, ledger, operand)? {
                Outcome::Value(Datum::Scalar(v)) => v,
                Outcome::Value(other) => {
                    return Err(SymError::TypeClash {
                        op: format!("{op:?}"),
                        left: other.kind().to_string(),
                        right: "scalar".to_string(),
                    })
                }
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            let ctx = state.path.context();
            Ok(Outcome::Value(Datum::Scalar(apply_unary(*op, value, ctx)?)))
        }
        Expr::BinOp { op, left, right, .. } => {
            let left = match resolve_expr(state, ledger, left)? {
                Outcome::Value(v) => v,
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            let right = match resolve_expr(state, ledger, right)? {
                Outcome::Value(v) => v,
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            resolve_binop(state, *op, left, right)
        }
        Expr::Compare { left, ops, comparators, .. } => {
            let mut prev = match resolve_expr(state, ledger, left)? {
                Outcome::Value(Datum::Scalar(v)) => v,
                Outcome::Value(other) => {
                    return Err(SymError::TypeClash {
                        op: "Compare".to_string(),
                        left: other.kind().to_string(),
                        right: "scalar".to_string(),
                    })
                }
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            let ctx = state.path.context();
            let mut acc: Option<BoolValue<'ctx>> = None;
            for (op, comparator) in ops.iter().zip(comparators.iter()) {
                let rhs = match resolve_expr(state, ledger, comparator)? {
                    Outcome::Value(Datum::Scalar(v)) => v,
                    Outcome::Value(other) => {
                        return Err(SymError::TypeClash {
                            op: "Compare".to_string(),
                            left: other.kind().to_string(),
                            right: "scalar".to_string(),
                        })
                    }
                    Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
                };
                let result = cmp_scalar(ctx, *op, prev.clone(), rhs.clone())?;
                acc = Some(match acc {
                    Some(prev_result) => prev_result.and(&result, ctx),
                    None => result,
                });
                prev = rhs;
            }
            let result = acc.unwrap_or_else(|| BoolValue::concrete(true));
            Ok(Outcome::Value(Datum::Scalar(Value::Bool(result))))
        }
        Expr::BoolOp { op, values, .. } => {
            let ctx = state.path.context();
            let mut acc: Option<BoolValue<'ctx>> = None;
            for v in values {
                let operand = match resolve_expr(state, ledger, v)? {
                    Outcome::Value(Datum::Scalar(Value::Bool(b))) => b,
                    Outcome::Value(other) => {
                        return Err(SymError::TypeClash {
                            op: format!("{op:?}"),
                            left: other.kind().to_string(),
                            right: "Bool".to_string(),
                        })
                    }
                    Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
                };
                acc = Some(match acc {
                    Some(prev) => match op {
                        BoolOpKind::And => prev.and(&operand, ctx),
                        BoolOpKind::Or => prev.or(&operand, ctx),
                    },
                    None => operand,
                });
            }
            let result = acc.ok_or_else(|| SymError::Internal("BoolOp with no operands".to_string()))?;
            Ok(Outcome::Value(Datum::Scalar(Value::Bool(result))))
        }
        Expr::Subscript { value, slice, .. } => {
            let container = match resolve_expr(state, ledger, value)? {
                Outcome::Value(v) => v,
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            resolve_subscript(state, ledger, container, slice)
        }
        Expr::ListComp { element, target, iter, .. } => {
            let source = match resolve_expr(state, ledger, iter)? {
                Outcome::Value(Datum::List(list)) => list,
                Outcome::Value(other) => {
                    return Err(SymError::TypeClash {
                        op: "ListComp".to_string(),
                        left: other.kind().to_string(),
                        right: "List".to_string(),
                    })
                }
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            // Rewritten into a synthetic accumulator function and dispatched
            // through the ordinary call-suspension path, rather than a second,
            // more limited control-flow implementation — so a call inside
            // `element` suspends and resumes exactly like any other call.
            let user_fn = Rc::new(synthesize_listcomp_function(state, target, element));
            dispatch_user_function(state, ledger, &user_fn, vec![Datum::List(source)], Vec::new())
        }
        Expr::Call { func, args, keywords, loc } => {
            let name = callee_name(func)
                .ok_or_else(|| SymError::UnsupportedAst { kind: "indirect call".to_string(), loc: *loc })?;
            if let Some(sim) = state.registry.get(&name).cloned() {
                return match resolve_call_args(state, ledger, args, keywords)? {
                    ArgOutcome::Suspend(s) => Ok(Outcome::Suspend(s)),
                    ArgOutcome::Args(call_args) => match sim.call(&mut state.symbols, call_args)? {
                        CallOutcome::Single(datum) => Ok(Outcome::Value(datum)),
                        CallOutcome::Fork(_) => Err(SymError::Internal(format!(
                            "`{name}` forked inside a nested expression, which is not supported"
                        ))),
                    },
                };
            }
            resolve_user_call(state, ledger, &name, args, keywords, *loc)
        }
    }
}

fn resolve_user_call<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    name: &str,
    args: &[Expr],
    keywords: &[symex_ast::Keyword],
    loc: symex_ast::SourceLoc,
) -> SymResult<Outcome<'ctx>> {
    let user_fn = state
        .functions
        .get(name)
        .cloned()
        .ok_or_else(|| SymError::ArityError(format!("call to undefined function `{name}` at {loc}")))?;

    let (positional, keyword_args) = match resolve_call_args(state, ledger, args, keywords)? {
        ArgOutcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
        ArgOutcome::Args(call_args) => (call_args.positional, call_args.keywords),
    };

    dispatch_user_function(state, ledger, &user_fn, positional, keyword_args)
}

/// Suspends a call to `user_fn` on `args`, or — on a retry that replays the
/// same traversal — resolves to the return value a prior suspension of this
/// same call already produced. Shared by a named user-function call and the
/// synthetic function a `ListComp` is rewritten into, since both need the
/// identical ledger-resume/suspend dance.
fn dispatch_user_function<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    user_fn: &Rc<UserFunction>,
    positional: Vec<Datum<'ctx>>,
    keywords: Vec<(String, Datum<'ctx>)>,
) -> SymResult<Outcome<'ctx>> {
    if ledger.cursor < ledger.completed.len() {
        let ret_id = ledger.completed[ledger.cursor];
        ledger.cursor += 1;
        let ret_name = format!("ret{ret_id}");
        let value = state
            .objects
            .current(CTX_RETURNS, &ret_name)
            .cloned()
            .ok_or_else(|| SymError::Internal(format!("`{ret_name}` not bound after resumption")))?;
        return Ok(Outcome::Value(value));
    }

    let new_ctx = state.alloc_ctx();
    bind_params(state, user_fn, positional, keywords, new_ctx)?;
    let ret_id = state.alloc_ret();
    let callee_work = user_fn.body.iter().cloned().map(WorkItem::fresh).collect();
    Ok(Outcome::Suspend(Suspension { ret_id, new_ctx, callee_work }))
}

/// Rewrites `[element for target in <src>]` into a small accumulator
/// function, the way the original's comprehension rewrite produces a
/// synthetic `def tempFunction(): l = []; ...; return l` and dispatches it
/// through the ordinary call path. `While` stands in for the original's
/// `for`, since this subset's `Stmt` has no `For` node; the loop body reads
/// `src[i]` into `target`, folds `element` into the accumulator through the
/// `append` builtin, and advances the index — all expressible with the
/// ordinary statement/expression forms already supported.
///
/// The accumulator, index, and source parameter are named with
/// `State::fresh_temp_name`'s `~`-prefixed labels rather than plain
/// identifiers like `acc`/`i`/`src`, since a `~` can never appear in a
/// parsed program's own identifiers — `target` itself is user-chosen and
/// must not collide with any of them (`[x for acc in xs]` is legal Python).
fn synthesize_listcomp_function<'ctx>(
    state: &mut State<'ctx>,
    target: &str,
    element: &Expr,
) -> UserFunction {
    let loc = SourceLoc::default();
    let src = state.fresh_temp_name();
    let acc = state.fresh_temp_name();
    let idx = state.fresh_temp_name();

    let name_expr = |id: &str| Expr::Name { id: id.to_string(), loc };
    let len_of_src = Expr::Call {
        func: Box::new(name_expr("len")),
        args: vec![name_expr(&src)],
        keywords: Vec::new(),
        loc,
    };

    let body = vec![
        Stmt::Assign { target: acc.clone(), value: Expr::List { elements: Vec::new(), loc }, loc },
        Stmt::Assign { target: idx.clone(), value: Expr::Num { value: NumLiteral::Int(0), loc }, loc },
        Stmt::While {
            test: Expr::Compare {
                left: Box::new(name_expr(&idx)),
                ops: vec![CmpOp::Lt],
                comparators: vec![len_of_src],
                loc,
            },
            body: vec![
                Stmt::Assign {
                    target: target.to_string(),
                    value: Expr::Subscript {
                        value: Box::new(name_expr(&src)),
                        slice: Slice::Index(Box::new(name_expr(&idx))),
                        loc,
                    },
                    loc,
                },
                Stmt::Assign {
                    target: acc.clone(),
                    value: Expr::Call {
                        func: Box::new(name_expr("append")),
                        args: vec![name_expr(&acc), element.clone()],
                        keywords: Vec::new(),
                        loc,
                    },
                    loc,
                },
                Stmt::Assign {
                    target: idx.clone(),
                    value: Expr::BinOp {
                        op: symex_values::BinOpKind::Add,
                        left: Box::new(name_expr(&idx)),
                        right: Box::new(Expr::Num { value: NumLiteral::Int(1), loc }),
                        loc,
                    },
                    loc,
                },
            ],
            orelse: Vec::new(),
            loc,
        },
        Stmt::Return { value: Some(name_expr(&acc)), loc },
    ];

    UserFunction { params: vec![Param { name: src, default: None }], body }
}

fn bind_params<'ctx>(
    state: &mut State<'ctx>,
    user_fn: &Rc<UserFunction>,
    positional: Vec<Datum<'ctx>>,
    keywords: Vec<(String, Datum<'ctx>)>,
    new_ctx: u64,
) -> SymResult<()> {
    let mut positional = positional.into_iter();
    for param in &user_fn.params {
        let value = if let Some(v) = positional.next() {
            v
        } else if let Some((_, v)) = keywords.iter().find(|(k, _)| k == &param.name) {
            v.clone()
        } else if let Some(default) = &param.default {
            let mut scratch = CallLedger::default();
            match resolve_expr(state, &mut scratch, default)? {
                Outcome::Value(v) => v,
                Outcome::Suspend(_) => {
                    return Err(SymError::Internal(format!(
                        "default value for parameter `{}` may not itself call a user function",
                        param.name
                    )))
                }
            }
        } else {
            return Err(SymError::ArityError(format!("missing argument for parameter `{}`", param.name)));
        };
        bind_value(state, new_ctx, &param.name, value);
    }
    Ok(())
}

pub fn bind_value<'ctx>(state: &mut State<'ctx>, ctx_id: u64, name: &str, value: Datum<'ctx>) {
    match value {
        Datum::Scalar(scalar) if scalar.is_concrete() => {
            state.objects.bind(ctx_id, name, Datum::Scalar(scalar));
        }
        Datum::Scalar(scalar) => {
            let fresh = fresh_named_scalar(state, ctx_id, name, scalar);
            state.objects.bind(ctx_id, name, Datum::Scalar(fresh));
        }
        container => state.objects.bind(ctx_id, name, container),
    }
}

/// Names `value`'s result as a fresh SSA constant in `ctx_id` and asserts
/// equality, rather than binding the computed term directly — keeping every
/// binding's generation a plain named constant regardless of how deep the
/// expression that produced it was.
fn fresh_named_scalar<'ctx>(
    state: &mut State<'ctx>,
    ctx_id: u64,
    name: &str,
    value: Value<'ctx>,
) -> Value<'ctx> {
    let ssa_name = state.objects.next_ssa_name(ctx_id, name);
    let ctx = state.path.context();
    match value {
        Value::Int(v) => {
            let temp = IntValue::symbolic(ctx, &ssa_name);
            state.path.solver.add(temp.eq(&v, ctx).as_z3(ctx));
            Value::Int(temp)
        }
        Value::Real(v) => {
            let temp = RealValue::symbolic(ctx, &ssa_name);
            state.path.solver.add(temp.eq(&v).as_z3(ctx));
            Value::Real(temp)
        }
        Value::BitVec(v) => {
            let temp = BitVecValue::symbolic(ctx, &ssa_name, v.size());
            state.path.solver.add(temp.eq(&v, ctx).as_z3(ctx));
            Value::BitVec(temp)
        }
        Value::Bool(v) => {
            let temp = BoolValue::from_z3(z3::ast::Bool::new_const(ctx, ssa_name.as_str()));
            state.path.solver.add(temp.eq(&v, ctx).as_z3(ctx));
            Value::Bool(temp)
        }
        Value::Char(v) => {
            let temp = CharValue::symbolic(ctx, &ssa_name);
            state.path.solver.add(temp.0.eq(&v.0, ctx).as_z3(ctx));
            Value::Char(temp)
        }
    }
}

/// Dispatches a `BinOp` over already-resolved operands. Scalars go through
/// the numeric solver path; `Str`/`List` only support the two operations
/// `_handleStr`/`_handleList` model: `+` concatenation, and `*` repetition
/// with a concrete repeat count, since a list's length is structural and
/// can't be left a symbolic term.
fn resolve_binop<'ctx>(
    state: &mut State<'ctx>,
    op: symex_values::BinOpKind,
    left: Datum<'ctx>,
    right: Datum<'ctx>,
) -> SymResult<Outcome<'ctx>> {
    use symex_values::BinOpKind::{Add, Mul};
    match (op, left, right) {
        (_, Datum::Scalar(l), Datum::Scalar(r)) => {
            Ok(Outcome::Value(Datum::Scalar(eval_numeric_binop(state, op, l, r)?)))
        }
        (Add, Datum::Str(l), Datum::Str(r)) => Ok(Outcome::Value(Datum::Str(l.concat(&r)))),
        (Add, Datum::List(l), Datum::List(r)) => Ok(Outcome::Value(Datum::List(l.concat(&r)))),
        (Mul, Datum::List(l), Datum::Scalar(Value::Int(n)))
        | (Mul, Datum::Scalar(Value::Int(n)), Datum::List(l)) => {
            let count = require_concrete_index(state, &n)?;
            if count < 0 {
                return Err(SymError::TypeClash {
                    op: "Mul".to_string(),
                    left: "List".to_string(),
                    right: "a negative Int".to_string(),
                });
            }
            Ok(Outcome::Value(Datum::List(l.repeat(count as usize))))
        }
        (op, l, r) => Err(SymError::TypeClash {
            op: format!("{op:?}"),
            left: l.kind().to_string(),
            right: r.kind().to_string(),
        }),
    }
}

pub(crate) fn eval_numeric_binop<'ctx>(
    state: &mut State<'ctx>,
    op: symex_values::BinOpKind,
    left: Value<'ctx>,
    right: Value<'ctx>,
) -> SymResult<Value<'ctx>> {
    let ctx = state.path.context();
    let (left, right) = match_left_right(ctx, left, right, op)?;
    let raw = match (&left, &right) {
        (Value::Int(l), Value::Int(r)) => Value::Int(apply_int_op(op, l, r, ctx)?),
        (Value::Real(l), Value::Real(r)) => Value::Real(apply_real_op(op, l, r, ctx)?),
        (Value::BitVec(l), Value::BitVec(r)) => {
            let (result, overflow) = apply_bitvec_op(op, l, r, ctx)?;
            if let Some((no_of, no_uf)) = overflow {
                state.path.solver.add(no_of.as_z3(ctx));
                state.path.solver.add(no_uf.as_z3(ctx));
            }
            Value::BitVec(result)
        }
        (l, r) => {
            return Err(SymError::TypeClash {
                op: format!("{op:?}"),
                left: l.sort_name().to_string(),
                right: r.sort_name().to_string(),
            })
        }
    };
    if raw.is_concrete() {
        return Ok(raw);
    }
    let name = state.fresh_temp_name();
    Ok(fresh_named_scalar(state, state.cur_ctx, &name, raw))
}

fn apply_int_op<'ctx>(
    op: symex_values::BinOpKind,
    l: &IntValue<'ctx>,
    r: &IntValue<'ctx>,
    ctx: &'ctx Context,
) -> SymResult<IntValue<'ctx>> {
    use symex_values::BinOpKind::*;
    Ok(match op {
        Add => l.add(r, ctx),
        Sub => l.sub(r, ctx),
        Mul => l.mul(r, ctx),
        Div => l.div(r, ctx),
        Mod => l.rem(r, ctx),
        Pow => pow_int(l, r, ctx)?,
        other => {
            return Err(SymError::TypeClash {
                op: format!("{other:?}"),
                left: "Int".to_string(),
                right: "Int".to_string(),
            })
        }
    })
}

fn pow_int<'ctx>(l: &IntValue<'ctx>, r: &IntValue<'ctx>, ctx: &'ctx Context) -> SymResult<IntValue<'ctx>> {
    let exp = r
        .as_i64()
        .map_err(|_| SymError::SymbolicConstraintMissing("`**` exponent must be concrete".to_string()))?;
    if exp < 0 {
        return Err(SymError::TypeClash {
            op: "Pow".to_string(),
            left: "Int".to_string(),
            right: "Int".to_string(),
        });
    }
    let mut acc = IntValue::concrete(1);
    for _ in 0..exp {
        acc = acc.mul(l, ctx);
    }
    Ok(acc)
}

fn apply_real_op<'ctx>(
    op: symex_values::BinOpKind,
    l: &RealValue<'ctx>,
    r: &RealValue<'ctx>,
    ctx: &'ctx Context,
) -> SymResult<RealValue<'ctx>> {
    use symex_values::BinOpKind::*;
    Ok(match op {
        Add => l.add(r, ctx),
        Sub => l.sub(r, ctx),
        Mul => l.mul(r, ctx),
        Div => l.div(r),
        other => {
            return Err(SymError::TypeClash {
                op: format!("{other:?}"),
                left: "Real".to_string(),
                right: "Real".to_string(),
            })
        }
    })
}

type BvOverflow<'ctx> = Option<(BoolValue<'ctx>, BoolValue<'ctx>)>;

fn apply_bitvec_op<'ctx>(
    op: symex_values::BinOpKind,
    l: &BitVecValue<'ctx>,
    r: &BitVecValue<'ctx>,
    ctx: &'ctx Context,
) -> SymResult<(BitVecValue<'ctx>, BvOverflow<'ctx>)> {
    use symex_values::BinOpKind::*;
    let lz = l.as_z3(ctx);
    let rz = r.as_z3(ctx);
    Ok(match op {
        Add => {
            let (no_of, no_uf) = symex_values::bvadd_safe(&lz, &rz, true);
            (l.add(r, ctx), Some((BoolValue::from_z3(no_of), BoolValue::from_z3(no_uf))))
        }
        Sub => {
            let (no_of, no_uf) = symex_values::bvsub_safe(&lz, &rz, true);
            (l.sub(r, ctx), Some((BoolValue::from_z3(no_of), BoolValue::from_z3(no_uf))))
        }
        Mul => {
            let (no_of, no_uf) = symex_values::bvmul_safe(&lz, &rz, true);
            (l.mul(r, ctx), Some((BoolValue::from_z3(no_of), BoolValue::from_z3(no_uf))))
        }
        Div => {
            let no_of = symex_values::bvdiv_safe(&lz, &rz);
            (l.sdiv(r, ctx), Some((BoolValue::from_z3(no_of), BoolValue::concrete(true))))
        }
        Mod => (l.smod(r, ctx), None),
        Pow => {
            let exp = r.as_biguint().map_err(|_| {
                SymError::SymbolicConstraintMissing("bit-vector `**` exponent must be concrete".to_string())
            })?;
            let exp: u32 = exp.to_string().parse().map_err(|_| SymError::TypeClash {
                op: "Pow".to_string(),
                left: "BitVec".to_string(),
                right: "BitVec".to_string(),
            })?;
            (l.pow(exp, ctx), None)
        }
        BitXor => (l.xor(r, ctx), None),
        BitAnd => (l.and(r, ctx), None),
        BitOr => (l.or(r, ctx), None),
        Shl => (l.shl(r, ctx), None),
        Shr => (l.shr(r, ctx), None),
    })
}

fn apply_unary<'ctx>(op: UnaryOpKind, value: Value<'ctx>, ctx: &'ctx Context) -> SymResult<Value<'ctx>> {
    Ok(match (op, value) {
        (UnaryOpKind::Pos, v) => v,
        (UnaryOpKind::Neg, Value::Int(v)) => Value::Int(v.neg(ctx)),
        (UnaryOpKind::Neg, Value::Real(v)) => Value::Real(v.neg()),
        (UnaryOpKind::Neg, Value::BitVec(v)) => Value::BitVec(v.neg(ctx)),
        (UnaryOpKind::Not, Value::Bool(v)) => Value::Bool(v.not(ctx)),
        (op, v) => {
            return Err(SymError::TypeClash {
                op: format!("{op:?}"),
                left: v.sort_name().to_string(),
                right: "-".to_string(),
            })
        }
    })
}

fn cmp_scalar<'ctx>(
    ctx: &'ctx Context,
    op: CmpOp,
    left: Value<'ctx>,
    right: Value<'ctx>,
) -> SymResult<BoolValue<'ctx>> {
    // A placeholder non-bitwise op: comparisons should never force an
    // int/int pair into bit-vectors the way `&`/`|`/`<<` do.
    let (left, right) = match_left_right(ctx, left, right, symex_values::BinOpKind::Add)?;
    Ok(match (&left, &right) {
        (Value::Int(l), Value::Int(r)) => match op {
            CmpOp::Lt => l.lt(r, ctx),
            CmpOp::Le => l.le(r, ctx),
            CmpOp::Gt => l.gt(r, ctx),
            CmpOp::Ge => l.ge(r, ctx),
            CmpOp::Eq => l.eq(r, ctx),
            CmpOp::NotEq => l.eq(r, ctx).not(ctx),
        },
        (Value::Real(l), Value::Real(r)) => match op {
            CmpOp::Lt => l.lt(r),
            CmpOp::Le => l.le(r),
            CmpOp::Gt => l.gt(r),
            CmpOp::Ge => l.ge(r),
            CmpOp::Eq => l.eq(r),
            CmpOp::NotEq => l.eq(r).not(ctx),
        },
        (Value::BitVec(l), Value::BitVec(r)) => match op {
            CmpOp::Lt => l.slt(r, ctx),
            CmpOp::Le => l.sle(r, ctx),
            CmpOp::Gt => l.sgt(r, ctx),
            CmpOp::Ge => l.sge(r, ctx),
            CmpOp::Eq => l.eq(r, ctx),
            CmpOp::NotEq => l.eq(r, ctx).not(ctx),
        },
        (Value::Char(l), Value::Char(r)) => match op {
            CmpOp::Lt => l.0.slt(&r.0, ctx),
            CmpOp::Le => l.0.sle(&r.0, ctx),
            CmpOp::Gt => l.0.sgt(&r.0, ctx),
            CmpOp::Ge => l.0.sge(&r.0, ctx),
            CmpOp::Eq => l.0.eq(&r.0, ctx),
            CmpOp::NotEq => l.0.eq(&r.0, ctx).not(ctx),
        },
        (Value::Bool(l), Value::Bool(r)) => match op {
            CmpOp::Eq => l.eq(r, ctx),
            CmpOp::NotEq => l.eq(r, ctx).not(ctx),
            other => {
                return Err(SymError::TypeClash {
                    op: format!("{other:?}"),
                    left: "Bool".to_string(),
                    right: "Bool".to_string(),
                })
            }
        },
        (l, r) => {
            return Err(SymError::TypeClash {
                op: format!("{op:?}"),
                left: l.sort_name().to_string(),
                right: r.sort_name().to_string(),
            })
        }
    })
}

/// Reconstructs a decimal literal as an exact rational (numerator over a
/// power-of-ten denominator) rather than through `f64`'s binary fraction,
/// matching the finite-decimal literals the parser hands us.
fn real_literal<'ctx>(ctx: &'ctx Context, f: f64) -> RealValue<'ctx> {
    let mut den: i64 = 1;
    let mut scaled = f;
    while scaled.fract().abs() > 1e-9 && den < 100_000 {
        scaled *= 10.0;
        den *= 10;
    }
    RealValue::from_ratio(ctx, scaled.round() as i32, den as i32)
}

fn resolve_subscript<'ctx>(
    state: &mut State<'ctx>,
    ledger: &mut CallLedger,
    container: Datum<'ctx>,
    slice: &Slice,
) -> SymResult<Outcome<'ctx>> {
    match slice {
        Slice::Index(index_expr) => {
            let index = match resolve_expr(state, ledger, index_expr)? {
                Outcome::Value(Datum::Scalar(Value::Int(v))) => v,
                Outcome::Value(other) => {
                    return Err(SymError::TypeClash {
                        op: "Subscript".to_string(),
                        left: other.kind().to_string(),
                        right: "Int".to_string(),
                    })
                }
                Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
            };
            let i = require_concrete_index(state, &index)?;
            match container {
                Datum::Str(s) => {
                    let idx = s
                        .normalize_index(i)
                        .ok_or_else(|| SymError::Internal(format!("string index {i} out of range")))?;
                    let ch = s.get(idx).cloned().expect("normalized index is in range");
                    Ok(Outcome::Value(Datum::Scalar(ch.as_int())))
                }
                Datum::List(l) => {
                    let idx = l
                        .normalize_index(i)
                        .ok_or_else(|| SymError::Internal(format!("list index {i} out of range")))?;
                    let value = l.get(idx).cloned().expect("normalized index is in range");
                    Ok(Outcome::Value(Datum::Scalar(value)))
                }
                other => Err(SymError::TypeClash {
                    op: "Subscript".to_string(),
                    left: other.kind().to_string(),
                    right: "String or List".to_string(),
                }),
            }
        }
        Slice::Range { lower, upper } => {
            let lower = match lower {
                Some(e) => match resolve_expr(state, ledger, e)? {
                    Outcome::Value(Datum::Scalar(Value::Int(v))) => require_concrete_index(state, &v)?,
                    Outcome::Value(_) => {
                        return Err(SymError::TypeClash {
                            op: "Subscript".to_string(),
                            left: "non-Int".to_string(),
                            right: "Int".to_string(),
                        })
                    }
                    Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
                },
                None => 0,
            };
            let upper = match upper {
                Some(e) => match resolve_expr(state, ledger, e)? {
                    Outcome::Value(Datum::Scalar(Value::Int(v))) => Some(require_concrete_index(state, &v)?),
                    Outcome::Value(_) => {
                        return Err(SymError::TypeClash {
                            op: "Subscript".to_string(),
                            left: "non-Int".to_string(),
                            right: "Int".to_string(),
                        })
                    }
                    Outcome::Suspend(s) => return Ok(Outcome::Suspend(s)),
                },
                None => None,
            };
            match container {
                Datum::Str(s) => {
                    let upper = upper.unwrap_or(s.len() as i64);
                    Ok(Outcome::Value(Datum::Str(s.slice(lower, upper))))
                }
                Datum::List(l) => {
                    let upper = upper.unwrap_or(l.len() as i64);
                    Ok(Outcome::Value(Datum::List(l.slice(lower, upper))))
                }
                other => Err(SymError::TypeClash {
                    op: "Subscript".to_string(),
                    left: other.kind().to_string(),
                    right: "String or List".to_string(),
                }),
            }
        }
    }
}

/// Requires `index` to be pinned to exactly one value under the path's
/// current constraints. A symbolic index with more than one feasible value
/// would need to fork the path per candidate element — left unsupported, per
/// the interpreter's own documented scope limit for symbolic subscripting.
fn require_concrete_index<'ctx>(state: &mut State<'ctx>, index: &IntValue<'ctx>) -> SymResult<i64> {
    match index {
        IntValue::Concrete(n) => Ok(*n),
        IntValue::Symbolic(term) => {
            let ctx = state.path.context();
            let mut scratch = state.path.solver.fork();
            if scratch.check() != symex_solver::SatResult::Sat {
                return Err(SymError::Internal("subscript index on an infeasible path".to_string()));
            }
            let first = scratch
                .model_eval(&symex_solver::Term::Int(term.clone()))
                .ok()
                .and_then(|t| t.as_int().and_then(|i| i.as_i64()))
                .ok_or_else(|| SymError::SolverError("could not evaluate subscript index".to_string()))?;
            let distinct = IntValue::Symbolic(term.clone()).eq(&IntValue::concrete(first), ctx).not(ctx);
            scratch.add(distinct.as_z3(ctx));
            if scratch.check() == symex_solver::SatResult::Sat {
                return Err(SymError::SymbolicConstraintMissing(
                    "subscript index is not uniquely determined; symbolic multi-valued subscripting is unsupported"
                        .to_string(),
                ));
            }
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    use symex_functions::FunctionRegistry;

    fn loc() -> SourceLoc {
        SourceLoc::default()
    }

    fn new_state(ctx: &Context, program: Vec<Stmt>) -> State<'_> {
        State::new(ctx, program, Rc::new(FunctionRegistry::with_builtins()))
    }

    fn name_expr(id: &str) -> Expr {
        Expr::Name { id: id.to_string(), loc: loc() }
    }

    fn int_expr(n: i64) -> Expr {
        Expr::Num { value: NumLiteral::Int(n), loc: loc() }
    }

    #[test]
    fn resolve_user_call_suspends_then_resolves_on_retry_with_a_completed_ledger() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        state.functions.insert(
            "f".to_string(),
            Rc::new(UserFunction {
                params: Vec::new(),
                body: vec![Stmt::Return { value: Some(int_expr(5)), loc: loc() }],
            }),
        );

        let mut ledger = CallLedger::default();
        let suspension = match resolve_user_call(&mut state, &mut ledger, "f", &[], &[], loc()) {
            Ok(Outcome::Suspend(s)) => s,
            other => panic!("expected a suspension on the first attempt, got {}", describe(other)),
        };
        assert!(!suspension.callee_work.is_empty());

        // Simulate the callee having run to completion: bind its return value
        // and advance the ledger the way `step::run_state`'s retry loop does.
        let ret_name = format!("ret{}", suspension.ret_id);
        state.objects.bind(CTX_RETURNS, &ret_name, Datum::Scalar(Value::Int(IntValue::concrete(5))));
        let mut ledger = ledger.resumed_with(suspension.ret_id);

        match resolve_user_call(&mut state, &mut ledger, "f", &[], &[], loc()) {
            Ok(Outcome::Value(Datum::Scalar(Value::Int(v)))) => assert_eq!(v.as_i64().unwrap(), 5),
            other => panic!("expected the resumed call to resolve to 5, got {}", describe(other)),
        }
    }

    #[test]
    fn resolve_user_call_errors_on_an_undefined_function_name() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let mut ledger = CallLedger::default();
        let err = resolve_user_call(&mut state, &mut ledger, "missing", &[], &[], loc())
            .expect_err("calling an undefined function should error");
        assert!(matches!(err, SymError::ArityError(_)));
    }

    fn describe(outcome: SymResult<Outcome<'_>>) -> String {
        match outcome {
            Ok(Outcome::Value(d)) => format!("Value({})", d.kind()),
            Ok(Outcome::Suspend(_)) => "Suspend".to_string(),
            Err(e) => format!("Err({e})"),
        }
    }

    #[test]
    fn bind_params_prefers_positional_then_falls_back_to_keyword_then_default() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let user_fn = Rc::new(UserFunction {
            params: vec![
                Param { name: "a".to_string(), default: None },
                Param { name: "b".to_string(), default: None },
                Param { name: "c".to_string(), default: Some(int_expr(9)) },
            ],
            body: Vec::new(),
        });
        let positional = vec![Datum::Scalar(Value::Int(IntValue::concrete(1)))];
        let keywords = vec![("b".to_string(), Datum::Scalar(Value::Int(IntValue::concrete(2))))];
        let new_ctx = state.alloc_ctx();
        bind_params(&mut state, &user_fn, positional, keywords, new_ctx).expect("binding should succeed");

        let a = state.objects.current(new_ctx, "a").cloned().expect("a should be bound");
        let b = state.objects.current(new_ctx, "b").cloned().expect("b should be bound");
        let c = state.objects.current(new_ctx, "c").cloned().expect("c should fall back to its default");
        assert!(matches!(a, Datum::Scalar(Value::Int(v)) if v.as_i64().unwrap() == 1));
        assert!(matches!(b, Datum::Scalar(Value::Int(v)) if v.as_i64().unwrap() == 2));
        assert!(matches!(c, Datum::Scalar(Value::Int(v)) if v.as_i64().unwrap() == 9));
    }

    #[test]
    fn bind_params_errors_when_a_required_parameter_has_no_argument_or_default() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let user_fn = Rc::new(UserFunction {
            params: vec![Param { name: "a".to_string(), default: None }],
            body: Vec::new(),
        });
        let new_ctx = state.alloc_ctx();
        let err = bind_params(&mut state, &user_fn, Vec::new(), Vec::new(), new_ctx)
            .expect_err("a missing required parameter should error");
        assert!(matches!(err, SymError::ArityError(_)));
    }

    #[test]
    fn resolve_subscript_indexes_a_list_by_a_concrete_int() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let mut ledger = CallLedger::default();
        let list = Datum::List(PyList::new(vec![
            Value::Int(IntValue::concrete(10)),
            Value::Int(IntValue::concrete(20)),
            Value::Int(IntValue::concrete(30)),
        ]));
        let slice = Slice::Index(Box::new(int_expr(1)));
        match resolve_subscript(&mut state, &mut ledger, list, &slice) {
            Ok(Outcome::Value(Datum::Scalar(Value::Int(v)))) => assert_eq!(v.as_i64().unwrap(), 20),
            other => panic!("expected index 1 to resolve to 20, got {}", describe(other)),
        }
    }

    #[test]
    fn resolve_subscript_rejects_a_non_container() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let mut ledger = CallLedger::default();
        let scalar = Datum::Scalar(Value::Int(IntValue::concrete(1)));
        let slice = Slice::Index(Box::new(int_expr(0)));
        let err = resolve_subscript(&mut state, &mut ledger, scalar, &slice)
            .expect_err("subscripting a scalar should error");
        assert!(matches!(err, SymError::TypeClash { .. }));
    }

    #[test]
    fn eval_numeric_binop_adds_two_concrete_ints_without_touching_the_solver() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let result = eval_numeric_binop(
            &mut state,
            symex_values::BinOpKind::Add,
            Value::Int(IntValue::concrete(2)),
            Value::Int(IntValue::concrete(3)),
        )
        .expect("adding two concrete ints should succeed");
        assert!(matches!(result, Value::Int(v) if v.as_i64().unwrap() == 5));
    }

    #[test]
    fn eval_numeric_binop_promotes_int_and_real_before_dividing() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let result = eval_numeric_binop(
            &mut state,
            symex_values::BinOpKind::Div,
            Value::Int(IntValue::concrete(6)),
            Value::Real(real_literal(&ctx, 2.0)),
        )
        .expect("dividing an int by a real should promote rather than clash");
        assert!(matches!(result, Value::Real(_)));
    }

    #[test]
    fn resolve_binop_concatenates_two_strings() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let result = resolve_binop(
            &mut state,
            symex_values::BinOpKind::Add,
            Datum::Str(PyString::from_str("ab")),
            Datum::Str(PyString::from_str("cd")),
        );
        match result {
            Ok(Outcome::Value(Datum::Str(s))) => assert_eq!(s.len(), 4),
            other => panic!("expected a 4-character string, got {}", describe(other)),
        }
    }

    #[test]
    fn resolve_binop_repeats_a_list_by_a_concrete_int_in_either_operand_order() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let list = || Datum::List(PyList::new(vec![Value::Int(IntValue::concrete(7))]));
        let n = || Datum::Scalar(Value::Int(IntValue::concrete(3)));

        match resolve_binop(&mut state, symex_values::BinOpKind::Mul, list(), n()) {
            Ok(Outcome::Value(Datum::List(l))) => assert_eq!(l.len(), 3),
            other => panic!("expected List*Int to repeat, got {}", describe(other)),
        }
        match resolve_binop(&mut state, symex_values::BinOpKind::Mul, n(), list()) {
            Ok(Outcome::Value(Datum::List(l))) => assert_eq!(l.len(), 3),
            other => panic!("expected Int*List to repeat, got {}", describe(other)),
        }
    }

    #[test]
    fn resolve_binop_rejects_mismatched_operand_kinds() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let err = resolve_binop(
            &mut state,
            symex_values::BinOpKind::Add,
            Datum::Str(PyString::from_str("a")),
            Datum::Scalar(Value::Int(IntValue::concrete(1))),
        )
        .expect_err("Str + Int should not be a supported BinOp");
        assert!(matches!(err, SymError::TypeClash { .. }));
    }

    #[test]
    fn listcomp_over_a_concrete_list_dispatches_through_a_suspension() {
        let ctx = symex_solver::new_context();
        let mut state = new_state(&ctx, Vec::new());
        let mut ledger = CallLedger::default();
        let expr = Expr::ListComp {
            element: Box::new(name_expr("x")),
            target: "x".to_string(),
            iter: Box::new(Expr::List {
                elements: vec![int_expr(1), int_expr(2), int_expr(3)],
                loc: loc(),
            }),
            loc: loc(),
        };
        match resolve_expr(&mut state, &mut ledger, &expr) {
            Ok(Outcome::Suspend(_)) => {}
            other => panic!("expected the synthetic accumulator call to suspend, got {}", describe(other)),
        }
    }
}
