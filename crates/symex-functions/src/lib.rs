// SPDX-License-Identifier: AGPL-3.0

//! Simulated-function registry.
//!
//! A simulated function models a library routine (a string method, `len`,
//! `int`, `range`, or a `Symbolic.*` constructor) symbolically instead of
//! being interpreted from source. Each is registered under a dotted name
//! ("String.index", "Symbolic.String") the same way the teacher's cheatcode
//! crate dispatches HEVM/SVM calls by address and selector — here the
//! dispatch key is the qualified call name the engine resolves from a
//! `Call` node's `func`.
//!
//! A function may fork: `CallOutcome::Fork` carries one branch per
//! resulting state, each with an optional extra constraint the engine must
//! assert before checking that branch's feasibility. This mirrors the
//! teacher's `create_uint256_min_max`, which returns both a symbolic value
//! and a side list of constraints for the caller to assert.

use std::collections::HashMap;
use std::sync::Arc;

use z3::Context;

use symex_containers::{PyList, PyString};
use symex_exceptions::{SymError, SymResult};
use symex_values::{BitVecValue, BoolValue, CharValue, IntValue, RealValue, Value};

/// Any runtime datum a Python expression in the supported subset can
/// evaluate to: a scalar `Value`, or one of the two structural containers.
#[derive(Clone, Debug)]
pub enum Datum<'ctx> {
    Scalar(Value<'ctx>),
    Str(PyString<'ctx>),
    List(PyList<'ctx>),
}

impl<'ctx> Datum<'ctx> {
    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Scalar(v) => v.sort_name(),
            Datum::Str(_) => "String",
            Datum::List(_) => "List",
        }
    }
}

/// Positional and keyword arguments, already resolved to `Datum`s by the
/// caller (the engine resolves `Call.args`/`Call.keywords` before looking
/// up the registry, since a simulated function never needs to re-enter the
/// interpreter to evaluate its own arguments).
#[derive(Clone, Debug, Default)]
pub struct CallArgs<'ctx> {
    pub positional: Vec<Datum<'ctx>>,
    pub keywords: Vec<(String, Datum<'ctx>)>,
}

impl<'ctx> CallArgs<'ctx> {
    pub fn new(positional: Vec<Datum<'ctx>>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }
}

/// One successor of a forking call: the value that branch produces, and an
/// extra constraint the explorer must assert before checking the branch.
#[derive(Clone, Debug)]
pub struct Branch<'ctx> {
    pub result: Datum<'ctx>,
    pub constraint: Option<BoolValue<'ctx>>,
}

impl<'ctx> Branch<'ctx> {
    pub fn unconstrained(result: Datum<'ctx>) -> Self {
        Self {
            result,
            constraint: None,
        }
    }
}

/// What a simulated function call produces: a single result, or a set of
/// branches the path-group explorer must materialize as separate states.
#[derive(Clone, Debug)]
pub enum CallOutcome<'ctx> {
    Single(Datum<'ctx>),
    Fork(Vec<Branch<'ctx>>),
}

/// Hands out fresh, uniquely-named symbolic constants, mirroring the
/// teacher's `create_generic`'s `symbol_id` counter — one counter shared by
/// the whole registry so two `Symbolic.Int()` calls never collide on name.
#[derive(Clone)]
pub struct SymbolFactory<'ctx> {
    ctx: &'ctx Context,
    counter: usize,
}

impl<'ctx> SymbolFactory<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Self { ctx, counter: 0 }
    }

    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }

    fn next_label(&mut self, kind: &str) -> String {
        self.counter += 1;
        format!("sym_{kind}_{:04}", self.counter)
    }

    pub fn fresh_int(&mut self) -> IntValue<'ctx> {
        let label = self.next_label("int");
        IntValue::symbolic(self.ctx, &label)
    }

    pub fn fresh_real(&mut self) -> RealValue<'ctx> {
        let label = self.next_label("real");
        RealValue::symbolic(self.ctx, &label)
    }

    pub fn fresh_bitvec(&mut self, size: u32) -> BitVecValue<'ctx> {
        let label = self.next_label("bv");
        BitVecValue::symbolic(self.ctx, &label, size)
    }

    pub fn fresh_char(&mut self) -> CharValue<'ctx> {
        let label = self.next_label("char");
        CharValue::symbolic(self.ctx, &label)
    }

    pub fn fresh_string(&mut self, len: usize) -> PyString<'ctx> {
        PyString::new((0..len).map(|_| self.fresh_char()).collect())
    }
}

/// A library routine modeled symbolically. Registered into a
/// `FunctionRegistry` under its qualified name and shared read-only once
/// the registry is built, per spec.md's "global state" design note.
pub trait SimFunction<'ctx>: Send + Sync {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>>;
}

fn arity_error(name: &str, expected: &str, got: usize) -> SymError {
    SymError::ArityError(format!("{name}() expects {expected}, got {got} argument(s)"))
}

fn type_clash(op: &str, got: &Datum<'_>) -> SymError {
    SymError::TypeClash {
        op: op.to_string(),
        left: got.kind().to_string(),
        right: "expected".to_string(),
    }
}

struct Len;

impl<'ctx> SimFunction<'ctx> for Len {
    fn call(&self, _fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        let arg = args
            .positional
            .first()
            .ok_or_else(|| arity_error("len", "exactly one argument", args.positional.len()))?;
        let n = match arg {
            Datum::Str(s) => s.len(),
            Datum::List(l) => l.len(),
            other => return Err(type_clash("len", other)),
        };
        Ok(CallOutcome::Single(Datum::Scalar(Value::Int(
            IntValue::concrete(n as i64),
        ))))
    }
}

/// `range(n)`: the bound must be concrete, since the resulting list's
/// length has to be known structurally (per the data model's invariant
/// that containers are never a single solver-sequence formula).
struct Range;

impl<'ctx> SimFunction<'ctx> for Range {
    fn call(&self, _fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        let arg = args
            .positional
            .first()
            .ok_or_else(|| arity_error("range", "exactly one argument", args.positional.len()))?;
        let n = match arg {
            Datum::Scalar(Value::Int(i)) => i.as_i64()?,
            other => return Err(type_clash("range", other)),
        };
        if n < 0 {
            return Err(SymError::ArityError("range(): bound must be non-negative".to_string()));
        }
        let elements = (0..n).map(|i| Value::Int(IntValue::concrete(i))).collect();
        Ok(CallOutcome::Single(Datum::List(PyList::new(elements))))
    }
}

/// `int(x)` / `int(x, base)`. The base, when given, must be a concrete
/// integer literal — passing a string where Python expects an int base is
/// exactly the error scenario this function is grounded on (see
/// `tests/test_function_int.py`'s `int("12","10")`, which the original
/// raises on rather than coercing).
struct IntCast;

impl IntCast {
    fn parse_with_base(text: &str, base: u32) -> SymResult<i64> {
        let trimmed = text.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, trimmed),
        };
        let digits = match base {
            2 => rest.strip_prefix("0b").or_else(|| rest.strip_prefix("0B")).unwrap_or(rest),
            8 => rest.strip_prefix("0o").or_else(|| rest.strip_prefix("0O")).unwrap_or(rest),
            16 => rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")).unwrap_or(rest),
            _ => rest,
        };
        let value = i64::from_str_radix(digits, base)
            .map_err(|e| SymError::ArityError(format!("int(): invalid literal for base {base}: {e}")))?;
        Ok(if negative { -value } else { value })
    }
}

impl<'ctx> SimFunction<'ctx> for IntCast {
    fn call(&self, _fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        let arg = args
            .positional
            .first()
            .ok_or_else(|| arity_error("int", "one or two arguments", args.positional.len()))?;

        let base = match args.positional.get(1) {
            None => 10u32,
            Some(Datum::Scalar(Value::Int(i))) => i.as_i64()? as u32,
            Some(other) => {
                return Err(SymError::ArityError(format!(
                    "int(): base must be an integer literal, got {}",
                    other.kind()
                )))
            }
        };

        let value = match arg {
            Datum::Scalar(Value::Int(i)) => i.as_i64()?,
            Datum::Scalar(Value::Real(r)) => r.to_int().as_i64()?,
            Datum::Str(s) => {
                let text = s.to_concrete_string()?;
                Self::parse_with_base(&text, base)?
            }
            other => return Err(type_clash("int", other)),
        };
        Ok(CallOutcome::Single(Datum::Scalar(Value::Int(
            IntValue::concrete(value),
        ))))
    }
}

struct SymbolicInt;

impl<'ctx> SimFunction<'ctx> for SymbolicInt {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, _args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        Ok(CallOutcome::Single(Datum::Scalar(Value::Int(fx.fresh_int()))))
    }
}

struct SymbolicReal;

impl<'ctx> SimFunction<'ctx> for SymbolicReal {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, _args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        Ok(CallOutcome::Single(Datum::Scalar(Value::Real(fx.fresh_real()))))
    }
}

/// `Symbolic.String(n)`: `n` must be concrete, since a string's length is
/// structural; each of its `n` `Char`s is independently symbolic.
struct SymbolicString;

impl<'ctx> SimFunction<'ctx> for SymbolicString {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        let arg = args
            .positional
            .first()
            .ok_or_else(|| arity_error("Symbolic.String", "exactly one argument", args.positional.len()))?;
        let len = match arg {
            Datum::Scalar(Value::Int(i)) => i.as_i64()?,
            other => return Err(type_clash("Symbolic.String", other)),
        };
        if len < 0 {
            return Err(SymError::ArityError(
                "Symbolic.String(): length must be non-negative".to_string(),
            ));
        }
        Ok(CallOutcome::Single(Datum::Str(fx.fresh_string(len as usize))))
    }
}

fn require_single_char<'ctx>(arg: &Datum<'ctx>, who: &str) -> SymResult<CharValue<'ctx>> {
    match arg {
        Datum::Str(s) if s.len() == 1 => Ok(s.get(0).unwrap().clone()),
        other => Err(SymError::ArityError(format!(
            "{who}: expected a single-character string argument, got {}",
            other.kind()
        ))),
    }
}

/// `s.index(sub)`: first occurrence of a single character. A concrete
/// receiver resolves directly; a receiver with any symbolic `Char` forks
/// one branch per candidate position `i`, constrained by `chars[i] == sub`
/// and `chars[j] != sub` for every `j < i` — the "first occurrence" Python
/// semantics — and leaves SAT-filtering of infeasible branches to the
/// explorer. Grounded on `tests/test_function_String_index.py`'s fully
/// symbolic 8-char string producing exactly 8 completed paths.
struct StringIndex;

impl<'ctx> SimFunction<'ctx> for StringIndex {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        if args.positional.len() != 2 {
            return Err(arity_error("String.index", "a receiver and a target character", args.positional.len()));
        }
        let receiver = match &args.positional[0] {
            Datum::Str(s) => s,
            other => return Err(type_clash("String.index", other)),
        };
        let target = require_single_char(&args.positional[1], "String.index")?;

        if receiver.chars().iter().all(|c| c.0.is_concrete()) {
            for (i, c) in receiver.chars().iter().enumerate() {
                if c.as_byte()? == target.as_byte()? {
                    return Ok(CallOutcome::Single(Datum::Scalar(Value::Int(IntValue::concrete(
                        i as i64,
                    )))));
                }
            }
            return Err(SymError::ArityError("String.index: substring not found".to_string()));
        }

        let ctx = fx.context();
        let mut branches = Vec::with_capacity(receiver.len());
        for i in 0..receiver.len() {
            let matches_here = receiver.chars()[i].0.eq(&target.0, ctx);
            let mut constraint = matches_here;
            for prior in receiver.chars().iter().take(i) {
                let differs = prior.0.eq(&target.0, ctx).not(ctx);
                constraint = constraint.and(&differs, ctx);
            }
            branches.push(Branch {
                result: Datum::Scalar(Value::Int(IntValue::concrete(i as i64))),
                constraint: Some(constraint),
            });
        }
        Ok(CallOutcome::Fork(branches))
    }
}

fn char_in_set<'ctx>(c: &CharValue<'ctx>, set: &[CharValue<'ctx>], ctx: &'ctx Context) -> BoolValue<'ctx> {
    let mut acc = BoolValue::concrete(false);
    for s in set {
        acc = acc.or(&c.0.eq(&s.0, ctx), ctx);
    }
    acc
}

/// `s.rstrip(chars=None)`: strips a trailing run of characters found in the
/// `chars` set (default: a single space) from the right end of `s`. A
/// receiver or strip-set with any symbolic `Char` forks one branch per
/// possible stripped length `L` from `0` to the receiver's length,
/// constrained by "each of the last `L` chars is in the set" and, unless
/// `L` is the full length, "the char just before the stripped suffix is
/// not". Grounded on `tests/test_function_String_rstrip.py`'s symbolic-
/// receiver and symbolic-strip-set cases, each of which produces one
/// completed path per feasible strip length.
struct StringRstrip;

impl StringRstrip {
    fn strip_set<'ctx>(arg: Option<&Datum<'ctx>>) -> SymResult<Vec<CharValue<'ctx>>> {
        match arg {
            None => Ok(vec![CharValue::from_byte(b' ')]),
            Some(Datum::Str(s)) => Ok(s.chars().to_vec()),
            Some(other) => Err(type_clash("String.rstrip", other)),
        }
    }
}

impl<'ctx> SimFunction<'ctx> for StringRstrip {
    fn call(&self, fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        let receiver = match args.positional.first() {
            Some(Datum::Str(s)) => s,
            Some(other) => return Err(type_clash("String.rstrip", other)),
            None => return Err(arity_error("String.rstrip", "a receiver", 0)),
        };
        let set = Self::strip_set(args.positional.get(1))?;
        let ctx = fx.context();

        if receiver.chars().iter().all(|c| c.0.is_concrete()) && set.iter().all(|c| c.0.is_concrete()) {
            let set_bytes = set.iter().map(CharValue::as_byte).collect::<SymResult<Vec<u8>>>()?;
            let mut end = receiver.len();
            while end > 0 && set_bytes.contains(&receiver.chars()[end - 1].as_byte()?) {
                end -= 1;
            }
            return Ok(CallOutcome::Single(Datum::Str(receiver.slice(0, end as i64))));
        }

        let len = receiver.len();
        let mut branches = Vec::with_capacity(len + 1);
        for strip_len in 0..=len {
            let mut constraint = BoolValue::concrete(true);
            for i in (len - strip_len)..len {
                let in_set = char_in_set(&receiver.chars()[i], &set, ctx);
                constraint = constraint.and(&in_set, ctx);
            }
            if strip_len < len {
                let boundary = char_in_set(&receiver.chars()[len - strip_len - 1], &set, ctx);
                constraint = constraint.and(&boundary.not(ctx), ctx);
            }
            branches.push(Branch {
                result: Datum::Str(receiver.slice(0, (len - strip_len) as i64)),
                constraint: Some(constraint),
            });
        }
        Ok(CallOutcome::Fork(branches))
    }
}

/// `sep.join(iterable)`. The iterable's elements must already be per-
/// element `Char`s (the engine unwraps a `ListComp` over a `String` into a
/// `List` of `Char` values before this function ever sees it) — grounded
/// on `pySym/pyState/functions/String/join.py`'s own element-type match on
/// `String`/`Char`.
struct StringJoin;

impl<'ctx> SimFunction<'ctx> for StringJoin {
    fn call(&self, _fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        if args.positional.len() != 2 {
            return Err(arity_error(
                "String.join",
                "a separator and an iterable of characters",
                args.positional.len(),
            ));
        }
        let sep = match &args.positional[0] {
            Datum::Str(s) => s,
            other => return Err(type_clash("String.join", other)),
        };
        let items = match &args.positional[1] {
            Datum::List(l) => l,
            other => return Err(type_clash("String.join", other)),
        };

        let mut result = PyString::new(Vec::new());
        for (i, item) in items.elements().iter().enumerate() {
            if i > 0 {
                result = result.concat(sep);
            }
            match item {
                Value::Char(c) => result.push(c.clone()),
                other => {
                    return Err(SymError::TypeClash {
                        op: "String.join".to_string(),
                        left: other.sort_name().to_string(),
                        right: "Char".to_string(),
                    })
                }
            }
        }
        Ok(CallOutcome::Single(Datum::Str(result)))
    }
}

/// `append(l, x)`: the functional form `list.append(x)` is rewritten into,
/// since a bare-name `Call` is the only call syntax this subset parses —
/// there is no method-call expression to dispatch `l.append(x)` through.
/// Returns a new list rather than mutating `l` in place; the caller is
/// expected to rebind the result (`acc = append(acc, x)`), the same
/// accumulator pattern the synthetic list-comprehension function uses.
struct Append;

impl<'ctx> SimFunction<'ctx> for Append {
    fn call(&self, _fx: &mut SymbolFactory<'ctx>, args: CallArgs<'ctx>) -> SymResult<CallOutcome<'ctx>> {
        if args.positional.len() != 2 {
            return Err(arity_error("append", "a list and a value", args.positional.len()));
        }
        let mut list = match &args.positional[0] {
            Datum::List(l) => l.clone(),
            other => return Err(type_clash("append", other)),
        };
        let value = match &args.positional[1] {
            Datum::Scalar(v) => v.clone(),
            other => {
                return Err(SymError::TypeClash {
                    op: "append".to_string(),
                    left: other.kind().to_string(),
                    right: "a scalar value".to_string(),
                })
            }
        };
        list.append(value);
        Ok(CallOutcome::Single(Datum::List(list)))
    }
}

/// The read-only, name-to-implementation dispatch table, built once at
/// `State` construction and shared by every path thereafter — the same
/// lifecycle as the teacher's own cheatcode address/selector table, just
/// keyed by a dotted name instead of a 4-byte selector.
pub struct FunctionRegistry<'ctx> {
    functions: HashMap<String, Arc<dyn SimFunction<'ctx> + 'ctx>>,
}

impl<'ctx> FunctionRegistry<'ctx> {
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("len", Len);
        registry.register("range", Range);
        registry.register("int", IntCast);
        registry.register("Symbolic.Int", SymbolicInt);
        registry.register("Symbolic.Real", SymbolicReal);
        registry.register("Symbolic.String", SymbolicString);
        registry.register("String.index", StringIndex);
        registry.register("String.rstrip", StringRstrip);
        registry.register("String.join", StringJoin);
        registry.register("append", Append);
        registry
    }

    pub fn register(&mut self, name: &str, f: impl SimFunction<'ctx> + 'ctx) {
        self.functions.insert(name.to_string(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SimFunction<'ctx> + 'ctx>> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl<'ctx> Default for FunctionRegistry<'ctx> {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use symex_solver::Solver;

    fn setup(ctx: &Context) -> SymbolFactory<'_> {
        SymbolFactory::new(ctx)
    }

    #[test]
    fn len_reports_string_and_list_length() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let outcome = registry
            .get("len")
            .unwrap()
            .call(&mut fx, CallArgs::new(vec![Datum::Str(PyString::from_str("abcd"))]))
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::Scalar(Value::Int(i))) => assert_eq!(i.as_i64().unwrap(), 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn range_builds_a_concrete_list() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let outcome = registry
            .get("range")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![Datum::Scalar(Value::Int(IntValue::concrete(5)))]),
            )
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::List(l)) => assert_eq!(l.len(), 5),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn append_returns_a_new_list_without_mutating_the_original() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let original = PyList::new(vec![Value::Int(IntValue::concrete(1))]);
        let outcome = registry
            .get("append")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![
                    Datum::List(original.clone()),
                    Datum::Scalar(Value::Int(IntValue::concrete(2))),
                ]),
            )
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::List(l)) => assert_eq!(l.len(), 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(original.len(), 1);
    }

    #[test]
    fn int_parses_binary_literal_with_explicit_base() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let outcome = registry
            .get("int")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![
                    Datum::Str(PyString::from_str("0b1101")),
                    Datum::Scalar(Value::Int(IntValue::concrete(2))),
                ]),
            )
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::Scalar(Value::Int(i))) => assert_eq!(i.as_i64().unwrap(), 13),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn int_rejects_a_string_base_argument() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let err = registry
            .get("int")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![
                    Datum::Str(PyString::from_str("12")),
                    Datum::Str(PyString::from_str("10")),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, SymError::ArityError(_)));
    }

    #[test]
    fn symbolic_string_index_forks_one_branch_per_position() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let s = fx.fresh_string(8);
        let target = PyString::from_str("a");
        let outcome = registry
            .get("String.index")
            .unwrap()
            .call(&mut fx, CallArgs::new(vec![Datum::Str(s), Datum::Str(target)]))
            .unwrap();

        match outcome {
            CallOutcome::Fork(branches) => {
                assert_eq!(branches.len(), 8);
                let mut feasible = 0;
                for branch in &branches {
                    let mut probe = Solver::new(&ctx);
                    if let Some(c) = &branch.constraint {
                        probe.add(c.as_z3(&ctx));
                    }
                    if probe.check() == symex_solver::SatResult::Sat {
                        feasible += 1;
                    }
                }
                assert_eq!(feasible, 8);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn concrete_string_index_finds_first_occurrence() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let outcome = registry
            .get("String.index")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![Datum::Str(PyString::from_str("test")), Datum::Str(PyString::from_str("t"))]),
            )
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::Scalar(Value::Int(i))) => assert_eq!(i.as_i64().unwrap(), 0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn rstrip_concrete_default_strips_trailing_spaces() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let outcome = registry
            .get("String.rstrip")
            .unwrap()
            .call(&mut fx, CallArgs::new(vec![Datum::Str(PyString::from_str("test "))]))
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::Str(s)) => assert_eq!(s.to_concrete_string().unwrap(), "test"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn rstrip_symbolic_receiver_forks_by_strip_length() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let s = fx.fresh_string(2);
        let outcome = registry
            .get("String.rstrip")
            .unwrap()
            .call(&mut fx, CallArgs::new(vec![Datum::Str(s)]))
            .unwrap();
        match outcome {
            CallOutcome::Fork(branches) => assert_eq!(branches.len(), 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn join_concatenates_chars_with_separator() {
        let ctx = Context::new(&z3::Config::new());
        let mut fx = setup(&ctx);
        let registry = FunctionRegistry::with_builtins();

        let items = PyList::new(vec![
            Value::Char(CharValue::from_byte(b'a')),
            Value::Char(CharValue::from_byte(b'b')),
        ]);
        let outcome = registry
            .get("String.join")
            .unwrap()
            .call(
                &mut fx,
                CallArgs::new(vec![Datum::Str(PyString::from_str("-")), Datum::List(items)]),
            )
            .unwrap();
        match outcome {
            CallOutcome::Single(Datum::Str(s)) => assert_eq!(s.to_concrete_string().unwrap(), "a-b"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
