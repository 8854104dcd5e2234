// SPDX-License-Identifier: AGPL-3.0

//! Per-path variable bindings: the single-assignment object table a `State`
//! owns exclusively.
//!
//! A name is bound per `(context, name)` pair. Binding never mutates a
//! value in place: every bind either installs the first generation at count
//! `0` or replaces the current generation with a new one at `count + 1`,
//! matching the engine's SSA naming scheme (`"<count><name>@<ctx>"`).

use std::collections::HashMap;

use symex_functions::Datum;
use symex_values::Value;

/// The sort tag `get_var` compares the current binding against to decide
/// whether a read can reuse it, or whether the name is being retyped (a
/// fresh generation at a different sort, e.g. `x = 1` followed by
/// `x = 3.1415`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int,
    Real,
    BitVec(u32),
    Bool,
    Char,
    String,
    List,
}

impl Kind {
    pub fn of(datum: &Datum<'_>) -> Self {
        match datum {
            Datum::Scalar(Value::Int(_)) => Kind::Int,
            Datum::Scalar(Value::Real(_)) => Kind::Real,
            Datum::Scalar(Value::BitVec(v)) => Kind::BitVec(v.size()),
            Datum::Scalar(Value::Bool(_)) => Kind::Bool,
            Datum::Scalar(Value::Char(_)) => Kind::Char,
            Datum::Str(_) => Kind::String,
            Datum::List(_) => Kind::List,
        }
    }
}

#[derive(Clone)]
struct Slot<'ctx> {
    count: u64,
    datum: Datum<'ctx>,
}

/// Exclusively owned by one `State`; forking a state deep-copies this table
/// (invariant 5), which is why every field here is plain-owned rather than
/// reference-counted.
#[derive(Clone, Default)]
pub struct ObjectManager<'ctx> {
    slots: HashMap<(u64, String), Slot<'ctx>>,
}

impl<'ctx> ObjectManager<'ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current binding for `name` in `ctx`, if it has ever been bound.
    pub fn current(&self, ctx: u64, name: &str) -> Option<&Datum<'ctx>> {
        self.slots.get(&(ctx, name.to_string())).map(|s| &s.datum)
    }

    /// The SSA generation `name` currently sits at in `ctx`.
    pub fn generation(&self, ctx: u64, name: &str) -> Option<u64> {
        self.slots.get(&(ctx, name.to_string())).map(|s| s.count)
    }

    /// The name a fresh solver constant for `name`'s *next* generation in
    /// `ctx` should carry.
    pub fn next_ssa_name(&self, ctx: u64, name: &str) -> String {
        let count = self.generation(ctx, name).map_or(0, |c| c + 1);
        format!("{count}{name}@{ctx}")
    }

    /// A context springs into existence the moment something is bound in
    /// it; there is no separate table to allocate ahead of time. Kept as a
    /// named no-op so call sites read the same as the object manager's
    /// documented operation list.
    pub fn new_ctx(&mut self, _ctx: u64) {}

    /// Installs `datum` as the new current generation of `(ctx, name)`,
    /// bumping the SSA count (invariant 2). Used directly by `Assign` when
    /// the resolved value is already concrete, by `AugAssign` (which always
    /// takes this path), and by call-argument binding.
    pub fn bind(&mut self, ctx: u64, name: &str, datum: Datum<'ctx>) {
        let count = self.generation(ctx, name).map_or(0, |c| c + 1);
        self.slots
            .insert((ctx, name.to_string()), Slot { count, datum });
    }

    /// Reads the current binding for `(ctx, name)`, lazily creating one via
    /// `fallback` when the name has never been bound in this context, or
    /// retyping (a fresh generation replacing the old) when the current
    /// binding's sort no longer matches `kind`.
    pub fn get_var(
        &mut self,
        ctx: u64,
        name: &str,
        kind: Kind,
        fallback: impl FnOnce(&str) -> Datum<'ctx>,
    ) -> Datum<'ctx> {
        if let Some(slot) = self.slots.get(&(ctx, name.to_string())) {
            if Kind::of(&slot.datum) == kind {
                return slot.datum.clone();
            }
        }
        let ssa_name = self.next_ssa_name(ctx, name);
        let datum = fallback(&ssa_name);
        self.bind(ctx, name, datum.clone());
        datum
    }

    /// Named deep copy, matching the object manager's documented contract.
    /// Every `Datum` element is itself a cheap `Clone` (refcounted `z3`
    /// handles), so this is a plain structural clone.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}
