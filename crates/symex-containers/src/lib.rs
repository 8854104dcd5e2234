// SPDX-License-Identifier: AGPL-3.0

//! Structural string and list containers.
//!
//! Per the data model's invariant 3, `String` and `List` are *structural*:
//! equality and most operations happen element-wise in the engine, never as
//! a single solver formula over a sequence sort. Only the scalar leaves
//! they hold (`Char`'s inner bit-vector, or whatever `Value` an element
//! happens to be) ever reach the solver.

use std::fmt;

use symex_exceptions::SymError;
use symex_values::{CharValue, Value};

/// An ordered sequence of `Char`s. No solver string theory is used; length
/// is simply the sequence length and indexing is a `Vec` index.
#[derive(Clone, Debug)]
pub struct PyString<'ctx> {
    chars: Vec<CharValue<'ctx>>,
}

impl<'ctx> PyString<'ctx> {
    pub fn new(chars: Vec<CharValue<'ctx>>) -> Self {
        Self { chars }
    }

    pub fn from_str(s: &str) -> Self {
        Self::new(s.bytes().map(CharValue::from_byte).collect())
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn chars(&self) -> &[CharValue<'ctx>] {
        &self.chars
    }

    pub fn get(&self, index: usize) -> Option<&CharValue<'ctx>> {
        self.chars.get(index)
    }

    /// Python-style negative/overflowing index normalization. Returns
    /// `None` if the index is out of range even after wraparound.
    pub fn normalize_index(&self, index: i64) -> Option<usize> {
        normalize_index(index, self.chars.len())
    }

    /// `s[start:end]`, clamped to the string's bounds like Python slicing.
    pub fn slice(&self, start: i64, end: i64) -> Self {
        let (lo, hi) = normalize_slice(start, end, self.chars.len());
        Self::new(self.chars[lo..hi].to_vec())
    }

    /// `self + other`, the only supported `BinOp` over strings.
    pub fn concat(&self, other: &Self) -> Self {
        let mut chars = self.chars.clone();
        chars.extend(other.chars.iter().cloned());
        Self::new(chars)
    }

    pub fn push(&mut self, ch: CharValue<'ctx>) {
        self.chars.push(ch);
    }

    /// Materializes the string as a concrete `String`, failing if any
    /// `Char` is symbolic. Used by `any_str` and by string builtins that
    /// require a concrete argument (`join`, `index`, `rstrip`).
    pub fn to_concrete_string(&self) -> Result<String, SymError> {
        let mut bytes = Vec::with_capacity(self.chars.len());
        for c in &self.chars {
            bytes.push(c.as_byte()?);
        }
        String::from_utf8(bytes)
            .map_err(|e| SymError::Internal(format!("string is not valid utf-8: {e}")))
    }

    /// Structural equality: same length and every `Char` pair equal.
    /// Returns `None` (rather than a `Bool`) the moment any pair is
    /// symbolic-and-unequal-under-the-model, since string equality isn't a
    /// single solver formula — callers needing a symbolic answer should
    /// compare concretized values instead.
    pub fn concrete_eq(&self, other: &Self) -> Result<bool, SymError> {
        Ok(self.to_concrete_string()? == other.to_concrete_string()?)
    }
}

impl<'ctx> fmt::Display for PyString<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_concrete_string() {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "<symbolic string, {} chars>", self.chars.len()),
        }
    }
}

/// An ordered, heterogeneous sequence of `Value`s.
#[derive(Clone, Debug)]
pub struct PyList<'ctx> {
    elements: Vec<Value<'ctx>>,
}

impl<'ctx> PyList<'ctx> {
    pub fn new(elements: Vec<Value<'ctx>>) -> Self {
        Self { elements }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Value<'ctx>] {
        &self.elements
    }

    pub fn get(&self, index: usize) -> Option<&Value<'ctx>> {
        self.elements.get(index)
    }

    pub fn set(&mut self, index: usize, value: Value<'ctx>) -> Result<(), SymError> {
        if index >= self.elements.len() {
            return Err(SymError::Internal(format!(
                "list index {index} out of range (len {})",
                self.elements.len()
            )));
        }
        self.elements[index] = value;
        Ok(())
    }

    pub fn normalize_index(&self, index: i64) -> Option<usize> {
        normalize_index(index, self.elements.len())
    }

    pub fn slice(&self, start: i64, end: i64) -> Self {
        let (lo, hi) = normalize_slice(start, end, self.elements.len());
        Self::new(self.elements[lo..hi].to_vec())
    }

    /// `self + other`, list concatenation.
    pub fn concat(&self, other: &Self) -> Self {
        let mut elements = self.elements.clone();
        elements.extend(other.elements.iter().cloned());
        Self::new(elements)
    }

    /// `self * n`, list repetition with a concrete non-negative count.
    pub fn repeat(&self, n: usize) -> Self {
        let mut elements = Vec::with_capacity(self.elements.len() * n);
        for _ in 0..n {
            elements.extend(self.elements.iter().cloned());
        }
        Self::new(elements)
    }

    /// `list.append(x)`, used by the synthetic function a `ListComp` is
    /// rewritten into.
    pub fn append(&mut self, value: Value<'ctx>) {
        self.elements.push(value);
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let effective = if index < 0 { index + len } else { index };
    if effective < 0 || effective >= len {
        None
    } else {
        Some(effective as usize)
    }
}

fn normalize_slice(start: i64, end: i64, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let clamp = |i: i64| -> i64 {
        let effective = if i < 0 { i + len_i } else { i };
        effective.clamp(0, len_i)
    };
    let lo = clamp(start);
    let hi = clamp(end);
    if lo >= hi {
        (0, 0)
    } else {
        (lo as usize, hi as usize)
    }
}

/// Convenience constant so callers don't need to thread a `Context` through
/// just to build an empty container.
pub fn empty_string<'ctx>() -> PyString<'ctx> {
    PyString::new(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_concat_appends_chars() {
        let a = PyString::from_str("foo");
        let b = PyString::from_str("bar");
        assert_eq!(a.concat(&b).to_concrete_string().unwrap(), "foobar");
    }

    #[test]
    fn string_negative_index_wraps() {
        let s = PyString::from_str("hello");
        assert_eq!(s.normalize_index(-1), Some(4));
        assert_eq!(s.normalize_index(5), None);
    }

    #[test]
    fn string_slice_clamps_like_python() {
        let s = PyString::from_str("hello");
        assert_eq!(s.slice(1, 100).to_concrete_string().unwrap(), "ello");
        assert_eq!(s.slice(-3, -1).to_concrete_string().unwrap(), "ll");
    }

    #[test]
    fn list_repeat_multiplies_length() {
        let l = PyList::new(vec![Value::Int(symex_values::IntValue::concrete(1))]);
        assert_eq!(l.repeat(3).len(), 3);
    }

    #[test]
    fn list_concat_preserves_order() {
        let a = PyList::new(vec![Value::Int(symex_values::IntValue::concrete(1))]);
        let b = PyList::new(vec![Value::Int(symex_values::IntValue::concrete(2))]);
        let combined = a.concat(&b);
        assert_eq!(combined.len(), 2);
    }

    #[test]
    fn list_append_grows_the_list() {
        let mut l = PyList::empty();
        l.append(Value::Int(symex_values::IntValue::concrete(7)));
        assert_eq!(l.len(), 1);
    }
}
