// SPDX-License-Identifier: AGPL-3.0

//! Symbolic value objects and sort coercion for the interpreter.
//!
//! A [`Value`] is the tagged variant the step interpreter passes around:
//! `Int`, `Real`, `BitVec`, `Bool`, and `Char`. Each scalar case carries
//! either a concrete host value or a symbolic `z3` term; string and list
//! containers are structural and live in `symex-containers`, one layer up,
//! built out of these scalars.

use std::fmt;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, ToPrimitive, Zero};
use z3::ast::{Ast, Bool as Z3Bool, Int as Z3Int, Real as Z3Real, BV};
use z3::Context;

use symex_exceptions::SymError;

/// Default bit-vector width used when a binary op needs one operand coerced
/// to a bit-vector sort and no wider operand drives the choice.
pub const DEFAULT_BITVEC_SIZE: u32 = 64;

fn mask(bit_size: u32) -> BigUint {
    if bit_size == 0 {
        BigUint::zero()
    } else {
        (BigUint::one() << bit_size as usize) - BigUint::one()
    }
}

fn normalize_biguint(value: BigUint, bit_size: u32) -> BigUint {
    value & mask(bit_size)
}

fn biguint_to_bv<'ctx>(ctx: &'ctx Context, value: &BigUint, bit_size: u32) -> BV<'ctx> {
    if let Some(small) = value.to_u64() {
        return BV::from_u64(ctx, small, bit_size);
    }

    let num_bytes = ((bit_size as usize) + 7) / 8;
    let mut bytes = value.to_bytes_be();
    if bytes.len() < num_bytes {
        let mut padded = vec![0u8; num_bytes - bytes.len()];
        padded.extend_from_slice(&bytes);
        bytes = padded;
    } else if bytes.len() > num_bytes {
        bytes = bytes[bytes.len() - num_bytes..].to_vec();
    }

    let mut iter = bytes.into_iter();
    let first = iter.next().unwrap_or(0);
    let mut acc = BV::from_u64(ctx, first as u64, 8);
    for byte in iter {
        acc = acc.concat(&BV::from_u64(ctx, byte as u64, 8));
    }

    if bit_size % 8 == 0 {
        acc
    } else {
        acc.extract(bit_size - 1, 0)
    }
}

fn to_signed_bigint(value: &BigUint, bit_size: u32) -> BigInt {
    let sign_bit = BigUint::one() << (bit_size as usize - 1);
    if value < &sign_bit {
        BigInt::from(value.clone())
    } else {
        let modulus = BigUint::one() << bit_size as usize;
        BigInt::from_biguint(Sign::Minus, modulus - value)
    }
}

fn bigint_to_twos_complement(value: &BigInt, bit_size: u32) -> BigUint {
    match value.sign() {
        Sign::NoSign => BigUint::zero(),
        Sign::Plus => normalize_biguint(value.to_biguint().unwrap(), bit_size),
        Sign::Minus => {
            let magnitude = (-value.clone()).to_biguint().unwrap();
            let modulus = BigUint::one() << bit_size as usize;
            normalize_biguint(modulus - magnitude, bit_size)
        }
    }
}

/// The binary operators `match_left_right` needs to classify. Reused by
/// `symex-ast` as the operator tag for `BinOp`/`AugAssign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitXor,
    BitAnd,
    BitOr,
    Shl,
    Shr,
}

impl BinOpKind {
    fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinOpKind::BitXor | BinOpKind::BitAnd | BinOpKind::BitOr | BinOpKind::Shl | BinOpKind::Shr
        )
    }
}

/// A symbolic or concrete boolean. Doubles as the representation of a
/// branch condition (`If`/`While`'s resolved `test`) and of `Compare`'s
/// chained-comparison result.
#[derive(Clone)]
pub enum BoolValue<'ctx> {
    Concrete(bool),
    Symbolic(Z3Bool<'ctx>),
}

impl<'ctx> BoolValue<'ctx> {
    pub fn concrete(value: bool) -> Self {
        Self::Concrete(value)
    }

    pub fn from_z3(value: Z3Bool<'ctx>) -> Self {
        match value.as_bool() {
            Some(b) => Self::Concrete(b),
            None => Self::Symbolic(value),
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete(_))
    }

    pub fn as_bool(&self) -> Result<bool, SymError> {
        match self {
            Self::Concrete(b) => Ok(*b),
            Self::Symbolic(_) => Err(SymError::SymbolicConstraintMissing(
                "boolean is symbolic".to_string(),
            )),
        }
    }

    pub fn as_z3(&self, ctx: &'ctx Context) -> Z3Bool<'ctx> {
        match self {
            Self::Concrete(b) => Z3Bool::from_bool(ctx, *b),
            Self::Symbolic(b) => b.clone(),
        }
    }

    pub fn not(&self, ctx: &'ctx Context) -> Self {
        match self {
            Self::Concrete(b) => Self::Concrete(!b),
            Self::Symbolic(b) => Self::from_z3(b.not()),
        }
    }

    pub fn and(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(false), _) | (_, Self::Concrete(false)) => Self::Concrete(false),
            (Self::Concrete(true), other) => other.clone(),
            (this, Self::Concrete(true)) => this.clone(),
            _ => Self::from_z3(Z3Bool::and(ctx, &[&self.as_z3(ctx), &other.as_z3(ctx)])),
        }
    }

    pub fn or(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(true), _) | (_, Self::Concrete(true)) => Self::Concrete(true),
            (Self::Concrete(false), other) => other.clone(),
            (this, Self::Concrete(false)) => this.clone(),
            _ => Self::from_z3(Z3Bool::or(ctx, &[&self.as_z3(ctx), &other.as_z3(ctx)])),
        }
    }

    pub fn eq(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => Self::Concrete(a == b),
            _ => Self::from_z3(self.as_z3(ctx)._eq(&other.as_z3(ctx))),
        }
    }
}

impl<'ctx> fmt::Debug for BoolValue<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(b) => write!(f, "Bool({b})"),
            Self::Symbolic(b) => write!(f, "Bool({b})"),
        }
    }
}

/// A symbolic or concrete integer. `concrete` is `None` exactly when the
/// object denotes a live SMT variable (invariant 4, spec `Int`).
#[derive(Clone)]
pub enum IntValue<'ctx> {
    Concrete(i64),
    Symbolic(Z3Int<'ctx>),
}

impl<'ctx> IntValue<'ctx> {
    pub fn concrete(value: i64) -> Self {
        Self::Concrete(value)
    }

    pub fn symbolic(ctx: &'ctx Context, name: &str) -> Self {
        Self::Symbolic(Z3Int::new_const(ctx, name))
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete(_))
    }

    pub fn as_i64(&self) -> Result<i64, SymError> {
        match self {
            Self::Concrete(v) => Ok(*v),
            Self::Symbolic(_) => Err(SymError::SymbolicConstraintMissing(
                "int is symbolic".to_string(),
            )),
        }
    }

    pub fn as_z3(&self, ctx: &'ctx Context) -> Z3Int<'ctx> {
        match self {
            Self::Concrete(v) => Z3Int::from_i64(ctx, *v),
            Self::Symbolic(v) => v.clone(),
        }
    }

    pub fn add(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => Self::Concrete(a + b),
            _ => Self::Symbolic(Z3Int::add(ctx, &[&self.as_z3(ctx), &other.as_z3(ctx)])),
        }
    }

    pub fn sub(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => Self::Concrete(a - b),
            _ => Self::Symbolic(Z3Int::sub(ctx, &[&self.as_z3(ctx), &other.as_z3(ctx)])),
        }
    }

    pub fn mul(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => Self::Concrete(a * b),
            _ => Self::Symbolic(Z3Int::mul(ctx, &[&self.as_z3(ctx), &other.as_z3(ctx)])),
        }
    }

    pub fn div(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) if *b != 0 => Self::Concrete(a.div_euclid(*b)),
            _ => Self::Symbolic(self.as_z3(ctx).div(&other.as_z3(ctx))),
        }
    }

    pub fn rem(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) if *b != 0 => Self::Concrete(a.rem_euclid(*b)),
            _ => Self::Symbolic(self.as_z3(ctx).rem(&other.as_z3(ctx))),
        }
    }

    pub fn neg(&self, ctx: &'ctx Context) -> Self {
        match self {
            Self::Concrete(v) => Self::Concrete(-v),
            Self::Symbolic(v) => Self::Symbolic(v.unary_minus()),
        }
    }

    pub fn eq(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => BoolValue::Concrete(a == b),
            _ => BoolValue::from_z3(self.as_z3(ctx)._eq(&other.as_z3(ctx))),
        }
    }

    pub fn lt(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => BoolValue::Concrete(a < b),
            _ => BoolValue::from_z3(self.as_z3(ctx).lt(&other.as_z3(ctx))),
        }
    }

    pub fn le(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => BoolValue::Concrete(a <= b),
            _ => BoolValue::from_z3(self.as_z3(ctx).le(&other.as_z3(ctx))),
        }
    }

    pub fn gt(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => BoolValue::Concrete(a > b),
            _ => BoolValue::from_z3(self.as_z3(ctx).gt(&other.as_z3(ctx))),
        }
    }

    pub fn ge(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete(a), Self::Concrete(b)) => BoolValue::Concrete(a >= b),
            _ => BoolValue::from_z3(self.as_z3(ctx).ge(&other.as_z3(ctx))),
        }
    }
}

impl<'ctx> fmt::Debug for IntValue<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete(v) => write!(f, "Int({v})"),
            Self::Symbolic(v) => write!(f, "Int({v})"),
        }
    }
}

/// A real-valued scalar. Per the data model, `Real` has no concrete
/// short-circuit case: even a literal real is represented as a term, since
/// the solver is expected to handle mixed int/real arithmetic natively.
#[derive(Clone)]
pub struct RealValue<'ctx>(Z3Real<'ctx>);

impl<'ctx> RealValue<'ctx> {
    pub fn from_i64(ctx: &'ctx Context, value: i64) -> Self {
        Self(Z3Real::from_real(ctx, value as i32, 1))
    }

    pub fn from_ratio(ctx: &'ctx Context, num: i32, den: i32) -> Self {
        Self(Z3Real::from_real(ctx, num, den))
    }

    pub fn symbolic(ctx: &'ctx Context, name: &str) -> Self {
        Self(Z3Real::new_const(ctx, name))
    }

    pub fn from_z3(value: Z3Real<'ctx>) -> Self {
        Self(value)
    }

    pub fn as_z3(&self) -> &Z3Real<'ctx> {
        &self.0
    }

    pub fn add(&self, other: &Self, ctx: &'ctx Context) -> Self {
        Self(Z3Real::add(ctx, &[&self.0, &other.0]))
    }

    pub fn sub(&self, other: &Self, ctx: &'ctx Context) -> Self {
        Self(Z3Real::sub(ctx, &[&self.0, &other.0]))
    }

    pub fn mul(&self, other: &Self, ctx: &'ctx Context) -> Self {
        Self(Z3Real::mul(ctx, &[&self.0, &other.0]))
    }

    pub fn div(&self, other: &Self) -> Self {
        Self(self.0.div(&other.0))
    }

    pub fn neg(&self) -> Self {
        Self(self.0.unary_minus())
    }

    pub fn eq(&self, other: &Self) -> BoolValue<'ctx> {
        BoolValue::from_z3(self.0._eq(&other.0))
    }

    pub fn lt(&self, other: &Self) -> BoolValue<'ctx> {
        BoolValue::from_z3(self.0.lt(&other.0))
    }

    pub fn le(&self, other: &Self) -> BoolValue<'ctx> {
        BoolValue::from_z3(self.0.le(&other.0))
    }

    pub fn gt(&self, other: &Self) -> BoolValue<'ctx> {
        BoolValue::from_z3(self.0.gt(&other.0))
    }

    pub fn ge(&self, other: &Self) -> BoolValue<'ctx> {
        BoolValue::from_z3(self.0.ge(&other.0))
    }

    pub fn to_int(&self) -> IntValue<'ctx> {
        IntValue::Symbolic(self.0.to_int())
    }
}

impl<'ctx> fmt::Debug for RealValue<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Real({})", self.0)
    }
}

/// A fixed-width symbolic or concrete bit vector.
#[derive(Clone)]
pub enum BitVecValue<'ctx> {
    Concrete { value: BigUint, size: u32 },
    Symbolic { value: BV<'ctx>, size: u32 },
}

impl<'ctx> BitVecValue<'ctx> {
    pub fn from_u64(value: u64, size: u32) -> Self {
        Self::from_biguint(BigUint::from(value), size)
    }

    pub fn from_biguint(value: BigUint, size: u32) -> Self {
        Self::Concrete {
            value: normalize_biguint(value, size),
            size,
        }
    }

    pub fn symbolic(ctx: &'ctx Context, name: &str, size: u32) -> Self {
        Self::Symbolic {
            value: BV::new_const(ctx, name, size),
            size,
        }
    }

    pub fn from_z3(value: BV<'ctx>) -> Self {
        let size = value.get_size();
        Self::Symbolic { value, size }
    }

    pub fn size(&self) -> u32 {
        match self {
            Self::Concrete { size, .. } | Self::Symbolic { size, .. } => *size,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete { .. })
    }

    pub fn as_biguint(&self) -> Result<BigUint, SymError> {
        match self {
            Self::Concrete { value, .. } => Ok(value.clone()),
            Self::Symbolic { .. } => Err(SymError::SymbolicConstraintMissing(
                "bit-vector is symbolic".to_string(),
            )),
        }
    }

    pub fn as_z3(&self, ctx: &'ctx Context) -> BV<'ctx> {
        match self {
            Self::Concrete { value, size } => biguint_to_bv(ctx, value, *size),
            Self::Symbolic { value, .. } => value.clone(),
        }
    }

    fn widen(&self, new_size: u32) -> Self {
        match self {
            Self::Concrete { value, .. } => Self::from_biguint(value.clone(), new_size),
            Self::Symbolic { value, size } => {
                Self::from_z3(value.sign_ext(new_size - size))
            }
        }
    }

    pub fn add(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a + b, *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvadd(&other.as_z3(ctx))),
        }
    }

    pub fn sub(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                if a >= b {
                    Self::from_biguint(a - b, *size)
                } else {
                    let modulus = BigUint::one() << *size as usize;
                    Self::from_biguint(modulus - (b - a), *size)
                }
            }
            _ => Self::from_z3(self.as_z3(ctx).bvsub(&other.as_z3(ctx))),
        }
    }

    pub fn mul(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a * b, *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvmul(&other.as_z3(ctx))),
        }
    }

    /// Signed division, matching Python's `/` over integral bit-vectors.
    pub fn sdiv(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (_, Self::Concrete { value, .. }) if value.is_zero() => Self::from_u64(0, self.size()),
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                let lhs = to_signed_bigint(a, *size);
                let rhs = to_signed_bigint(b, *size);
                Self::from_biguint(bigint_to_twos_complement(&(lhs / rhs), *size), *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvsdiv(&other.as_z3(ctx))),
        }
    }

    /// Signed remainder, matching Python's `%`.
    pub fn smod(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (_, Self::Concrete { value, .. }) if value.is_zero() => self.clone(),
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                let lhs = to_signed_bigint(a, *size);
                let rhs = to_signed_bigint(b, *size);
                Self::from_biguint(bigint_to_twos_complement(&(lhs % rhs), *size), *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvsrem(&other.as_z3(ctx))),
        }
    }

    pub fn pow(&self, exponent: u32, ctx: &'ctx Context) -> Self {
        let mut acc = Self::from_u64(1, self.size());
        for _ in 0..exponent {
            acc = acc.mul(self, ctx);
        }
        acc
    }

    pub fn and(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a & b, *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvand(&other.as_z3(ctx))),
        }
    }

    pub fn or(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a | b, *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvor(&other.as_z3(ctx))),
        }
    }

    pub fn xor(&self, other: &Self, ctx: &'ctx Context) -> Self {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                Self::from_biguint(a ^ b, *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvxor(&other.as_z3(ctx))),
        }
    }

    pub fn shl(&self, shift: &Self, ctx: &'ctx Context) -> Self {
        match (self, shift) {
            (Self::Concrete { value, size }, Self::Concrete { value: amt, .. }) => {
                match amt.to_u32() {
                    Some(n) if n < *size => Self::from_biguint((value << n) & mask(*size), *size),
                    _ => Self::from_u64(0, *size),
                }
            }
            _ => Self::from_z3(self.as_z3(ctx).bvshl(&shift.as_z3(ctx))),
        }
    }

    /// Arithmetic (sign-preserving) shift right, matching Python's `>>`.
    pub fn shr(&self, shift: &Self, ctx: &'ctx Context) -> Self {
        match (self, shift) {
            (Self::Concrete { value, size }, Self::Concrete { value: amt, .. }) => {
                let signed = to_signed_bigint(value, *size);
                let shifted = match amt.to_u32() {
                    Some(n) if n < *size => signed >> n as usize,
                    _ if signed.sign() == Sign::Minus => BigInt::from(-1),
                    _ => BigInt::zero(),
                };
                Self::from_biguint(bigint_to_twos_complement(&shifted, *size), *size)
            }
            _ => Self::from_z3(self.as_z3(ctx).bvashr(&shift.as_z3(ctx))),
        }
    }

    pub fn not(&self, ctx: &'ctx Context) -> Self {
        match self {
            Self::Concrete { value, size } => Self::from_biguint(mask(*size) ^ value, *size),
            Self::Symbolic { .. } => Self::from_z3(self.as_z3(ctx).bvnot()),
        }
    }

    pub fn neg(&self, ctx: &'ctx Context) -> Self {
        Self::from_u64(0, self.size()).sub(self, ctx)
    }

    pub fn eq(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, .. }, Self::Concrete { value: b, .. }) => {
                BoolValue::Concrete(a == b)
            }
            _ => BoolValue::from_z3(self.as_z3(ctx)._eq(&other.as_z3(ctx))),
        }
    }

    pub fn slt(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                BoolValue::Concrete(to_signed_bigint(a, *size) < to_signed_bigint(b, *size))
            }
            _ => BoolValue::from_z3(self.as_z3(ctx).bvslt(&other.as_z3(ctx))),
        }
    }

    pub fn sle(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                BoolValue::Concrete(to_signed_bigint(a, *size) <= to_signed_bigint(b, *size))
            }
            _ => BoolValue::from_z3(self.as_z3(ctx).bvsle(&other.as_z3(ctx))),
        }
    }

    pub fn sgt(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                BoolValue::Concrete(to_signed_bigint(a, *size) > to_signed_bigint(b, *size))
            }
            _ => BoolValue::from_z3(self.as_z3(ctx).bvsgt(&other.as_z3(ctx))),
        }
    }

    pub fn sge(&self, other: &Self, ctx: &'ctx Context) -> BoolValue<'ctx> {
        match (self, other) {
            (Self::Concrete { value: a, size }, Self::Concrete { value: b, .. }) => {
                BoolValue::Concrete(to_signed_bigint(a, *size) >= to_signed_bigint(b, *size))
            }
            _ => BoolValue::from_z3(self.as_z3(ctx).bvsge(&other.as_z3(ctx))),
        }
    }
}

impl<'ctx> fmt::Debug for BitVecValue<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concrete { value, size } => write!(f, "BitVec({value}, {size})"),
            Self::Symbolic { value, size } => write!(f, "BitVec({value}, {size})"),
        }
    }
}

/// A single byte: a `BitVec` fixed at 8 bits, usable as a character or a
/// small integer (spec `Char`).
#[derive(Clone, Debug)]
pub struct CharValue<'ctx>(pub BitVecValue<'ctx>);

impl<'ctx> CharValue<'ctx> {
    pub fn from_byte(byte: u8) -> Self {
        Self(BitVecValue::from_u64(byte as u64, 8))
    }

    pub fn symbolic(ctx: &'ctx Context, name: &str) -> Self {
        Self(BitVecValue::symbolic(ctx, name, 8))
    }

    pub fn as_byte(&self) -> Result<u8, SymError> {
        self.0
            .as_biguint()?
            .to_u8()
            .ok_or_else(|| SymError::Internal("char value out of byte range".to_string()))
    }

    pub fn as_int(&self) -> Value<'ctx> {
        Value::BitVec(self.0.clone())
    }
}

/// The tagged variant the interpreter resolves every scalar expression to.
#[derive(Clone, Debug)]
pub enum Value<'ctx> {
    Int(IntValue<'ctx>),
    Real(RealValue<'ctx>),
    BitVec(BitVecValue<'ctx>),
    Bool(BoolValue<'ctx>),
    Char(CharValue<'ctx>),
}

impl<'ctx> Value<'ctx> {
    pub fn sort_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Real(_) => "Real",
            Value::BitVec(_) => "BitVec",
            Value::Bool(_) => "Bool",
            Value::Char(_) => "Char",
        }
    }

    pub fn is_concrete(&self) -> bool {
        match self {
            Value::Int(v) => v.is_concrete(),
            Value::Real(_) => false,
            Value::BitVec(v) => v.is_concrete(),
            Value::Bool(v) => v.is_concrete(),
            Value::Char(v) => v.0.is_concrete(),
        }
    }

    /// Whichever single `z3` sort-term this value boils down to, used by
    /// SSA equality assertions (`temp == resolved`).
    pub fn as_bitvec(&self) -> Option<&BitVecValue<'ctx>> {
        match self {
            Value::BitVec(v) => Some(v),
            Value::Char(c) => Some(&c.0),
            _ => None,
        }
    }
}

/// Normalizes `left`/`right` to a common sort ahead of a binary op,
/// following the original interpreter's `z3_matchLeftAndRight`: bit-vectors
/// of differing width are sign-extended to match, a lone integer paired with
/// a bit-vector is converted to one (directly if concrete, else via the
/// solver's int-to-bv conversion), bitwise ops force both sides to
/// bit-vectors of the default width, and a real on either side promotes
/// both to real.
pub fn match_left_right<'ctx>(
    ctx: &'ctx Context,
    left: Value<'ctx>,
    right: Value<'ctx>,
    op: BinOpKind,
) -> Result<(Value<'ctx>, Value<'ctx>), SymError> {
    if matches!(left, Value::Real(_)) || matches!(right, Value::Real(_)) {
        return Ok((to_real(ctx, left)?, to_real(ctx, right)?));
    }

    let needs_bitvec = op.is_bitwise();
    let left_is_bv = left.as_bitvec().is_some();
    let right_is_bv = right.as_bitvec().is_some();

    if left_is_bv && right_is_bv {
        let l = left.as_bitvec().unwrap().clone();
        let r = right.as_bitvec().unwrap().clone();
        let width = l.size().max(r.size());
        return Ok((
            Value::BitVec(l.widen(width)),
            Value::BitVec(r.widen(width)),
        ));
    }

    if left_is_bv || right_is_bv || needs_bitvec {
        let width = left
            .as_bitvec()
            .map(|v| v.size())
            .into_iter()
            .chain(right.as_bitvec().map(|v| v.size()))
            .max()
            .unwrap_or(DEFAULT_BITVEC_SIZE);
        return Ok((to_bitvec(ctx, left, width)?, to_bitvec(ctx, right, width)?));
    }

    Ok((left, right))
}

fn to_real<'ctx>(ctx: &'ctx Context, value: Value<'ctx>) -> Result<Value<'ctx>, SymError> {
    match value {
        Value::Real(_) => Ok(value),
        Value::Int(IntValue::Concrete(n)) => Ok(Value::Real(RealValue::from_i64(ctx, n))),
        Value::Int(IntValue::Symbolic(n)) => Ok(Value::Real(RealValue::from_z3(n.to_real()))),
        other => Err(SymError::TypeClash {
            op: "real coercion".to_string(),
            left: other.sort_name().to_string(),
            right: "Real".to_string(),
        }),
    }
}

fn to_bitvec<'ctx>(
    _ctx: &'ctx Context,
    value: Value<'ctx>,
    width: u32,
) -> Result<Value<'ctx>, SymError> {
    match value {
        Value::BitVec(bv) => Ok(Value::BitVec(bv.widen(width))),
        Value::Char(c) => Ok(Value::BitVec(c.0.widen(width))),
        Value::Int(IntValue::Concrete(n)) => Ok(Value::BitVec(BitVecValue::from_biguint(
            bigint_to_twos_complement(&BigInt::from(n), width),
            width,
        ))),
        Value::Int(IntValue::Symbolic(n)) => {
            Ok(Value::BitVec(BitVecValue::from_z3(BV::from_int(&n, width))))
        }
        other => Err(SymError::TypeClash {
            op: "bit-vector coercion".to_string(),
            left: other.sort_name().to_string(),
            right: "BitVec".to_string(),
        }),
    }
}

/// `Z3_mk_bv*_no_overflow`/`_no_underflow` companions, asserted by the
/// interpreter alongside bit-vector arithmetic so an overflowing branch is
/// naturally UNSAT rather than silently wrapping.
pub fn bvadd_safe<'ctx>(x: &BV<'ctx>, y: &BV<'ctx>, signed: bool) -> (Z3Bool<'ctx>, Z3Bool<'ctx>) {
    (x.bvadd_no_overflow(y, signed), x.bvadd_no_underflow(y))
}

pub fn bvsub_safe<'ctx>(x: &BV<'ctx>, y: &BV<'ctx>, signed: bool) -> (Z3Bool<'ctx>, Z3Bool<'ctx>) {
    (x.bvsub_no_overflow(y), x.bvsub_no_underflow(y, signed))
}

pub fn bvmul_safe<'ctx>(x: &BV<'ctx>, y: &BV<'ctx>, signed: bool) -> (Z3Bool<'ctx>, Z3Bool<'ctx>) {
    (x.bvmul_no_overflow(y, signed), x.bvmul_no_underflow(y))
}

/// Division overflow: only the signed `MIN / -1` case can overflow.
pub fn bvdiv_safe<'ctx>(x: &BV<'ctx>, y: &BV<'ctx>) -> Z3Bool<'ctx> {
    x.bvsdiv_no_overflow(y)
}
