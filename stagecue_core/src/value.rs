// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic values carried by references, variables and log records.
//!
//! [`Value`] follows the arithmetic and comparison rules experiment authors
//! expect from a scripting language: `Bool` participates in arithmetic as
//! `0`/`1`, `Int` and `Float` compare and add across types, `/` is true
//! division, `//` and `%` round toward negative infinity, and sequences
//! accept negative indices and slices.
//!
//! [`Value::NotAvailable`] marks a value that is not known yet (for example
//! the appear time of a stimulus that has not been drawn). It is an ordinary
//! value: the reference graph propagates it instead of calling operations on
//! it, so the operations in this module never see it on their own.
//!
//! The derived [`PartialEq`] is structural (`Int(1) != Float(1.0)`);
//! [`Value::loose_eq`] implements the cross-numeric equality used by
//! [`BinaryOp::Eq`].

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt;

use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Serialize, Serializer};

use crate::error::EvalErrorKind;

/// A dynamically typed value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// Not known yet.
    #[default]
    NotAvailable,
    /// Explicit absence of a value.
    None,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Mutable-sequence flavoured list.
    List(Vec<Value>),
    /// Fixed-sequence flavoured tuple.
    Tuple(Vec<Value>),
    /// String-keyed mapping, kept in insertion order.
    Dict(Vec<(String, Value)>),
    /// Slice bounds, used as an index.
    Slice(SliceSpec),
}

/// `start:stop:step` bounds with optional parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize)]
pub struct SliceSpec {
    /// First index, or the sequence start when `None`.
    pub start: Option<i64>,
    /// One past the last index, or the sequence end when `None`.
    pub stop: Option<i64>,
    /// Step, `1` when `None`.
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Resolves the slice against a sequence of length `len` and returns the
    /// selected indices in order.
    pub fn indices(self, len: usize) -> Result<Vec<usize>, EvalErrorKind> {
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(EvalErrorKind::SliceStepZero);
        }
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |bound: Option<i64>, default: i64| match bound {
            None => default,
            Some(mut v) => {
                if v < 0 {
                    v += len;
                    if v < lower {
                        v = lower;
                    }
                } else if v > upper {
                    v = upper;
                }
                v
            }
        };
        let start = clamp(self.start, if step < 0 { upper } else { lower });
        let stop = clamp(self.stop, if step < 0 { lower } else { upper });

        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            if let Ok(idx) = usize::try_from(i) {
                out.push(idx);
            }
            i += step;
        }
        Ok(out)
    }
}

/// Binary operations understood by the reference interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b` (always float)
    Div,
    /// `a // b`
    FloorDiv,
    /// `a % b`
    Mod,
    /// `a ** b`
    Pow,
    /// `a & b`
    BitAnd,
    /// `a | b`
    BitOr,
    /// `a ^ b`
    BitXor,
    /// `a < b`
    Lt,
    /// `a <= b`
    Le,
    /// `a > b`
    Gt,
    /// `a >= b`
    Ge,
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `b in a`
    Contains,
}

impl BinaryOp {
    /// Operator spelling used in diagnostics.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Contains => "in",
        }
    }
}

/// Unary operations understood by the reference interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnaryOp {
    /// `-a`
    Neg,
    /// `+a`
    Pos,
    /// `abs(a)`
    Abs,
    /// `~a`
    Invert,
    /// `not a`
    Not,
    /// `len(a)`
    Len,
}

impl UnaryOp {
    /// Operator spelling used in diagnostics.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "unary -",
            Self::Pos => "unary +",
            Self::Abs => "abs()",
            Self::Invert => "~",
            Self::Not => "not",
            Self::Len => "len()",
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl Value {
    /// Builds a list value.
    #[must_use]
    pub fn list<I: IntoIterator<Item = Self>>(items: I) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Builds a dict value from key/value pairs.
    #[must_use]
    pub fn dict<K: Into<String>, I: IntoIterator<Item = (K, Self)>>(entries: I) -> Self {
        Self::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Type name used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::NotAvailable => "NotAvailable",
            Self::None => "None",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Slice(_) => "slice",
        }
    }

    /// Returns `true` for [`Value::NotAvailable`] itself.
    #[inline]
    #[must_use]
    pub const fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable)
    }

    /// Returns `true` if this value is, or contains at any depth,
    /// [`Value::NotAvailable`].
    #[must_use]
    pub fn contains_not_available(&self) -> bool {
        match self {
            Self::NotAvailable => true,
            Self::List(items) | Self::Tuple(items) => {
                items.iter().any(Self::contains_not_available)
            }
            Self::Dict(entries) => entries.iter().any(|(_, v)| v.contains_not_available()),
            _ => false,
        }
    }

    /// Truthiness: empty, zero and `None` values are false.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::NotAvailable | Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Dict(entries) => !entries.is_empty(),
            Self::Slice(_) => true,
        }
    }

    /// Numeric view as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_num().map(Num::to_f64)
    }

    /// Integer view (`Bool` counts as `0`/`1`).
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Length of strings, sequences and dicts.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::List(items) | Self::Tuple(items) => Some(items.len()),
            Self::Dict(entries) => Some(entries.len()),
            _ => None,
        }
    }

    fn as_num(&self) -> Option<Num> {
        match self {
            Self::Bool(b) => Some(Num::Int(i64::from(*b))),
            Self::Int(i) => Some(Num::Int(*i)),
            Self::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Equality with cross-numeric comparison (`1 == 1.0 == True`).
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => x == y,
                _ => a.to_f64() == b.to_f64(),
            };
        }
        match (self, other) {
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .find(|(bk, _)| bk == k)
                            .is_some_and(|(_, bv)| v.loose_eq(bv))
                    })
            }
            _ => self == other,
        }
    }

    /// Ordering across numbers, strings and same-kind sequences.
    #[must_use]
    pub fn loose_cmp(&self, other: &Self) -> Option<Ordering> {
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
                _ => a.to_f64().partial_cmp(&b.to_f64()),
            };
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    match x.loose_cmp(y)? {
                        Ordering::Equal => {}
                        ord => return Some(ord),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// Applies a unary operation.
    pub fn unary(op: UnaryOp, operand: &Self) -> Result<Self, EvalErrorKind> {
        let bad = || EvalErrorKind::BadOperand {
            op: op.symbol(),
            operand: operand.type_name(),
        };
        match op {
            UnaryOp::Not => Ok(Self::Bool(!operand.truthy())),
            UnaryOp::Len => operand
                .len()
                .map(|n| Self::Int(i64::try_from(n).unwrap_or(i64::MAX)))
                .ok_or_else(bad),
            UnaryOp::Neg => match operand.as_num().ok_or_else(bad)? {
                Num::Int(i) => i.checked_neg().map(Self::Int).ok_or(EvalErrorKind::Overflow),
                Num::Float(f) => Ok(Self::Float(-f)),
            },
            UnaryOp::Pos => match operand.as_num().ok_or_else(bad)? {
                Num::Int(i) => Ok(Self::Int(i)),
                Num::Float(f) => Ok(Self::Float(f)),
            },
            UnaryOp::Abs => match operand.as_num().ok_or_else(bad)? {
                Num::Int(i) => i.checked_abs().map(Self::Int).ok_or(EvalErrorKind::Overflow),
                Num::Float(f) => Ok(Self::Float(libm::fabs(f))),
            },
            UnaryOp::Invert => operand.as_i64().map(|i| Self::Int(!i)).ok_or_else(bad),
        }
    }

    /// Applies a binary operation.
    pub fn binary(op: BinaryOp, lhs: &Self, rhs: &Self) -> Result<Self, EvalErrorKind> {
        let mismatch = || EvalErrorKind::TypeMismatch {
            op: op.symbol(),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        };
        match op {
            BinaryOp::Eq => Ok(Self::Bool(lhs.loose_eq(rhs))),
            BinaryOp::Ne => Ok(Self::Bool(!lhs.loose_eq(rhs))),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                let ord = lhs.loose_cmp(rhs).ok_or_else(mismatch)?;
                Ok(Self::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::Contains => lhs.contains(rhs).ok_or_else(mismatch).map(Self::Bool),
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if let (Self::Bool(a), Self::Bool(b)) = (lhs, rhs) {
                    return Ok(Self::Bool(match op {
                        BinaryOp::BitAnd => a & b,
                        BinaryOp::BitOr => a | b,
                        _ => a ^ b,
                    }));
                }
                let (a, b) = lhs.as_i64().zip(rhs.as_i64()).ok_or_else(mismatch)?;
                Ok(Self::Int(match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    _ => a ^ b,
                }))
            }
            BinaryOp::Add => match (lhs, rhs) {
                (Self::Str(a), Self::Str(b)) => {
                    let mut s = a.clone();
                    s.push_str(b);
                    Ok(Self::Str(s))
                }
                (Self::List(a), Self::List(b)) => Ok(Self::List(concat(a, b))),
                (Self::Tuple(a), Self::Tuple(b)) => Ok(Self::Tuple(concat(a, b))),
                _ => arith(op, lhs, rhs).ok_or_else(mismatch)?,
            },
            BinaryOp::Mul => match (lhs, rhs) {
                (Self::Str(s), n) | (n, Self::Str(s)) if n.as_i64().is_some() => {
                    let count = repeat_count(n);
                    repeat_len(s.len(), count)?;
                    Ok(Self::Str(s.repeat(count)))
                }
                (Self::List(items), n) | (n, Self::List(items)) if n.as_i64().is_some() => {
                    let count = repeat_count(n);
                    Ok(Self::List(repeat(items, count)?))
                }
                _ => arith(op, lhs, rhs).ok_or_else(mismatch)?,
            },
            BinaryOp::Sub | BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Mod | BinaryOp::Pow => {
                arith(op, lhs, rhs).ok_or_else(mismatch)?
            }
        }
    }

    /// Membership test (`item in self`); `None` when `self` is not a
    /// container.
    fn contains(&self, item: &Self) -> Option<bool> {
        match self {
            Self::List(items) | Self::Tuple(items) => Some(items.iter().any(|v| v.loose_eq(item))),
            Self::Str(s) => item.as_str().map(|needle| s.contains(needle)),
            Self::Dict(entries) => item
                .as_str()
                .map(|key| entries.iter().any(|(k, _)| k == key)),
            _ => None,
        }
    }

    /// Indexes a sequence, string or dict. Slices select sub-sequences.
    pub fn get_item(&self, index: &Self) -> Result<Self, EvalErrorKind> {
        let mismatch = || EvalErrorKind::TypeMismatch {
            op: "[]",
            lhs: self.type_name(),
            rhs: index.type_name(),
        };
        match (self, index) {
            (Self::List(items), Self::Slice(spec)) => Ok(Self::List(select(items, *spec)?)),
            (Self::Tuple(items), Self::Slice(spec)) => Ok(Self::Tuple(select(items, *spec)?)),
            (Self::Str(s), Self::Slice(spec)) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = spec.indices(chars.len())?;
                Ok(Self::Str(picked.into_iter().map(|i| chars[i]).collect()))
            }
            (Self::List(items) | Self::Tuple(items), idx) => {
                let i = idx.as_i64().ok_or_else(mismatch)?;
                Ok(items[normalize_index(i, items.len())?].clone())
            }
            (Self::Str(s), idx) => {
                let i = idx.as_i64().ok_or_else(mismatch)?;
                let chars: Vec<char> = s.chars().collect();
                Ok(Self::Str(chars[normalize_index(i, chars.len())?].to_string()))
            }
            (Self::Dict(entries), Self::Str(key)) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EvalErrorKind::KeyNotFound(key.clone())),
            _ => Err(mismatch()),
        }
    }

    /// Attribute access. Dict entries double as attributes so records
    /// produced by leaves can be addressed as `result.field`.
    pub fn get_attr(&self, name: &str) -> Result<Self, EvalErrorKind> {
        let missing = || EvalErrorKind::NoAttribute {
            attr: name.into(),
            on: self.type_name(),
        };
        match self {
            Self::Dict(entries) => entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(missing),
            Self::Slice(spec) => {
                let part = match name {
                    "start" => spec.start,
                    "stop" => spec.stop,
                    "step" => spec.step,
                    _ => return Err(missing()),
                };
                Ok(part.map_or(Self::None, Self::Int))
            }
            _ => Err(missing()),
        }
    }
}

fn concat(a: &[Value], b: &[Value]) -> Vec<Value> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

fn repeat_count(n: &Value) -> usize {
    n.as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

/// Largest string (in bytes) or list (in items) that repetition may build.
const MAX_REPEAT_LEN: usize = 1 << 26;

fn repeat_len(unit: usize, count: usize) -> Result<usize, EvalErrorKind> {
    unit.checked_mul(count)
        .filter(|&len| len <= MAX_REPEAT_LEN)
        .ok_or(EvalErrorKind::Overflow)
}

fn repeat(items: &[Value], count: usize) -> Result<Vec<Value>, EvalErrorKind> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(repeat_len(items.len(), count)?);
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn select(items: &[Value], spec: SliceSpec) -> Result<Vec<Value>, EvalErrorKind> {
    Ok(spec
        .indices(items.len())?
        .into_iter()
        .map(|i| items[i].clone())
        .collect())
}

fn normalize_index(index: i64, len: usize) -> Result<usize, EvalErrorKind> {
    let signed_len = i64::try_from(len).unwrap_or(i64::MAX);
    let adjusted = if index < 0 { index + signed_len } else { index };
    usize::try_from(adjusted)
        .ok()
        .filter(|&i| i < len)
        .ok_or(EvalErrorKind::IndexOutOfRange { index, len })
}

/// Numeric arithmetic; `None` when either side is not a number.
fn arith(op: BinaryOp, lhs: &Value, rhs: &Value) -> Option<Result<Value, EvalErrorKind>> {
    let (a, b) = (lhs.as_num()?, rhs.as_num()?);
    Some(match (a, b) {
        (Num::Int(x), Num::Int(y)) if op != BinaryOp::Div => int_arith(op, x, y),
        _ => float_arith(op, a.to_f64(), b.to_f64()),
    })
}

fn int_arith(op: BinaryOp, x: i64, y: i64) -> Result<Value, EvalErrorKind> {
    let result = match op {
        BinaryOp::Add => x.checked_add(y),
        BinaryOp::Sub => x.checked_sub(y),
        BinaryOp::Mul => x.checked_mul(y),
        BinaryOp::FloorDiv => {
            if y == 0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            x.checked_div(y).map(|q| {
                if x % y != 0 && ((x < 0) != (y < 0)) {
                    q - 1
                } else {
                    q
                }
            })
        }
        BinaryOp::Mod => {
            if y == 0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            x.checked_rem(y)
                .map(|r| if r != 0 && ((r < 0) != (y < 0)) { r + y } else { r })
        }
        BinaryOp::Pow => {
            if y < 0 {
                return float_arith(op, x as f64, y as f64);
            }
            u32::try_from(y).ok().and_then(|e| x.checked_pow(e))
        }
        _ => return float_arith(op, x as f64, y as f64),
    };
    result.map(Value::Int).ok_or(EvalErrorKind::Overflow)
}

fn float_arith(op: BinaryOp, x: f64, y: f64) -> Result<Value, EvalErrorKind> {
    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            x / y
        }
        BinaryOp::FloorDiv => {
            if y == 0.0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            libm::floor(x / y)
        }
        BinaryOp::Mod => {
            if y == 0.0 {
                return Err(EvalErrorKind::DivisionByZero);
            }
            let r = libm::fmod(x, y);
            if r != 0.0 && ((r < 0.0) != (y < 0.0)) {
                r + y
            } else {
                r
            }
        }
        BinaryOp::Pow => libm::pow(x, y),
        _ => {
            return Err(EvalErrorKind::TypeMismatch {
                op: op.symbol(),
                lhs: "float",
                rhs: "float",
            });
        }
    };
    Ok(Value::Float(value))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seq(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }
        match self {
            Self::NotAvailable => f.write_str("NotAvailable"),
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::List(items) => {
                f.write_str("[")?;
                seq(f, items)?;
                f.write_str("]")
            }
            Self::Tuple(items) => {
                f.write_str("(")?;
                seq(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Dict(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{k}': {v}")?;
                }
                f.write_str("}")
            }
            Self::Slice(spec) => {
                let part = |p: Option<i64>| p.map_or(String::new(), |v| v.to_string());
                write!(
                    f,
                    "{}:{}:{}",
                    part(spec.start),
                    part(spec.stop),
                    part(spec.step)
                )
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::NotAvailable => serializer.serialize_unit_variant("Value", 0, "NotAvailable"),
            Self::None => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Str(s) => serializer.serialize_str(s),
            Self::List(items) | Self::Tuple(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Dict(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Slice(spec) => {
                let mut st = serializer.serialize_struct("Slice", 3)?;
                st.serialize_field("start", &spec.start)?;
                st.serialize_field("stop", &spec.stop)?;
                st.serialize_field("step", &spec.step)?;
                st.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

impl From<SliceSpec> for Value {
    fn from(spec: SliceSpec) -> Self {
        Self::Slice(spec)
    }
}
