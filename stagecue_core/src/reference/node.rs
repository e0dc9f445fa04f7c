// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Expression node kinds and their deduplication keys.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::value::{BinaryOp, UnaryOp, Value};

use super::RefId;

type FunctionBody = dyn Fn(&[Value]) -> Result<Value, String>;

/// A named function that a reference can call.
///
/// Two `RefFunction`s are the same function for deduplication purposes only
/// if they are clones of one another.
#[derive(Clone)]
pub struct RefFunction {
    name: Rc<str>,
    body: Rc<FunctionBody>,
    volatile: bool,
}

impl RefFunction {
    /// Wraps `body` under `name`. An `Err` message becomes an
    /// [`EvalErrorKind::Function`](crate::error::EvalErrorKind::Function).
    pub fn new(
        name: impl Into<Rc<str>>,
        body: impl Fn(&[Value]) -> Result<Value, String> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            body: Rc::new(body),
            volatile: false,
        }
    }

    /// Marks the function as volatile: its result is never cached (random
    /// draws, reads of live external state).
    #[must_use]
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }

    /// Returns the function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if results are never cached.
    #[must_use]
    pub const fn is_volatile(&self) -> bool {
        self.volatile
    }

    pub(crate) fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.body)(args)
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.body).cast::<()>() as usize
    }
}

impl fmt::Debug for RefFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefFunction")
            .field("name", &self.name)
            .field("volatile", &self.volatile)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub(crate) enum RefNode {
    Const(Value),
    Source(Value),
    Unary(UnaryOp, RefId),
    Binary(BinaryOp, RefId, RefId),
    GetAttr(RefId, String),
    GetItem(RefId, RefId),
    Slice(RefId, [Option<RefId>; 3]),
    List(Vec<RefId>),
    Tuple(Vec<RefId>),
    Dict(Vec<(String, RefId)>),
    Cond(RefId, RefId, RefId),
    Call(RefFunction, Vec<RefId>),
}

impl RefNode {
    /// Distinct operand handles, in first-use order.
    pub(crate) fn operands(&self) -> Vec<RefId> {
        let mut out: Vec<RefId> = Vec::new();
        let mut push = |id: RefId| {
            if !out.contains(&id) {
                out.push(id);
            }
        };
        match self {
            Self::Const(_) | Self::Source(_) => {}
            Self::Unary(_, a) | Self::GetAttr(a, _) => push(*a),
            Self::Binary(_, a, b) | Self::GetItem(a, b) => {
                push(*a);
                push(*b);
            }
            Self::Slice(a, bounds) => {
                push(*a);
                bounds.iter().flatten().for_each(|b| push(*b));
            }
            Self::List(items) | Self::Tuple(items) | Self::Call(_, items) => {
                items.iter().for_each(|i| push(*i));
            }
            Self::Dict(entries) => entries.iter().for_each(|(_, v)| push(*v)),
            Self::Cond(t, a, b) => {
                push(*t);
                push(*a);
                push(*b);
            }
        }
        out
    }

    /// Structural key for deduplication. Constants and sources are never
    /// shared.
    pub(crate) fn key(&self) -> Option<NodeKey> {
        Some(match self {
            Self::Const(_) | Self::Source(_) => return None,
            Self::Unary(op, a) => NodeKey::Unary(*op, *a),
            Self::Binary(op, a, b) => NodeKey::Binary(*op, *a, *b),
            Self::GetAttr(a, name) => NodeKey::GetAttr(*a, name.clone()),
            Self::GetItem(a, b) => NodeKey::GetItem(*a, *b),
            Self::Slice(a, bounds) => NodeKey::Slice(*a, *bounds),
            Self::List(items) => NodeKey::List(items.clone()),
            Self::Tuple(items) => NodeKey::Tuple(items.clone()),
            Self::Dict(entries) => NodeKey::Dict(entries.clone()),
            Self::Cond(t, a, b) => NodeKey::Cond(*t, *a, *b),
            Self::Call(f, args) => NodeKey::Call(f.identity(), f.is_volatile(), args.clone()),
        })
    }

    pub(crate) fn uses_cache(&self) -> bool {
        match self {
            Self::Const(_) | Self::Source(_) => false,
            Self::Call(f, _) => !f.is_volatile(),
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum NodeKey {
    Unary(UnaryOp, RefId),
    Binary(BinaryOp, RefId, RefId),
    GetAttr(RefId, String),
    GetItem(RefId, RefId),
    Slice(RefId, [Option<RefId>; 3]),
    List(Vec<RefId>),
    Tuple(Vec<RefId>),
    Dict(Vec<(String, RefId)>),
    Cond(RefId, RefId, RefId),
    Call(usize, bool, Vec<RefId>),
}
