// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The reference interpreter.

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::{EvalError, EvalErrorKind};
use crate::value::{SliceSpec, Value};

use super::node::RefNode;
use super::{RefGraph, RefId};

impl RefGraph {
    /// Evaluates `id`.
    ///
    /// Returns [`Value::NotAvailable`] when any input is not available yet.
    /// Errors are attributed to the innermost failing reference.
    pub fn eval(&mut self, id: RefId) -> Result<Value, EvalError> {
        let idx = self.live(id)?;
        if let Some(v) = self.cached(idx) {
            let v = v.clone();
            self.stats.cache_hits += 1;
            return Ok(v);
        }
        let Some(node) = self.node(idx).cloned() else {
            return Err(EvalError {
                node: id,
                kind: EvalErrorKind::StaleHandle,
            });
        };
        self.stats.evaluations += 1;
        let value = self
            .compute(&node)
            .map_err(|e| e.attribute(id))?;
        self.store_cache(idx, &value);
        Ok(value)
    }

    /// Evaluates several references, in order.
    pub fn eval_all(&mut self, ids: &[RefId]) -> Result<Vec<Value>, EvalError> {
        ids.iter().map(|&id| self.eval(id)).collect()
    }

    fn compute(&mut self, node: &RefNode) -> Result<Value, Failure> {
        match node {
            RefNode::Const(v) | RefNode::Source(v) => Ok(available(v.clone())),
            RefNode::Unary(op, a) => {
                let a = self.eval(*a)?;
                if a.contains_not_available() {
                    return Ok(Value::NotAvailable);
                }
                Ok(Value::unary(*op, &a)?)
            }
            RefNode::Binary(op, a, b) => {
                let a = self.eval(*a)?;
                let b = self.eval(*b)?;
                if a.contains_not_available() || b.contains_not_available() {
                    return Ok(Value::NotAvailable);
                }
                Ok(Value::binary(*op, &a, &b)?)
            }
            RefNode::GetAttr(a, name) => {
                let a = self.eval(*a)?;
                if a.is_not_available() {
                    return Ok(Value::NotAvailable);
                }
                Ok(a.get_attr(name)?)
            }
            RefNode::GetItem(a, i) => {
                let a = self.eval(*a)?;
                let i = self.eval(*i)?;
                if a.is_not_available() || i.contains_not_available() {
                    return Ok(Value::NotAvailable);
                }
                Ok(a.get_item(&i)?)
            }
            RefNode::Slice(a, bounds) => {
                let a = self.eval(*a)?;
                let mut parts = [None; 3];
                for (part, bound) in parts.iter_mut().zip(bounds) {
                    let Some(bound) = bound else { continue };
                    match self.eval(*bound)? {
                        Value::NotAvailable => return Ok(Value::NotAvailable),
                        Value::None => {}
                        v => {
                            *part = Some(v.as_i64().ok_or(EvalErrorKind::TypeMismatch {
                                op: "slice",
                                lhs: a.type_name(),
                                rhs: v.type_name(),
                            })?);
                        }
                    }
                }
                if a.is_not_available() {
                    return Ok(Value::NotAvailable);
                }
                let [start, stop, step] = parts;
                Ok(a.get_item(&Value::Slice(SliceSpec { start, stop, step }))?)
            }
            RefNode::List(items) => Ok(self
                .eval_items(items)?
                .map_or(Value::NotAvailable, Value::List)),
            RefNode::Tuple(items) => Ok(self
                .eval_items(items)?
                .map_or(Value::NotAvailable, Value::Tuple)),
            RefNode::Dict(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let v = self.eval(*v)?;
                    if v.contains_not_available() {
                        return Ok(Value::NotAvailable);
                    }
                    out.push((k.clone(), v));
                }
                Ok(Value::Dict(out))
            }
            RefNode::Cond(test, if_true, if_false) => {
                let test = self.eval(*test)?;
                if test.is_not_available() {
                    return Ok(Value::NotAvailable);
                }
                let branch = if test.truthy() { *if_true } else { *if_false };
                Ok(self.eval(branch)?)
            }
            RefNode::Call(func, args) => {
                let Some(args) = self.eval_items(args)? else {
                    return Ok(Value::NotAvailable);
                };
                self.stats.function_calls += 1;
                func.call(&args).map_err(|message| {
                    Failure::Here(EvalErrorKind::Function {
                        name: String::from(func.name()),
                        message,
                    })
                })
            }
        }
    }

    /// Evaluates container items; `None` if any is not available.
    fn eval_items(&mut self, items: &[RefId]) -> Result<Option<Vec<Value>>, EvalError> {
        let mut out = Vec::with_capacity(items.len());
        for &item in items {
            let v = self.eval(item)?;
            if v.contains_not_available() {
                return Ok(None);
            }
            out.push(v);
        }
        Ok(Some(out))
    }
}

fn available(v: Value) -> Value {
    if v.contains_not_available() {
        Value::NotAvailable
    } else {
        v
    }
}

/// Distinguishes failures of the node being computed from failures that
/// already carry an inner reference's identity.
enum Failure {
    Here(EvalErrorKind),
    Inner(EvalError),
}

impl Failure {
    fn attribute(self, id: RefId) -> EvalError {
        match self {
            Self::Here(kind) => EvalError { node: id, kind },
            Self::Inner(e) => e,
        }
    }
}

impl From<EvalErrorKind> for Failure {
    fn from(kind: EvalErrorKind) -> Self {
        Self::Here(kind)
    }
}

impl From<EvalError> for Failure {
    fn from(e: EvalError) -> Self {
        Self::Inner(e)
    }
}
