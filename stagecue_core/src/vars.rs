// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Name-keyed variable store.
//!
//! Each variable is a source reference in the [`RefGraph`]. Reading a
//! variable before it is set yields [`Value::NotAvailable`]; setting it
//! notifies every watcher of expressions built on it.

use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::error::EvalError;
use crate::reference::{RefGraph, RefId};
use crate::value::Value;

/// Variables shared between states.
#[derive(Debug, Default)]
pub struct Variables {
    slots: BTreeMap<String, RefId>,
}

impl Variables {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reference bound to `name`, creating an unset variable if
    /// needed. The reference stays valid for the life of the store.
    pub fn get(&mut self, refs: &mut RefGraph, name: &str) -> RefId {
        if let Some(&id) = self.slots.get(name)
            && refs.is_alive(id)
        {
            return id;
        }
        let id = refs.source(Value::NotAvailable);
        // Freshly created, so pinning cannot fail.
        _ = refs.pin(id);
        self.slots.insert(name.into(), id);
        id
    }

    /// Sets `name` to `value` and notifies dependents.
    pub fn set(
        &mut self,
        refs: &mut RefGraph,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), EvalError> {
        let id = self.get(refs, name);
        refs.set(id, value)
    }

    /// Evaluates the current value of `name`.
    pub fn value(&mut self, refs: &mut RefGraph, name: &str) -> Result<Value, EvalError> {
        let id = self.get(refs, name);
        refs.eval(id)
    }

    /// Returns `true` if `name` has been bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Iterates over variable names and their references.
    pub fn iter(&self) -> impl Iterator<Item = (&str, RefId)> + '_ {
        self.slots.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use core::cell::Cell;

    use super::*;

    #[test]
    fn unset_variables_are_not_available() {
        let mut refs = RefGraph::new();
        let mut vars = Variables::new();
        assert_eq!(vars.value(&mut refs, "score"), Ok(Value::NotAvailable));
        assert!(vars.contains("score"), "reading binds the name");
    }

    #[test]
    fn setting_a_variable_notifies_expressions() {
        let mut refs = RefGraph::new();
        let mut vars = Variables::new();
        let score = vars.get(&mut refs, "score");
        let one = refs.constant(1_i64);
        let next = refs.add(score, one);

        let fired = Rc::new(Cell::new(0));
        let f = Rc::clone(&fired);
        refs.add_change_callback(next, Box::new(move |_| f.set(f.get() + 1)))
            .expect("live");

        vars.set(&mut refs, "score", 41_i64).expect("variable is a source");
        assert_eq!(fired.get(), 1, "watcher notified");
        assert_eq!(refs.eval(next), Ok(Value::Int(42)));
        assert_eq!(vars.get(&mut refs, "score"), score, "stable binding");
    }

    #[test]
    fn variables_survive_collection() {
        let mut refs = RefGraph::new();
        let mut vars = Variables::new();
        vars.set(&mut refs, "block", 3_i64).expect("source");
        refs.collect_garbage();
        assert_eq!(vars.value(&mut refs, "block"), Ok(Value::Int(3)));
    }
}
