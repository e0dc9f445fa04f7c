// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! Errors are split by where they are detected:
//!
//! - [`EvalError`]: a reference failed to evaluate. Carries the failing
//!   [`RefId`] so diagnostics can point at the expression.
//! - [`BuildError`]: malformed tree construction, reported before anything
//!   runs.
//! - [`StateError`]: a node failed while entering, running or leaving. Always
//!   attributed to the node.
//! - [`SinkError`] and [`PresentError`]: failures of the collaborators the
//!   runtime writes logs to and presents frames through.
//! - [`RunError`]: what the idle tick returns to the caller.

use alloc::string::String;

use thiserror::Error;

use crate::reference::RefId;
use crate::state::StateId;

/// Why a reference (or a value operation inside it) failed.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum EvalErrorKind {
    /// The operand types do not support the operation.
    #[error("unsupported operand types for {op}: {lhs} and {rhs}")]
    TypeMismatch {
        /// Operation name.
        op: &'static str,
        /// Type of the left operand.
        lhs: &'static str,
        /// Type of the right operand.
        rhs: &'static str,
    },
    /// The operand type does not support the unary operation.
    #[error("bad operand type for {op}: {operand}")]
    BadOperand {
        /// Operation name.
        op: &'static str,
        /// Type of the operand.
        operand: &'static str,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Integer arithmetic overflowed, or a repetition grew too large.
    #[error("overflow")]
    Overflow,
    /// Sequence index outside the sequence.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Requested index.
        index: i64,
        /// Length of the sequence.
        len: usize,
    },
    /// Dictionary lookup of a missing key.
    #[error("key `{0}` not found")]
    KeyNotFound(String),
    /// Attribute lookup on a value without that attribute.
    #[error("`{on}` value has no attribute `{attr}`")]
    NoAttribute {
        /// Requested attribute.
        attr: String,
        /// Type of the value.
        on: &'static str,
    },
    /// A slice with a zero step.
    #[error("slice step cannot be zero")]
    SliceStepZero,
    /// A wrapped function reported a failure.
    #[error("function `{name}` failed: {message}")]
    Function {
        /// Function name.
        name: String,
        /// Failure message.
        message: String,
    },
    /// The reference handle was collected.
    #[error("stale reference handle")]
    StaleHandle,
}

/// A reference evaluation failure, attributed to the failing reference.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("reference {node:?} failed: {kind}")]
pub struct EvalError {
    /// The reference whose evaluation failed.
    pub node: RefId,
    /// What went wrong.
    pub kind: EvalErrorKind,
}

/// Malformed tree construction.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The handle does not name a node in this tree.
    #[error("unknown state {0:?}")]
    UnknownState(StateId),
    /// Children can only be added to composite nodes.
    #[error("state {0:?} cannot have children")]
    NotAComposite(StateId),
    /// `end` was called with no open composite.
    #[error("no open composite to close")]
    UnbalancedScope,
    /// Re-parenting would make a node its own ancestor.
    #[error("claiming {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// The node being moved.
        child: StateId,
        /// The proposed new parent.
        parent: StateId,
    },
    /// The root node cannot be moved.
    #[error("the root state cannot be claimed")]
    ClaimRoot,
    /// The tree can only be restructured before the run starts.
    #[error("state {0:?} is already running")]
    AlreadyRunning(StateId),
    /// `elif`/`else_` without a preceding `if_` sibling.
    #[error("`{0}` must directly follow an `if_`")]
    DanglingBranch(&'static str),
    /// A second `else_` on the same chain.
    #[error("conditional chain already has an `else_`")]
    DuplicateElse,
    /// `meanwhile`/`until_done` with no preceding sibling.
    #[error("`{0}` needs a preceding sibling state")]
    MissingSibling(&'static str),
    /// The named attribute does not exist on the state.
    #[error("state {state:?} has no attribute `{name}`")]
    UnknownAttribute {
        /// The state.
        state: StateId,
        /// The requested attribute.
        name: String,
    },
    /// A reference handle used during construction was stale.
    #[error("stale reference handle {0:?}")]
    StaleReference(RefId),
}

/// Why a node failed.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum StateErrorKind {
    /// A reference the node needed failed to evaluate.
    #[error(transparent)]
    Eval(#[from] EvalError),
    /// A duration resolved to a negative number of seconds.
    #[error("negative duration {seconds}s")]
    NegativeDuration {
        /// The offending value.
        seconds: f64,
    },
    /// A duration resolved to NaN or an infinity.
    #[error("duration must be finite, found {seconds}")]
    NonFiniteDuration {
        /// The offending value.
        seconds: f64,
    },
    /// A duration resolved to something that is not a number.
    #[error("duration must be a number or None, found {found}")]
    InvalidDuration {
        /// Type name of the resolved value.
        found: &'static str,
    },
    /// A loop over something that is not a list, tuple or string.
    #[error("loop needs a sequence, found {found}")]
    NotASequence {
        /// Type name of the resolved value.
        found: &'static str,
    },
    /// Writing the node's log record failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// A leaf reported a failure.
    #[error("{0}")]
    Leaf(String),
}

/// A failure attributed to a specific node.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("state `{name}` ({node:?}) failed: {kind}")]
pub struct StateError {
    /// The failing node.
    pub node: StateId,
    /// Name of the failing node.
    pub name: String,
    /// What went wrong.
    pub kind: StateErrorKind,
}

/// A log sink failed to accept or persist records.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Writing a record failed.
    #[error("failed to write log record: {0}")]
    Write(String),
    /// Flushing buffered records failed.
    #[error("failed to flush log sink: {0}")]
    Flush(String),
}

/// A presenter failed to submit a flip.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PresentError {
    /// The display or surface is gone.
    #[error("presentation target lost")]
    Lost,
    /// Any other backend failure.
    #[error("presenter failed: {0}")]
    Backend(String),
}

/// Top-level failure of a run.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RunError {
    /// A node failed; the run was shut down.
    #[error(transparent)]
    State(#[from] StateError),
    /// The tree was malformed.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// The log sink failed.
    #[error(transparent)]
    Sink(#[from] SinkError),
    /// The presenter failed.
    #[error(transparent)]
    Present(#[from] PresentError),
    /// The run already finished or failed.
    #[error("the run is no longer active")]
    NotRunning,
}
