// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Log records and the sink contract.
//!
//! Every node with `save_log` set emits one [`LogRecord`] when it finalizes,
//! loops additionally emit one record per completed iteration, and the
//! `Record` leaf writes custom records. Values are fully resolved before they
//! reach a sink: references never cross this boundary, and values that were
//! not available are written as [`Value::NotAvailable`].
//!
//! The on-disk format is the sink's business. [`MemorySink`] keeps records
//! in memory; `stagecue_debug` provides a JSON-lines writer.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use serde::Serialize;

use crate::error::SinkError;
use crate::value::Value;

/// What produced a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A node finalized.
    State,
    /// A loop iteration completed.
    Iteration,
    /// A leaf wrote a custom record.
    Custom,
}

/// One resolved log record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    /// Name of the node that produced the record.
    pub state: String,
    /// Node type (`"serial"`, `"wait"`, ...).
    pub node_type: &'static str,
    /// What produced the record.
    pub kind: RecordKind,
    /// Resolved fields, in declaration order.
    pub fields: Vec<(String, Value)>,
}

impl LogRecord {
    /// Returns the value of a field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Returns a float field (ints are widened).
    #[must_use]
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }
}

/// Receives resolved log records.
pub trait LogSink {
    /// Writes one record.
    fn write_record(&mut self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flushes buffered records. Called during shutdown.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A [`LogSink`] that drops every record.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write_record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        _ = record;
        Ok(())
    }
}

/// A [`LogSink`] collecting records in memory.
///
/// Clones share storage, so a caller can keep a handle while the runtime
/// owns the sink.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<LogRecord>>>,
    flushes: Rc<RefCell<u32>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record written so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.borrow().clone()
    }

    /// Records produced by the node named `state`, of the given kind.
    #[must_use]
    pub fn records_for(&self, state: &str, kind: RecordKind) -> Vec<LogRecord> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.state == state && r.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of times [`LogSink::flush`] was called.
    #[must_use]
    pub fn flush_count(&self) -> u32 {
        *self.flushes.borrow()
    }
}

impl LogSink for MemorySink {
    fn write_record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        self.records.borrow_mut().push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        *self.flushes.borrow_mut() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn memory_sink_clones_share_records() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let record = LogRecord {
            state: "fixation".into(),
            node_type: "wait",
            kind: RecordKind::State,
            fields: vec![("start_time".into(), Value::Float(1.5))],
        };
        writer.write_record(&record).expect("memory sink never fails");
        writer.flush().expect("memory sink never fails");

        assert_eq!(sink.records().len(), 1, "shared storage");
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(
            sink.records_for("fixation", RecordKind::State)[0].get_f64("start_time"),
            Some(1.5)
        );
        assert!(
            sink.records_for("fixation", RecordKind::Iteration).is_empty(),
            "kind filter"
        );
    }
}
