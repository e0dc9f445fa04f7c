// Copyright 2026 the Stagecue Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! JSON Lines log output.
//!
//! [`JsonLinesSink`] implements [`LogSink`] and writes each record as one
//! flat JSON object holding `state`, `node_type`, `kind` and every field
//! of the record. Values that were never available serialize as
//! the string `"NotAvailable"`.

use std::io::Write;

use serde_json::{Map, Value};

use stagecue_core::error::SinkError;
use stagecue_core::record::{LogRecord, LogSink};

/// Writes one JSON object per log record.
pub struct JsonLinesSink<W: Write = Box<dyn Write>> {
    writer: W,
    written: u64,
}

impl<W: Write> std::fmt::Debug for JsonLinesSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesSink")
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

impl<W: Write> JsonLinesSink<W> {
    /// Creates a sink writing to `writer`.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Records written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Flattens a record into a JSON object.
pub fn record_to_json(record: &LogRecord) -> Result<Value, serde_json::Error> {
    let mut object = Map::new();
    object.insert("state".into(), Value::from(record.state.as_str()));
    object.insert("node_type".into(), Value::from(record.node_type));
    object.insert("kind".into(), serde_json::to_value(record.kind)?);
    for (name, value) in &record.fields {
        object.insert(name.clone(), serde_json::to_value(value)?);
    }
    Ok(Value::Object(object))
}

impl<W: Write> LogSink for JsonLinesSink<W> {
    fn write_record(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let line = record_to_json(record).map_err(|e| SinkError::Write(e.to_string()))?;
        serde_json::to_writer(&mut self.writer, &line)
            .map_err(|e| SinkError::Write(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| SinkError::Write(e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(|e| SinkError::Flush(e.to_string()))
    }
}
