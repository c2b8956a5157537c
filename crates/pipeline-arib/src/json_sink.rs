//! NDJSON sink: one compact JSON document per line.

use std::io::Write;

use serde_json::Value;

use crate::error::PipelineError;

/// A terminal consumer of JSON documents, one per line.
pub trait JsonConsumer {
    fn handle_document(&mut self, value: &Value) -> crate::Result<()>;

    fn end(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

pub struct JsonlSink<W> {
    writer: W,
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        JsonlSink { writer }
    }
}

impl<W: Write> JsonConsumer for JsonlSink<W> {
    fn handle_document(&mut self, value: &Value) -> crate::Result<()> {
        serde_json::to_writer(&mut self.writer, value).map_err(PipelineError::Json)?;
        self.writer.write_all(b"\n").map_err(PipelineError::Io)
    }

    fn end(&mut self) -> crate::Result<()> {
        self.writer.flush().map_err(PipelineError::Io)
    }
}
