//! Packet-consuming sinks with a `start`/`handle`/`end`/`exit_code` lifecycle.

use std::io::Write;

use ts::packet::TsPacket;

use crate::error::PipelineError;

/// Exit codes shared by every subcommand.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_RETRY: i32 = 222;

/// A terminal consumer of a packet stream: stdout, a ring file, or (in the
/// CLI's processor layer) a filter-chain feeding one of those.
pub trait PacketConsumer {
    /// Called once before the first packet.
    fn start(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Consume one packet. Returning `Ok(false)` stops the pipeline.
    fn handle_packet(&mut self, packet: &TsPacket) -> crate::Result<bool>;

    /// Called once after the last packet (EOF or early stop).
    fn end(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// The process exit code this sink implies once `end` has run.
    fn exit_code(&self) -> i32 {
        EXIT_SUCCESS
    }
}

/// Writes raw packet bytes to any [`Write`], buffering four pages (16 KiB,
/// `4 * 4096`) between syscalls and flushing on [`PacketConsumer::end`].
pub struct StdoutPacketSink<W> {
    writer: W,
    buffer: Vec<u8>,
    broken: bool,
}

const STDOUT_BUFFER_SIZE: usize = 4 * 4096;

impl<W: Write> StdoutPacketSink<W> {
    pub fn new(writer: W) -> Self {
        StdoutPacketSink { writer, buffer: Vec::with_capacity(STDOUT_BUFFER_SIZE), broken: false }
    }

    fn flush_buffer(&mut self) -> crate::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.writer.write_all(&self.buffer).map_err(|e| {
            self.broken = true;
            PipelineError::Io(e)
        })?;
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write> PacketConsumer for StdoutPacketSink<W> {
    fn handle_packet(&mut self, packet: &TsPacket) -> crate::Result<bool> {
        if self.broken {
            return Ok(false);
        }
        self.buffer.extend_from_slice(packet.as_bytes());
        if self.buffer.len() >= STDOUT_BUFFER_SIZE {
            self.flush_buffer()?;
        }
        Ok(true)
    }

    fn end(&mut self) -> crate::Result<()> {
        self.flush_buffer()?;
        self.writer.flush().map_err(|e| {
            self.broken = true;
            PipelineError::Io(e)
        })
    }

    fn exit_code(&self) -> i32 {
        if self.broken { EXIT_FAILURE } else { EXIT_SUCCESS }
    }
}
