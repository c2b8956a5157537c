//! Byte-stream to TS-packet ingestion with resynchronization.

use std::io::Read;

use bytes::Bytes;

use crate::error::TsError;
use crate::packet::TsPacket;

/// One storage block, the unit `kReadChunkSize` is a multiple of.
const BLOCK_SIZE: usize = 4096;

/// Bytes read from the backing handle per refill.
pub const READ_CHUNK_SIZE: usize = 4 * BLOCK_SIZE;

/// Maximum amount of leading noise the resync scan will drop before giving up.
pub const MAX_DROP_BYTES: usize = 2 * 188;

/// How far ahead the resync scan buffers before searching, so that a
/// candidate found near the end of `MAX_DROP_BYTES` still has three more
/// aligned 0x47s available to validate against.
pub const MAX_RESYNC_BYTES: usize = MAX_DROP_BYTES + 3 * 188;

const PACKET_SIZE: usize = 188;

/// A source of validated 188-byte TS packets, with synchronization recovery.
pub trait TsPacketSource {
    /// Returns the next valid packet, or `Ok(None)` on clean EOF.
    fn next_packet(&mut self) -> crate::Result<Option<TsPacket>>;
}

/// Wraps any [`Read`] (stdin, a regular file, …) as a [`TsPacketSource`].
pub struct FileTsSource<R> {
    reader: R,
    buf: Vec<u8>,
    /// Offset of the next unconsumed byte within `buf`.
    pos: usize,
    /// Offset one past the last valid byte within `buf`.
    len: usize,
    eof: bool,
}

impl<R: Read> FileTsSource<R> {
    pub fn new(reader: R) -> Self {
        FileTsSource {
            reader,
            buf: vec![0u8; READ_CHUNK_SIZE + MAX_RESYNC_BYTES],
            pos: 0,
            len: 0,
            eof: false,
        }
    }

    /// Compact unconsumed bytes to the front of `buf`, then read up to
    /// `READ_CHUNK_SIZE` more bytes from the backing reader.
    fn refill(&mut self) -> crate::Result<()> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.len, 0);
            self.len -= self.pos;
            self.pos = 0;
        }
        if self.eof {
            return Ok(());
        }
        loop {
            if self.len >= self.buf.len() {
                return Ok(());
            }
            let n = self.reader.read(&mut self.buf[self.len..])?;
            if n == 0 {
                self.eof = true;
                return Ok(());
            }
            self.len += n;
            if self.len >= PACKET_SIZE {
                return Ok(());
            }
        }
    }

    fn available(&self) -> usize {
        self.len - self.pos
    }

    /// Scan forward from `self.pos` for a byte offset whose next three
    /// packet-aligned positions are also sync bytes, dropping at most
    /// `MAX_DROP_BYTES` in the process.
    fn resync(&mut self) -> crate::Result<()> {
        while self.available() < MAX_RESYNC_BYTES && !self.eof {
            self.refill()?;
        }

        let max_candidates = MAX_DROP_BYTES.min(self.available().saturating_sub(1));
        for drop in 0..=max_candidates {
            let candidate = self.pos + drop;
            if candidate + 3 * PACKET_SIZE >= self.len {
                break;
            }
            if self.buf[candidate] == 0x47
                && self.buf[candidate + PACKET_SIZE] == 0x47
                && self.buf[candidate + 2 * PACKET_SIZE] == 0x47
                && self.buf[candidate + 3 * PACKET_SIZE] == 0x47
            {
                self.pos = candidate;
                return Ok(());
            }
        }
        Err(TsError::ResyncFailed)
    }
}

impl<R: Read> TsPacketSource for FileTsSource<R> {
    fn next_packet(&mut self) -> crate::Result<Option<TsPacket>> {
        if self.available() < PACKET_SIZE {
            self.refill()?;
            if self.available() < PACKET_SIZE {
                return Ok(None);
            }
        }

        if self.buf[self.pos] != 0x47 {
            self.resync()?;
        }

        let packet = TsPacket::parse(Bytes::copy_from_slice(&self.buf[self.pos..self.pos + PACKET_SIZE]))?;
        self.pos += PACKET_SIZE;
        Ok(Some(packet))
    }
}
