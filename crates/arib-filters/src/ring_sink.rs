//! Fixed-size ring file sink: writes packet bytes into a pre-allocated
//! rotating file, flushing full buffers, syncing at chunk boundaries, and
//! truncating + seeking back to the start on wrap.

use std::io::{Seek, SeekFrom, Write};

use ts::packet::TsPacket;

use crate::error::FilterError;

/// One storage block.
pub const BLOCK_SIZE: usize = 4096;
pub const DEFAULT_BUFFER_SIZE: usize = 2 * BLOCK_SIZE;

/// `chunk_size` must not exceed `buffer_size * MAX_CHUNK_SIZE_MULTIPLIER`.
pub const MAX_CHUNK_SIZE_MULTIPLIER: u64 = 0x3FFFF;
pub const MAX_NUM_CHUNKS: u64 = 0x7FFFFFFF;

/// The subset of `File`'s API the ring sink needs beyond `Write`/`Seek`,
/// factored out so tests can back it with an in-memory double.
pub trait RingBackingFile: Write + Seek {
    fn set_len(&mut self, size: u64) -> std::io::Result<()>;
    fn sync_all(&mut self) -> std::io::Result<()>;
}

impl RingBackingFile for std::fs::File {
    fn set_len(&mut self, size: u64) -> std::io::Result<()> {
        std::fs::File::set_len(self, size)
    }

    fn sync_all(&mut self) -> std::io::Result<()> {
        std::fs::File::sync_all(self)
    }
}

pub struct RingFileSink<F> {
    file: F,
    buffer: Vec<u8>,
    buf_pos: usize,
    buffer_size: usize,
    chunk_size: u64,
    num_chunks: u64,
    ring_size: u64,
    chunk_pos: u64,
    ring_pos: u64,
    broken: bool,
}

impl<F: RingBackingFile> RingFileSink<F> {
    pub fn new(file: F, buffer_size: usize, chunk_size: u64, num_chunks: u64) -> crate::Result<Self> {
        debug_assert!(chunk_size % buffer_size as u64 == 0, "chunk_size must be a multiple of buffer_size");

        if chunk_size == 0 {
            return Err(FilterError::ChunkSizeIsZero);
        }
        let max_chunk_size = buffer_size as u64 * MAX_CHUNK_SIZE_MULTIPLIER;
        if chunk_size > max_chunk_size {
            return Err(FilterError::ChunkSizeTooLarge { chunk_size, max_chunk_size });
        }
        if num_chunks == 0 {
            return Err(FilterError::NumChunksIsZero);
        }
        if num_chunks > MAX_NUM_CHUNKS {
            return Err(FilterError::NumChunksTooLarge { num_chunks, max_num_chunks: MAX_NUM_CHUNKS });
        }

        Ok(RingFileSink {
            file,
            buffer: vec![0u8; buffer_size],
            buf_pos: 0,
            buffer_size,
            chunk_size,
            num_chunks,
            ring_size: chunk_size * num_chunks,
            chunk_pos: 0,
            ring_pos: 0,
            broken: false,
        })
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn position(&self) -> u64 {
        self.ring_pos
    }

    pub fn ring_size(&self) -> u64 {
        self.ring_size
    }

    /// Seek the underlying file to `pos` and reset the in-memory cursors to
    /// match. `pos` must be a multiple of both the buffer size and the chunk
    /// size, and strictly less than `ring_size`.
    pub fn set_position(&mut self, pos: u64) -> crate::Result<()> {
        if pos >= self.ring_size
            || pos % self.buffer_size as u64 != 0
            || pos % self.chunk_size != 0
        {
            return Err(FilterError::InvalidRingPosition { pos, ring_size: self.ring_size });
        }
        self.file.seek(SeekFrom::Start(pos)).map_err(FilterError::Io)?;
        self.buf_pos = 0;
        self.ring_pos = pos;
        self.chunk_pos = pos % self.chunk_size;
        Ok(())
    }

    /// Copy one packet's bytes into the buffer, flushing as needed. Returns
    /// `false` (and marks the sink broken) on I/O failure.
    pub fn handle_packet(&mut self, packet: &TsPacket) -> bool {
        self.write_bytes(packet.as_bytes()).is_ok()
    }

    /// Copy `data` into the buffer, flushing as needed, and report the
    /// `ring_pos` of every chunk boundary crossed, in order — callers (the
    /// service recorder) use this to emit a `chunk` message at each
    /// boundary. `Err(())` means the write failed and the sink is now
    /// broken.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<Vec<u64>, ()> {
        let mut events = Vec::new();
        if self.broken {
            return Err(());
        }
        while !data.is_empty() {
            let take = (self.buffer_size - self.buf_pos).min(data.len());
            self.buffer[self.buf_pos..self.buf_pos + take].copy_from_slice(&data[..take]);
            self.buf_pos += take;
            data = &data[take..];
            if self.buf_pos == self.buffer_size {
                match self.flush() {
                    Ok(Some(pos)) => events.push(pos),
                    Ok(None) => {}
                    Err(_) => {
                        self.broken = true;
                        return Err(());
                    }
                }
            }
        }
        Ok(events)
    }

    fn flush(&mut self) -> std::io::Result<Option<u64>> {
        self.file.write_all(&self.buffer)?;
        self.buf_pos = 0;
        self.ring_pos += self.buffer_size as u64;
        self.chunk_pos += self.buffer_size as u64;

        let mut end_of_chunk = None;
        if self.chunk_pos >= self.chunk_size {
            self.file.sync_all()?;
            end_of_chunk = Some(self.ring_pos);
            self.chunk_pos = 0;
        }

        if self.ring_pos >= self.ring_size {
            self.file.set_len(self.ring_size)?;
            self.file.seek(SeekFrom::Start(0))?;
            self.ring_pos = 0;
        }

        Ok(end_of_chunk)
    }

    pub fn exit_code(&self) -> i32 {
        if self.broken { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct MemFile {
        cursor: Cursor<Vec<u8>>,
    }

    impl Write for MemFile {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.cursor.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            self.cursor.flush()
        }
    }

    impl Seek for MemFile {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.cursor.seek(pos)
        }
    }

    impl RingBackingFile for MemFile {
        fn set_len(&mut self, size: u64) -> std::io::Result<()> {
            self.cursor.get_mut().resize(size as usize, 0);
            Ok(())
        }
        fn sync_all(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_ring_wrap_emits_end_of_chunk_at_chunk_and_ring_boundaries() {
        // buffer_size=4, chunk_size=8 (2 buffers/chunk), num_chunks=2 -> ring_size=16.
        let mut sink = RingFileSink::new(MemFile::default(), 4, 8, 2).unwrap();
        let mut events = Vec::new();
        for _ in 0..4 {
            let result = sink.write_bytes(&[0xAAu8; 4]).unwrap();
            events.extend(result);
        }
        assert_eq!(events, vec![8, 16]);
        assert_eq!(sink.position(), 0); // wrapped after reaching ring_size
    }

    #[test]
    fn test_set_position_requires_alignment() {
        let mut sink = RingFileSink::new(MemFile::default(), 4, 8, 2).unwrap();
        assert!(sink.set_position(4).is_err()); // not a multiple of chunk_size
        assert!(sink.set_position(16).is_err()); // not strictly less than ring_size
        assert!(sink.set_position(8).is_ok());
        assert_eq!(sink.position(), 8);
    }

    #[test]
    fn test_io_failure_marks_sink_broken() {
        struct FailingFile;
        impl Write for FailingFile {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk full"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        impl Seek for FailingFile {
            fn seek(&mut self, _pos: SeekFrom) -> std::io::Result<u64> {
                Ok(0)
            }
        }
        impl RingBackingFile for FailingFile {
            fn set_len(&mut self, _size: u64) -> std::io::Result<()> {
                Ok(())
            }
            fn sync_all(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut sink = RingFileSink::new(FailingFile, 4, 8, 2).unwrap();
        assert!(sink.write_bytes(&[0u8; 4]).is_err());
        assert!(sink.is_broken());
        assert_eq!(sink.exit_code(), 1);
    }

    #[test]
    fn test_new_rejects_chunk_size_over_the_maximum() {
        let buffer_size = 4;
        let chunk_size = buffer_size as u64 * MAX_CHUNK_SIZE_MULTIPLIER + buffer_size as u64;
        let result = RingFileSink::new(MemFile::default(), buffer_size, chunk_size, 1);
        assert!(matches!(result, Err(FilterError::ChunkSizeTooLarge { .. })));
    }

    #[test]
    fn test_new_rejects_num_chunks_over_the_maximum() {
        let result = RingFileSink::new(MemFile::default(), 4, 8, MAX_NUM_CHUNKS + 1);
        assert!(matches!(result, Err(FilterError::NumChunksTooLarge { .. })));
    }
}
