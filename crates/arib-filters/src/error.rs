use thiserror::Error;

/// Errors produced by the stateful filters and collectors in this crate.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("TS/PSI parsing error: {0}")]
    Ts(#[from] ts::TsError),

    #[error("ring file sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ring file sink is broken after a previous I/O failure")]
    RingBroken,

    #[error("ring file position {pos} is out of range for a ring of size {ring_size}")]
    InvalidRingPosition { pos: u64, ring_size: u64 },

    #[error("ring file chunk_size must be greater than zero")]
    ChunkSizeIsZero,

    #[error("ring file chunk_size {chunk_size} exceeds the maximum of {max_chunk_size}")]
    ChunkSizeTooLarge { chunk_size: u64, max_chunk_size: u64 },

    #[error("ring file num_chunks must be greater than zero")]
    NumChunksIsZero,

    #[error("ring file num_chunks {num_chunks} exceeds the maximum of {max_num_chunks}")]
    NumChunksTooLarge { num_chunks: u64, max_num_chunks: u64 },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
