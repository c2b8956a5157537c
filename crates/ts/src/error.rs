use thiserror::Error;

/// Errors produced while parsing TS packets and PSI/SI sections.
#[derive(Debug, Error)]
pub enum TsError {
    #[error("invalid packet size: expected 188 bytes, got {0}")]
    InvalidPacketSize(usize),

    #[error("invalid sync byte: expected 0x47, got {0:#04x}")]
    InvalidSyncByte(u8),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("lost transport stream synchronization and failed to resync")]
    ResyncFailed,

    #[error("unexpected end of input")]
    Eof,

    #[error("malformed section: {0}")]
    MalformedSection(&'static str),

    #[error("section CRC-32 check failed")]
    CrcMismatch,

    #[error("unexpected table_id: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedTableId { expected: u8, actual: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TsError>;
