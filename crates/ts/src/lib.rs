//! TS/PSI parsing for MPEG-2 Transport Streams carrying ARIB-profile
//! (Japanese digital broadcast) data.
//!
//! Provides 188-byte packet parsing, adaptation field / PCR decoding, PSI/SI
//! section demultiplexing, and owned + zero-copy representations of
//! PAT/PMT/CAT/SDT/NIT/EIT/TDT/TOT tables. This crate does not implement any
//! of the stateful filters built on top of it; see `arib-filters`.

pub mod adaptation_field;
pub mod aribstr;
pub mod cat;
pub mod crc32;
pub mod descriptor;
pub mod eit;
pub mod error;
pub mod nit;
pub mod packet;
pub mod packetizer;
pub mod pat;
pub mod pcr;
pub mod pmt;
pub mod sdt;
pub mod section;
pub mod sidset;
pub mod source;
pub mod tdt_tot;
pub mod time;

pub use adaptation_field::{AdaptationField, AdaptationFieldRef, Pcr};
pub use cat::Cat;
pub use crc32::{mpeg2_crc32, validate_section_crc32};
pub use descriptor::{Ac3Descriptor, DescriptorIterator, DescriptorRef, LanguageEntry};
pub use eit::{Eit, EitDescriptor, EitEvent};
pub use error::TsError;
pub use nit::{Nit, NitTransport};
pub use packet::{
    ContinuityMode, ContinuityStatus, PID_BIT, PID_CAT, PID_CDT, PID_EIT, PID_NIT, PID_NULL,
    PID_PAT, PID_RST, PID_SDT, PID_TDT_TOT, TsPacket,
};
pub use packetizer::SectionPacketizer;
pub use pat::{Pat, PatProgram};
pub use pcr::Pcr42;
pub use pmt::{Pmt, PmtStream, StreamType};
pub use sdt::{Sdt, SdtService};
pub use section::{RawSection, SectionDemux};
pub use sidset::SidSet;
pub use source::{FileTsSource, TsPacketSource, MAX_DROP_BYTES, MAX_RESYNC_BYTES, READ_CHUNK_SIZE};
pub use tdt_tot::{Tdt, Tot};

/// Result type for TS/PSI parsing operations.
pub type Result<T> = std::result::Result<T, TsError>;
