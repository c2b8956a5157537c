//! Stateful packet filters and JSON collectors built on top of `ts`'s PSI/SI
//! parsing primitives.
//!
//! Every type here consumes [`ts::TsPacket`]s one at a time and either
//! forwards a (possibly rewritten) packet stream, emits JSON documents, or
//! both. None of them own an event loop or an I/O source — see
//! `pipeline-arib` for the synchronous driver that wires these into a
//! `PacketSource`/`PacketConsumer` pipeline.

pub mod airtime_tracker;
pub mod clock;
pub mod eit_collector;
pub mod eitpf_collector;
pub mod error;
pub mod pcr_synchronizer;
pub mod program_filter;
pub mod program_metadata_collector;
pub mod ring_sink;
pub mod service_filter;
pub mod service_recorder;
pub mod service_scanner;
pub mod start_seeker;

pub use airtime_tracker::{AirtimeTracker, AirtimeTrackerOptions};
pub use clock::Clock;
pub use eit_collector::{EitCollector, EitCollectorOptions};
pub use eitpf_collector::{EitpfCollector, EitpfCollectorOptions};
pub use error::FilterError;
pub use pcr_synchronizer::{PcrSynchronizer, PcrSynchronizerOptions};
pub use program_filter::{ProgramFilter, ProgramFilterOptions};
pub use program_metadata_collector::ProgramMetadataCollector;
pub use ring_sink::{RingFileSink, DEFAULT_BUFFER_SIZE};
pub use service_filter::{ServiceFilter, ServiceFilterOptions};
pub use service_recorder::{ServiceRecorder, ServiceRecorderOptions};
pub use service_scanner::{ServiceScanner, ServiceScannerOptions};
pub use start_seeker::{StartSeeker, StartSeekerOptions};

/// Result type for `arib-filters` operations.
pub type Result<T> = std::result::Result<T, FilterError>;
