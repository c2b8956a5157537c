//! Capability traits and the synchronous single-threaded driver loop wiring
//! a [`ts::source::TsPacketSource`] into an `arib-filters` stage and a
//! terminal sink.
//!
//! Synchronous by design: no `tokio`/channels, since nothing here needs a
//! suspension point other than blocking reads/writes.

pub mod driver;
pub mod error;
pub mod json_sink;
pub mod ring;
pub mod sink;

pub use driver::{run_pipeline, Outcome};
pub use error::PipelineError;
pub use json_sink::{JsonConsumer, JsonlSink};
pub use ring::RingConsumer;
pub use sink::{PacketConsumer, StdoutPacketSink, EXIT_FAILURE, EXIT_RETRY, EXIT_SUCCESS};

pub type Result<T> = std::result::Result<T, PipelineError>;
