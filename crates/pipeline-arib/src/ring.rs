//! Capability view over [`arib_filters::RingFileSink`] for the driver layer:
//! position/seek/broken-state queries plus the end-of-chunk boundaries a
//! write crossed, without exposing the sink's internal buffering.
//!
//! The ring file sink itself lives in `arib-filters` since it's state the
//! service recorder owns directly, not a generic pipeline stage.

use arib_filters::RingFileSink;
use arib_filters::ring_sink::RingBackingFile;

/// Read-only view of a ring file sink's position/health, used by callers
/// that only need to report status (e.g. `record-service`'s JSON lifecycle
/// messages) without driving the sink themselves.
pub trait RingConsumer {
    fn position(&self) -> u64;
    fn ring_size(&self) -> u64;
    fn is_broken(&self) -> bool;
    fn set_position(&mut self, pos: u64) -> crate::Result<()>;
}

impl<F: RingBackingFile> RingConsumer for RingFileSink<F> {
    fn position(&self) -> u64 {
        RingFileSink::position(self)
    }

    fn ring_size(&self) -> u64 {
        RingFileSink::ring_size(self)
    }

    fn is_broken(&self) -> bool {
        RingFileSink::is_broken(self)
    }

    fn set_position(&mut self, pos: u64) -> crate::Result<()> {
        RingFileSink::set_position(self, pos).map_err(crate::error::PipelineError::Filter)
    }
}
