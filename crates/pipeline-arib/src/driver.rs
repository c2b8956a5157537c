//! The single-threaded cooperative driver loop: pull one packet from a
//! [`TsPacketSource`], hand it to a step closure, act on the outcome.
//!
//! Generalized over a single step closure instead of a chain of owned
//! stages: every `arib-filters` stage already owns its own bespoke
//! `FilterAction` enum (`Drop`/`Forward`/`Stop`/`Retry`), so the CLI's
//! per-subcommand processor adapts that into an [`Outcome`] rather than
//! this crate re-deriving a uniform processor interface the filters don't
//! share.

use tracing::{info, warn};
use ts::source::TsPacketSource;

use crate::sink::{EXIT_FAILURE, EXIT_RETRY, EXIT_SUCCESS};

/// What the driver should do after one packet has been handled.
pub enum Outcome {
    /// Keep reading.
    Continue,
    /// Stop cleanly; exit 0.
    Stop,
    /// Stop because the subcommand could not become ready in time
    /// (a semantic retry); exit 222.
    Retry,
    /// Stop because of an unrecoverable error; exit 1. Carries the message
    /// already logged by the caller, for the one remaining `warn!` here.
    Fail(String),
}

/// Runs the driver loop to completion and returns the process exit code.
///
/// `step` is called once per packet pulled from `source`; EOF ends the loop
/// with [`EXIT_SUCCESS`] regardless of what `step` would have returned for
/// a further packet — a short read is treated as normal termination.
pub fn run_pipeline<S, F>(source: &mut S, mut step: F) -> crate::Result<i32>
where
    S: TsPacketSource,
    F: FnMut(&ts::TsPacket) -> crate::Result<Outcome>,
{
    loop {
        let Some(packet) = source.next_packet()? else {
            info!("End of stream");
            return Ok(EXIT_SUCCESS);
        };

        match step(&packet)? {
            Outcome::Continue => continue,
            Outcome::Stop => return Ok(EXIT_SUCCESS),
            Outcome::Retry => return Ok(EXIT_RETRY),
            Outcome::Fail(message) => {
                warn!(message, "Pipeline stage failed");
                return Ok(EXIT_FAILURE);
            }
        }
    }
}
