//! PCR-to-wall-clock baseline shared by the program filter and the service
//! recorder.

use chrono::NaiveDateTime;
use std::cmp::Ordering;

use ts::pcr::compare_pcr;
use ts::Pcr42;

/// Number of consecutive backward PCR jumps on the tracked PID before the
/// baseline is considered stale and resynchronized from scratch.
///
/// Chosen as a small, conservative value consistent with "a few consecutive
/// gaps invalidate the baseline".
pub const PCR_GAP_COUNT_THRESHOLD: u32 = 3;

/// Tracks a `(PCR tick, JST wall-clock time)` baseline on one PCR PID, and
/// projects forward/backward between the two as new PCR ticks and TDT/TOT
/// times arrive.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    pid: Option<u16>,
    baseline_pcr: Option<Pcr42>,
    baseline_time: Option<NaiveDateTime>,
    latest_pcr: Option<Pcr42>,
    gap_count: u32,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pid(&self) -> bool {
        self.pid.is_some()
    }

    pub fn pid(&self) -> Option<u16> {
        self.pid
    }

    /// Switches the tracked PCR PID, invalidating the whole baseline. Mirrors
    /// `program_filter.hh`'s `HandlePmt`: a changed PCR PID clears both
    /// `clock_pcr_ready_` and `clock_time_ready_`, not just the PCR half —
    /// the wall-clock baseline was anchored to the old PID's tick sequence,
    /// so a new TDT/TOT must re-establish it too.
    pub fn set_pid(&mut self, pid: u16) {
        self.pid = Some(pid);
        self.baseline_pcr = None;
        self.baseline_time = None;
        self.latest_pcr = None;
        self.gap_count = 0;
    }

    /// Whether both halves of the baseline are established.
    pub fn is_ready(&self) -> bool {
        self.baseline_pcr.is_some() && self.baseline_time.is_some()
    }

    /// Record a PCR tick observed on the tracked PID. The first tick after a
    /// `set_pid` establishes the PCR baseline; later ticks that move
    /// backward (wrap-aware) accumulate in `gap_count`, and after
    /// [`PCR_GAP_COUNT_THRESHOLD`] consecutive backward jumps the baseline
    /// is re-established at the new tick (treated as a stream restart).
    pub fn update_pcr(&mut self, pcr: Pcr42) {
        match self.baseline_pcr {
            None => {
                self.baseline_pcr = Some(pcr);
                self.latest_pcr = Some(pcr);
                self.gap_count = 0;
            }
            Some(_) => {
                let latest = self.latest_pcr.unwrap_or(pcr);
                if compare_pcr(pcr, latest) == Ordering::Less {
                    self.gap_count += 1;
                    if self.gap_count >= PCR_GAP_COUNT_THRESHOLD {
                        self.baseline_pcr = Some(pcr);
                        self.latest_pcr = Some(pcr);
                        self.gap_count = 0;
                    }
                } else {
                    self.latest_pcr = Some(pcr);
                    self.gap_count = 0;
                }
            }
        }
    }

    /// Record a wall-clock time decoded from TDT/TOT (already JST). Only the
    /// first call establishes the baseline; later calls are no-ops until the
    /// baseline is invalidated (there is currently no trigger that
    /// invalidates the time baseline independently of `set_pid`).
    pub fn update_time(&mut self, jst: NaiveDateTime) {
        if self.baseline_time.is_none() {
            self.baseline_pcr = self.latest_pcr;
            self.baseline_time = Some(jst);
        }
    }

    /// The current projected wall-clock time: the time baseline advanced by
    /// however far the latest PCR tick is from the PCR baseline. `None`
    /// unless [`Self::is_ready`].
    pub fn now(&self) -> Option<NaiveDateTime> {
        let baseline_pcr = self.baseline_pcr?;
        let baseline_time = self.baseline_time?;
        let latest = self.latest_pcr.unwrap_or(baseline_pcr);
        let diff_ticks = latest.ticks() - baseline_pcr.ticks();
        let diff_ms = diff_ticks / ts::pcr::PCR_TICKS_PER_MS;
        Some(ts::time::add_ms(baseline_time, diff_ms))
    }

    /// Convert a JST wall-clock time to the PCR tick the baseline predicts
    /// for it. Mirrors `program_filter.hh`'s `ConvertTimeToPcr`: `time` may
    /// be before or after the baseline; the result always wraps into
    /// `[0, 2^42)`. `None` unless [`Self::is_ready`].
    pub fn convert_time_to_pcr(&self, time: NaiveDateTime) -> Option<Pcr42> {
        let baseline_pcr = self.baseline_pcr?;
        let baseline_time = self.baseline_time?;
        let diff_ms = (time - baseline_time).num_milliseconds();
        Some(baseline_pcr.add_ms(diff_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn jst(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_not_ready_until_both_halves_set() {
        let mut clock = Clock::new();
        assert!(!clock.is_ready());
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(0));
        assert!(!clock.is_ready());
        clock.update_time(jst(0, 0, 0));
        assert!(clock.is_ready());
    }

    #[test]
    fn test_now_projects_forward_with_latest_pcr() {
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(0));
        clock.update_time(jst(12, 0, 0));
        assert_eq!(clock.now(), Some(jst(12, 0, 0)));

        clock.update_pcr(Pcr42::new(0).add_ms(2_000));
        assert_eq!(clock.now(), Some(jst(12, 0, 2)));
    }

    #[test]
    fn test_convert_time_to_pcr_is_inverse_of_baseline() {
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(1000));
        clock.update_time(jst(12, 0, 0));

        let pcr = clock.convert_time_to_pcr(jst(12, 0, 1)).unwrap();
        assert_eq!(pcr, Pcr42::new(1000).add_ms(1000));
    }

    #[test]
    fn test_set_pid_invalidates_whole_baseline() {
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(0));
        clock.update_time(jst(12, 0, 0));
        assert!(clock.is_ready());

        clock.set_pid(0x200);
        assert!(!clock.is_ready());
        clock.update_pcr(Pcr42::new(500));
        assert!(!clock.is_ready());
        clock.update_time(jst(13, 0, 0));
        assert!(clock.is_ready());
        assert_eq!(clock.now(), Some(jst(13, 0, 0)));
    }

    #[test]
    fn test_seeding_via_set_pid_then_update_establishes_baseline() {
        // Mirrors `ProgramFilterOption`'s pre-seeded clock: construction
        // calls set_pid/update_pcr/update_time once with known-good values
        // and the clock is immediately ready, with no resync required.
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(1000));
        clock.update_time(jst(9, 0, 0));
        assert!(clock.is_ready());
        assert_eq!(clock.now(), Some(jst(9, 0, 0)));
    }

    #[test]
    fn test_update_time_anchors_to_latest_pcr_not_first() {
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(1000));
        clock.update_pcr(Pcr42::new(1000).add_ms(2_000));
        clock.update_time(jst(12, 0, 0));

        assert_eq!(clock.now(), Some(jst(12, 0, 0)));
        assert_eq!(clock.convert_time_to_pcr(jst(12, 0, 0)), Some(Pcr42::new(1000).add_ms(2_000)));
    }

    #[test]
    fn test_backward_jump_needs_threshold_consecutive_gaps_to_resync() {
        let mut clock = Clock::new();
        clock.set_pid(0x100);
        clock.update_pcr(Pcr42::new(10_000));
        clock.update_time(jst(12, 0, 0));

        // Two backward jumps: not enough to resync yet.
        clock.update_pcr(Pcr42::new(5_000));
        clock.update_pcr(Pcr42::new(5_000));
        assert_eq!(clock.convert_time_to_pcr(jst(12, 0, 0)), Some(Pcr42::new(10_000)));

        // Third consecutive backward jump resyncs the baseline at the new tick.
        clock.update_pcr(Pcr42::new(5_000));
        assert_eq!(clock.convert_time_to_pcr(jst(12, 0, 0)), Some(Pcr42::new(5_000)));
    }
}
