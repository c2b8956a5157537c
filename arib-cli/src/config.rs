//! Converts parsed [`crate::cli::Command`] variants into the option structs
//! each `arib-filters` type expects: unix-ms timestamps become JST
//! `NaiveDateTime`s, repeated `--sids`/`--xsid` become `SidSet`s, and
//! `--video-tags`/`--audio-tags` become parsed `Vec<u8>` allow-lists.
//! Assembled here in one place rather than scattered across the processor.

use arib_filters::{AirtimeTrackerOptions, EitCollectorOptions, EitpfCollectorOptions, PcrSynchronizerOptions,
    ProgramFilterOptions, ServiceFilterOptions, ServiceRecorderOptions, ServiceScannerOptions, StartSeekerOptions};
use ts::SidSet;

use crate::cli::SidFilterArgs;
use crate::utils::parse_hex_tags;

fn unix_ms_to_jst(unix_ms: i64) -> anyhow::Result<chrono::NaiveDateTime> {
    ts::time::unix_ms_to_jst(unix_ms).ok_or_else(|| anyhow::anyhow!("unix-ms timestamp out of range: {unix_ms}"))
}

fn build_sidset<I: IntoIterator<Item = u16>>(values: I) -> SidSet {
    values.into_iter().collect()
}

pub fn sids_xsids(args: &SidFilterArgs) -> (SidSet, SidSet) {
    (build_sidset(args.sids.iter().copied()), build_sidset(args.xsid.iter().copied()))
}

pub fn service_scanner_options(args: &SidFilterArgs) -> ServiceScannerOptions {
    let (sids, xsids) = sids_xsids(args);
    ServiceScannerOptions { sids, xsids }
}

pub fn pcr_synchronizer_options(args: &SidFilterArgs) -> PcrSynchronizerOptions {
    let (sids, xsids) = sids_xsids(args);
    PcrSynchronizerOptions { sids, xsids }
}

pub fn eit_collector_options(args: &SidFilterArgs) -> EitCollectorOptions {
    let (_, xsids) = sids_xsids(args);
    EitCollectorOptions { xsids }
}

pub fn eitpf_collector_options(
    args: &SidFilterArgs,
    streaming: bool,
    present: bool,
    following: bool,
) -> EitpfCollectorOptions {
    let (sids, _) = sids_xsids(args);
    // `--present`/`--following` default to on; passing either alone
    // disables the other, per the common flag convention described in
    // `cli.rs`.
    let (present, following) = match (present, following) {
        (false, false) => (true, true),
        other => other,
    };
    EitpfCollectorOptions { sids, streaming, present, following }
}

pub fn airtime_tracker_options(sid: u16, eid: u16) -> AirtimeTrackerOptions {
    AirtimeTrackerOptions { service_id: sid, event_id: eid }
}

pub fn service_filter_options(sid: u16, time_limit: Option<i64>) -> anyhow::Result<ServiceFilterOptions> {
    let time_limit = time_limit.map(unix_ms_to_jst).transpose()?;
    Ok(ServiceFilterOptions { service_id: sid, time_limit })
}

#[allow(clippy::too_many_arguments)]
pub fn program_filter_options(
    sid: u16,
    eid: u16,
    clock_pid: u16,
    clock_pcr: i64,
    clock_time: i64,
    start_margin: i64,
    end_margin: i64,
    pre_streaming: bool,
    wait_until: Option<i64>,
    video_tags: Option<&str>,
    audio_tags: Option<&str>,
) -> anyhow::Result<ProgramFilterOptions> {
    Ok(ProgramFilterOptions {
        service_id: sid,
        event_id: eid,
        clock_pid,
        clock_pcr: ts::Pcr42::new(clock_pcr),
        clock_time: unix_ms_to_jst(clock_time)?,
        start_margin_ms: start_margin,
        end_margin_ms: end_margin,
        pre_streaming,
        wait_until: wait_until.map(unix_ms_to_jst).transpose()?,
        video_component_tag_allowlist: video_tags.map(parse_hex_tags).transpose()?.unwrap_or_default(),
        audio_component_tag_allowlist: audio_tags.map(parse_hex_tags).transpose()?.unwrap_or_default(),
    })
}

pub fn start_seeker_options(sid: u16, max_duration: Option<i64>, max_packets: Option<usize>) -> StartSeekerOptions {
    StartSeekerOptions { service_id: sid, max_packets, max_duration_ms: max_duration }
}

pub fn service_recorder_options(sid: u16, start_pos: u64) -> ServiceRecorderOptions {
    ServiceRecorderOptions { service_id: sid, start_pos }
}
