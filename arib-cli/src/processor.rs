//! Per-subcommand drivers: build the right `arib-filters` stage from parsed
//! options, then push packets through it with `pipeline_arib::run_pipeline`,
//! adapting each stage's bespoke `FilterAction`/`Vec<Value>` return shape
//! into the driver's [`Outcome`] and the appropriate sink.

use anyhow::Context;
use arib_filters::program_filter::FilterAction as ProgramFilterAction;
use arib_filters::service_filter::FilterAction as ServiceFilterAction;
use arib_filters::start_seeker::FilterAction as StartSeekerAction;
use arib_filters::{AirtimeTracker, EitCollector, EitpfCollector, PcrSynchronizer, ProgramFilter,
    ProgramMetadataCollector, RingFileSink, ServiceFilter, ServiceRecorder, ServiceScanner, StartSeeker,
    DEFAULT_BUFFER_SIZE};
use pipeline_arib::{run_pipeline, JsonConsumer, JsonlSink, Outcome, StdoutPacketSink, EXIT_SUCCESS};
use serde_json::Value;

use crate::cli::SidFilterArgs;
use crate::config;
use crate::error::CliError;
use crate::output;

fn emit(sink: &mut JsonlSink<impl std::io::Write>, docs: impl IntoIterator<Item = Value>) -> pipeline_arib::Result<()> {
    for doc in docs {
        sink.handle_document(&doc)?;
    }
    Ok(())
}

pub fn scan_services(args: &SidFilterArgs) -> anyhow::Result<i32> {
    let mut scanner = ServiceScanner::new(config::service_scanner_options(args));
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    run_pipeline(&mut source, |packet| {
        scanner.handle_packet(packet);
        if scanner.result().is_some() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    if let Some(result) = scanner.result() {
        emit(&mut sink, [result])?;
    }
    sink.end()?;
    Ok(EXIT_SUCCESS)
}

pub fn sync_clocks(args: &SidFilterArgs) -> anyhow::Result<i32> {
    let mut synchronizer = PcrSynchronizer::new(config::pcr_synchronizer_options(args));
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    run_pipeline(&mut source, |packet| {
        synchronizer.handle_packet(packet);
        if synchronizer.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    if let Some(result) = synchronizer.result() {
        emit(&mut sink, [result])?;
    }
    sink.end()?;
    Ok(EXIT_SUCCESS)
}

pub fn collect_eits(args: &SidFilterArgs) -> anyhow::Result<i32> {
    let mut collector = EitCollector::new(config::eit_collector_options(args));
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| {
        let docs = collector.handle_packet(packet);
        emit(&mut sink, docs)?;
        if collector.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    sink.end()?;
    Ok(code)
}

pub fn collect_eitpf(args: &SidFilterArgs, streaming: bool, present: bool, following: bool) -> anyhow::Result<i32> {
    let options = config::eitpf_collector_options(args, streaming, present, following);
    let mut collector = EitpfCollector::new(options);
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| {
        let docs = collector.handle_packet(packet);
        emit(&mut sink, docs)?;
        if collector.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    sink.end()?;
    Ok(code)
}

pub fn collect_program_metadata(args: &SidFilterArgs) -> anyhow::Result<i32> {
    let (_, xsids) = config::sids_xsids(args);
    let mut collector = ProgramMetadataCollector::new(xsids);
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| {
        let docs = collector.handle_packet(packet);
        emit(&mut sink, docs)?;
        if collector.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    sink.end()?;
    Ok(code)
}

pub fn track_airtime(sid: u16, eid: u16) -> anyhow::Result<i32> {
    let mut tracker = AirtimeTracker::new(config::airtime_tracker_options(sid, eid));
    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| {
        tracker.handle_packet(packet);
        if let Some(result) = tracker.take_result() {
            emit(&mut sink, [result])?;
        }
        if tracker.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    sink.end()?;
    Ok(code)
}

pub fn filter_service(sid: u16, time_limit: Option<i64>) -> anyhow::Result<i32> {
    let options = config::service_filter_options(sid, time_limit)?;
    let mut filter = ServiceFilter::new(options);
    let mut source = output::stdin_source();
    let mut sink = StdoutPacketSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| match filter.handle_packet(packet) {
        ServiceFilterAction::Drop => Ok(Outcome::Continue),
        ServiceFilterAction::Forward(pkt) => {
            sink.handle_packet(&pkt)?;
            Ok(Outcome::Continue)
        }
        ServiceFilterAction::Stop => Ok(Outcome::Stop),
    })?;

    sink.end()?;
    Ok(if sink.exit_code() != EXIT_SUCCESS { sink.exit_code() } else { code })
}

#[allow(clippy::too_many_arguments)]
pub fn filter_program(
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
) -> anyhow::Result<i32> {
    let options = config::program_filter_options(
        sid, eid, clock_pid, clock_pcr, clock_time, start_margin, end_margin, pre_streaming, wait_until, video_tags,
        audio_tags,
    )?;
    let mut filter = ProgramFilter::new(options);
    let mut source = output::stdin_source();
    let mut sink = StdoutPacketSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| match filter.handle_packet(packet) {
        ProgramFilterAction::Drop => Ok(Outcome::Continue),
        ProgramFilterAction::Forward(packets) => {
            for pkt in packets {
                sink.handle_packet(&pkt)?;
            }
            Ok(Outcome::Continue)
        }
        ProgramFilterAction::Stop => Ok(Outcome::Stop),
        ProgramFilterAction::Retry => Ok(Outcome::Retry),
    })?;

    sink.end()?;
    Ok(if sink.exit_code() != EXIT_SUCCESS { sink.exit_code() } else { code })
}

pub fn seek_start(sid: u16, max_duration: Option<i64>, max_packets: Option<usize>) -> anyhow::Result<i32> {
    let options = config::start_seeker_options(sid, max_duration, max_packets);
    let mut seeker = StartSeeker::new(options);
    let mut source = output::stdin_source();
    let mut sink = StdoutPacketSink::new(output::stdout());

    let code = run_pipeline(&mut source, |packet| match seeker.handle_packet(packet) {
        StartSeekerAction::Buffering => Ok(Outcome::Continue),
        StartSeekerAction::Flush(packets) => {
            for pkt in packets {
                sink.handle_packet(&pkt)?;
            }
            Ok(Outcome::Continue)
        }
        StartSeekerAction::Forward(pkt) => {
            sink.handle_packet(&pkt)?;
            Ok(Outcome::Continue)
        }
    })?;

    sink.end()?;
    Ok(if sink.exit_code() != EXIT_SUCCESS { sink.exit_code() } else { code })
}

pub fn record_service(
    sid: u16,
    file: &std::path::Path,
    chunk_size: u64,
    num_chunks: u64,
    start_pos: u64,
) -> anyhow::Result<i32> {
    let backing = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(file)
        .map_err(|source| CliError::RingFile { path: file.display().to_string(), source })
        .context("opening ring file")?;
    let ring = RingFileSink::new(backing, DEFAULT_BUFFER_SIZE, chunk_size, num_chunks)?;

    let options = config::service_recorder_options(sid, start_pos);
    let (mut recorder, start_message) = ServiceRecorder::new(options, ring)?;

    let mut source = output::stdin_source();
    let mut sink = JsonlSink::new(output::stdout());
    emit(&mut sink, [start_message])?;

    let code = run_pipeline(&mut source, |packet| {
        let messages = recorder.handle_packet(packet);
        emit(&mut sink, messages)?;
        if recorder.is_done() { Ok(Outcome::Stop) } else { Ok(Outcome::Continue) }
    })?;

    if let Some(stop_message) = recorder.end() {
        emit(&mut sink, [stop_message])?;
    }
    sink.end()?;
    Ok(code)
}

pub fn not_implemented(subcommand: &'static str) -> anyhow::Result<i32> {
    Err(CliError::NotImplemented { subcommand }.into())
}
