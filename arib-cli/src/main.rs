//! Entry point: parse one subcommand, run its pipeline, translate the
//! result into a process exit code.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

mod cli;
mod config;
mod error;
mod output;
mod processor;
mod utils;

use cli::{Cli, Command};

fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::ScanServices { sid_filter } => processor::scan_services(&sid_filter),
        Command::SyncClocks { sid_filter } => processor::sync_clocks(&sid_filter),
        Command::CollectEits { sid_filter } => processor::collect_eits(&sid_filter),
        Command::CollectEitpf { sid_filter, streaming, present, following } => {
            processor::collect_eitpf(&sid_filter, streaming, present, following)
        }
        Command::CollectProgramMetadata { sid_filter } => processor::collect_program_metadata(&sid_filter),
        Command::TrackAirtime { sid, eid } => processor::track_airtime(sid, eid),
        Command::FilterService { sid, time_limit } => processor::filter_service(sid, time_limit),
        Command::FilterProgram {
            sid,
            eid,
            clock_pid,
            clock_pcr,
            clock_time,
            start_margin,
            end_margin,
            pre_streaming,
            wait_until,
            video_tags,
            audio_tags,
        } => processor::filter_program(
            sid,
            eid,
            clock_pid,
            clock_pcr,
            clock_time,
            start_margin,
            end_margin,
            pre_streaming,
            wait_until,
            video_tags.as_deref(),
            audio_tags.as_deref(),
        ),
        Command::SeekStart { sid, max_duration, max_packets } => processor::seek_start(sid, max_duration, max_packets),
        Command::RecordService { sid, file, chunk_size, num_chunks, start_pos } => {
            processor::record_service(sid, &file, chunk_size, num_chunks, start_pos)
        }
        Command::CollectLogos => processor::not_implemented("collect-logos"),
        Command::PrintPes => processor::not_implemented("print-pes"),
        Command::PrintTimetable => processor::not_implemented("print-timetable"),
    }
}

fn main() -> ExitCode {
    utils::init_logging();

    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            error!(error = %err, "fatal error");
            ExitCode::from(pipeline_arib::EXIT_FAILURE as u8)
        }
    }
}
