//! Command-line surface: one subcommand per invocation, each matching the
//! options a single filter/collector stage needs to construct itself.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "arib-cli", about = "Filter and collect ARIB-profile MPEG-2 transport streams")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Service ID selection and exclusion, shared by every collector that scopes
/// itself to a subset of the services on the multiplex.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SidFilterArgs {
    /// Inclusion list of service IDs. Repeatable. Empty means "all".
    #[arg(long = "sids", value_name = "u16")]
    pub sids: Vec<u16>,

    /// Exclusion list of service IDs. Repeatable.
    #[arg(long = "xsid", value_name = "u16")]
    pub xsid: Vec<u16>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Wait for PAT, SDT, and NIT, then emit one JSON array of service
    /// entries and exit.
    ScanServices {
        #[command(flatten)]
        sid_filter: SidFilterArgs,
    },

    /// Collect EIT schedule (table IDs 0x50-0x5F) sections until every
    /// basic and extra sub-table is seen for every included service.
    CollectEits {
        #[command(flatten)]
        sid_filter: SidFilterArgs,
    },

    /// Collect EIT present/following sections.
    CollectEitpf {
        #[command(flatten)]
        sid_filter: SidFilterArgs,

        /// Keep running indefinitely instead of stopping once every
        /// included service's present/following has been seen once.
        #[arg(long)]
        streaming: bool,

        /// Collect present (section_number 0) sections. Both `--present`
        /// and `--following` default to on; passing either alone disables
        /// the other.
        #[arg(long)]
        present: bool,

        /// Collect following (section_number 1) sections.
        #[arg(long)]
        following: bool,
    },

    /// Extract logo images from CDT sections. Not implemented in this
    /// build: `collect-logos` is a self-contained utility with its own
    /// output format, kept out of this tool's scope.
    CollectLogos,

    /// Demux one PCR sample per qualifying service plus the current JST
    /// time, then emit one JSON array document and exit.
    SyncClocks {
        #[command(flatten)]
        sid_filter: SidFilterArgs,
    },

    /// Track a single (sid, eid)'s airtime via EIT p/f, emitting updates
    /// until the event can no longer be found.
    TrackAirtime {
        #[arg(long)]
        sid: u16,

        #[arg(long)]
        eid: u16,
    },

    /// Forward only the packets belonging to one service, rewriting PAT/PMT
    /// in place.
    FilterService {
        #[arg(long)]
        sid: u16,

        /// JST wall-clock time after which streaming stops. Unix
        /// milliseconds.
        #[arg(long = "time-limit", value_name = "unix-ms")]
        time_limit: Option<i64>,
    },

    /// Forward only the packets belonging to one program (service + event),
    /// using a PCR baseline to bound start/end.
    FilterProgram {
        #[arg(long)]
        sid: u16,

        #[arg(long)]
        eid: u16,

        #[arg(long = "clock-pid", value_name = "pid")]
        clock_pid: u16,

        #[arg(long = "clock-pcr", value_name = "u64")]
        clock_pcr: i64,

        #[arg(long = "clock-time", value_name = "unix-ms")]
        clock_time: i64,

        #[arg(long = "start-margin", value_name = "ms", default_value_t = 0)]
        start_margin: i64,

        #[arg(long = "end-margin", value_name = "ms", default_value_t = 0)]
        end_margin: i64,

        /// Do not buffer PAT before start_pcr; forward it immediately.
        #[arg(long = "pre-streaming")]
        pre_streaming: bool,

        /// Retry-timeout in WaitReady: unix-ms after which the filter gives
        /// up and exits 222 instead of blocking forever.
        #[arg(long = "wait-until", value_name = "unix-ms")]
        wait_until: Option<i64>,

        #[arg(long = "video-tags", value_name = "hex,hex,...")]
        video_tags: Option<String>,

        #[arg(long = "audio-tags", value_name = "hex,hex,...")]
        audio_tags: Option<String>,
    },

    /// Buffer packets until the transport settles on a stable video/audio
    /// PID set, then flush a clean start (PAT replay + tail) and pass
    /// through.
    SeekStart {
        #[arg(long)]
        sid: u16,

        #[arg(long = "max-duration", value_name = "ms")]
        max_duration: Option<i64>,

        #[arg(long = "max-packets", value_name = "n")]
        max_packets: Option<usize>,
    },

    /// Record one service's packets into a ring file, emitting JSON
    /// lifecycle messages on stdout.
    RecordService {
        #[arg(long)]
        sid: u16,

        #[arg(long)]
        file: PathBuf,

        #[arg(long = "chunk-size", value_name = "bytes")]
        chunk_size: u64,

        #[arg(long = "num-chunks", value_name = "n")]
        num_chunks: u64,

        #[arg(long = "start-pos", value_name = "bytes", default_value_t = 0)]
        start_pos: u64,
    },

    /// Collect EIT schedule events, emitting one JSON document per fully
    /// collected event rather than per section.
    CollectProgramMetadata {
        #[command(flatten)]
        sid_filter: SidFilterArgs,
    },

    /// Dump PES packet headers for one PID. Not implemented in this build:
    /// a diagnostic tool with no downstream consumer of its output.
    PrintPes,

    /// Dump the EIT schedule as a human-readable timetable. Not implemented
    /// in this build: a diagnostic tool with no downstream consumer of its
    /// output.
    PrintTimetable,
}
