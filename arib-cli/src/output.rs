//! Stdin/stdout wiring shared by every subcommand's processor: every
//! subcommand writes exactly one of "raw TS bytes" or "one JSON document
//! per line" to stdout.

use std::io::{self, BufReader, Stdin};

use ts::source::FileTsSource;

/// Input is always stdin in this build: the ring recorder reads the live
/// input stream, not a file, and `--file` is reserved for `record-service`'s
/// output ring file.
pub fn stdin_source() -> FileTsSource<BufReader<Stdin>> {
    FileTsSource::new(BufReader::new(io::stdin()))
}

pub fn stdout() -> io::Stdout {
    io::stdout()
}
