//! CLI-level configuration errors. Everything downstream of option parsing
//! (`ts::TsError`, `arib_filters::FilterError`, `pipeline_arib::PipelineError`)
//! propagates through `anyhow` at the `main()` boundary and is treated as a
//! fatal configuration error: exit 1.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{subcommand} is not implemented in this build")]
    NotImplemented { subcommand: &'static str },

    #[error("failed to open ring file {path}: {source}")]
    RingFile { path: String, source: std::io::Error },
}
