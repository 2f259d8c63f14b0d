//! CLI errors

use std::io;
use std::path::PathBuf;

use bootrescue_sim::SimError;
use thiserror::Error;

/// Errors reported by the command line tool
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid layout file {}: {reason}", path.display())]
    LayoutFile { path: PathBuf, reason: String },

    #[error("layout rejected: {0}")]
    Layout(#[from] bootrescue_core::Error),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("terminal input: {0}")]
    Input(#[source] io::Error),
}
