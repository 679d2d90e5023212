//! Top-level CLI error, mapping any failure to one of the two nonzero
//! exit codes the command line contract promises: 1 for usage/I-O errors,
//! 2 for a `verify` signature mismatch.

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("usage error: {message}"))]
    Usage { message: String },

    #[snafu(display("{source}"))]
    Engine { source: zipstore_buffers::Error },

    #[snafu(display("io error on {path}: {source}"))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("csv error: {source}"))]
    Csv { source: csv::Error },

    #[snafu(display("DIFFER"))]
    VerifyMismatch,
}

impl CliError {
    /// The process exit code this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::VerifyMismatch => 2,
            _ => 1,
        }
    }
}

impl From<zipstore_buffers::Error> for CliError {
    fn from(source: zipstore_buffers::Error) -> Self {
        CliError::Engine { source }
    }
}

impl From<csv::Error> for CliError {
    fn from(source: csv::Error) -> Self {
        CliError::Csv { source }
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;
