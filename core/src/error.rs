use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("invalid range {start}..{end}: {reason}")]
    InvalidRange { start: String, end: String, reason: String },

    #[error("cannot read range file {path}: {reason}")]
    RangeFile { path: PathBuf, reason: String },

    #[error("cannot read target file {path}: {reason}")]
    TargetFile { path: PathBuf, reason: String },

    #[error("cannot open output {path}: {source}")]
    Output { path: PathBuf, source: io::Error },

    #[error("output write failed: {0}")]
    OutputWrite(#[from] csv::Error),

    #[error("checkpoint write to {path} failed: {source}")]
    CheckpointWrite { path: PathBuf, source: io::Error },

    #[error("result sink stopped unexpectedly: {0}")]
    SinkTask(String),
}

impl SweepError {
    /// Input errors abort before any scanning starts.
    pub fn is_input(&self) -> bool {
        matches!(self, SweepError::InvalidRange { .. } | SweepError::RangeFile { .. } | SweepError::TargetFile { .. })
    }
}
