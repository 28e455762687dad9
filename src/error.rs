// Error definitions for the transcoder pipeline

use std::io;

/// Errors that can occur while orchestrating the transcoder chain
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to create diagnostic pipe: {0}")]
    PipeCreation(#[source] io::Error),

    #[error("Failed to launch {stage} process: {source}")]
    ProcessLaunch {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Transport broken: {0}")]
    BrokenTransport(String),

    #[error("Pipeline already running")]
    AlreadyRunning,

    #[error("Pipeline not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
