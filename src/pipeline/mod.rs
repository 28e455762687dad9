// Transcoder pipeline module - process-pipe orchestration engine
//
// This module manages the two chained external transcoder processes and the
// worker threads that bridge a real-time audio callback to blocking
// subprocess I/O:
// - config: per-session configuration
// - command: fixed command-line skeletons for the encode/decode stages
// - pipe: shared diagnostic pipe allocation (platform seam)
// - process: process pair spawning, grouping and teardown
// - engine: public facade plus the three worker threads

pub mod command;
pub mod config;
pub mod engine;
pub mod pipe;
pub mod process;

// Re-export main public API
pub use config::PipelineConfig;
pub use engine::{CodecPipeline, LogSink, SessionState};
pub use process::TranscodeChain;
