// codec-audition - Real-time lossy codec preview
//
// Routes live PCM audio through a pair of chained external transcoder
// processes (encode -> decode) and streams the decoded result back with
// bounded caller-side latency. The caller-facing surface is non-blocking
// and safe to drive from a hard real-time audio callback; all blocking
// subprocess I/O happens on background worker threads.

pub mod codecs;
pub mod convert;
pub mod error;
pub mod pipeline;

// Re-export commonly used types for easier imports
pub use codecs::{CodecCaps, CodecRegistry};
pub use error::{PipelineError, Result};
pub use pipeline::{CodecPipeline, LogSink, PipelineConfig, SessionState};
