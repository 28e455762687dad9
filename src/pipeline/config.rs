// Pipeline session configuration
//
// A configuration is immutable for the lifetime of one session; changing any
// field requires a full stop + start of the pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codecs::{fallback_container, CodecCaps};
use crate::error::{PipelineError, Result};

/// Configuration for one transcoder chain session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the transcoder executable (ffmpeg)
    pub ffmpeg_path: PathBuf,
    /// Separate executable for the decode stage; `None` reuses `ffmpeg_path`
    #[serde(default)]
    pub decoder_path: Option<PathBuf>,
    /// FFmpeg encoder name, e.g. "libmp3lame"
    pub codec_name: String,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Bitrate in bits per second
    pub bitrate: u32,
    /// Extra encoder arguments appended after `-b:a`
    pub extra_args: Vec<String>,
    /// Container tag for the encoder output; empty = derive from codec name
    pub muxer_format: String,
    /// Container tag for the decoder input; empty = derive from codec name
    pub demuxer_format: String,
    /// Chunk size in bytes for pipe reads and writes
    pub chunk_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            decoder_path: None,
            codec_name: "libmp3lame".to_string(),
            sample_rate: 48000,
            channels: 2,
            bitrate: 128_000,
            extra_args: Vec::new(),
            muxer_format: String::new(),
            demuxer_format: String::new(),
            chunk_size: 65536,
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from a codec capability record, snapping the
    /// requested parameters into the codec's accepted ranges.
    pub fn from_caps(caps: &CodecCaps, sample_rate: u32, channels: u16, bitrate_kbps: u32) -> Self {
        Self {
            codec_name: caps.encoder_name.to_string(),
            sample_rate: caps.snap_sample_rate(sample_rate),
            channels,
            bitrate: caps.snap_bitrate(bitrate_kbps) * 1000,
            extra_args: caps.extra_args.iter().map(|s| s.to_string()).collect(),
            muxer_format: caps.muxer_format.to_string(),
            demuxer_format: caps.demuxer_format.to_string(),
            ..Self::default()
        }
    }

    /// Executable for the decode stage, falling back to the shared
    /// transcoder path.
    pub fn decoder_executable(&self) -> &Path {
        self.decoder_path.as_deref().unwrap_or(&self.ffmpeg_path)
    }

    /// Container tag for the encode stage, with fallback derivation.
    pub fn encoder_container(&self) -> String {
        if self.muxer_format.is_empty() {
            fallback_container(&self.codec_name, false).to_string()
        } else {
            self.muxer_format.clone()
        }
    }

    /// Container tag for the decode stage, with fallback derivation.
    pub fn decoder_container(&self) -> String {
        if self.demuxer_format.is_empty() {
            fallback_container(&self.codec_name, true).to_string()
        } else {
            self.demuxer_format.clone()
        }
    }

    /// Bytes per interleaved multi-channel sample frame on the wire.
    pub fn frame_bytes(&self) -> usize {
        crate::convert::BYTES_PER_SAMPLE * self.channels as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.codec_name.is_empty() {
            return Err(PipelineError::InvalidConfig("codec name is empty".into()));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfig("sample rate is zero".into()));
        }
        if self.channels == 0 {
            return Err(PipelineError::InvalidConfig("channel count is zero".into()));
        }
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig("chunk size is zero".into()));
        }
        Ok(())
    }
}
