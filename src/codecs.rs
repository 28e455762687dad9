// Codec capability catalog
//
// Declarative per-codec records consumed when building a pipeline
// configuration. All codec-specific quirks (bitrate ranges, container tags,
// sample-rate restrictions, extra encoder flags) live here as data so the
// orchestrator itself never branches on codec identity. Availability is
// detected once by running `ffmpeg -encoders` and matching encoder names.

use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Capabilities of a single codec configuration
#[derive(Debug, Clone, Serialize)]
pub struct CodecCaps {
    /// Internal identifier: "mp3", "aac", "opus", ...
    pub id: &'static str,
    /// UI display name: "MP3", "AAC", "Opus", ...
    pub display_name: &'static str,
    /// FFmpeg encoder name: "libmp3lame", "aac", "libopus", ...
    pub encoder_name: &'static str,
    /// Container tag for encoder output (`-f` on the encode stage)
    pub muxer_format: &'static str,
    /// Container tag for decoder input (`-f` on the decode stage)
    pub demuxer_format: &'static str,
    /// Default bitrate in kbps
    pub default_bitrate: u32,
    /// Minimum bitrate in kbps
    pub min_bitrate: u32,
    /// Maximum bitrate in kbps
    pub max_bitrate: u32,
    /// Codec frame size in samples
    pub frame_size: u32,
    /// Extra encoder arguments, pre-tokenized
    pub extra_args: &'static [&'static str],
    /// Lossless codecs ignore bitrate control entirely
    pub is_lossless: bool,
    /// Sample rates the codec accepts; empty means any rate
    pub supported_sample_rates: &'static [u32],
    /// Detected at runtime via `ffmpeg -encoders`
    pub available: bool,
}

impl CodecCaps {
    /// Clamp a requested bitrate (kbps) into this codec's valid range.
    ///
    /// Lossless codecs return 0: bitrate control is disabled for them.
    pub fn snap_bitrate(&self, bitrate_kbps: u32) -> u32 {
        if self.is_lossless {
            return 0;
        }
        bitrate_kbps.clamp(self.min_bitrate, self.max_bitrate)
    }

    /// Pick the nearest sample rate the codec accepts.
    ///
    /// Returns the first supported rate at or above the request, falling back
    /// to the highest supported rate. Codecs with no restriction echo the
    /// request back.
    pub fn snap_sample_rate(&self, sample_rate: u32) -> u32 {
        if self.supported_sample_rates.is_empty() {
            return sample_rate;
        }
        self.supported_sample_rates
            .iter()
            .copied()
            .find(|&rate| rate >= sample_rate)
            .unwrap_or_else(|| *self.supported_sample_rates.last().unwrap())
    }
}

/// Fallback container tag derived from a codec/encoder name.
///
/// Used when a configuration carries no explicit container tags. `decode`
/// selects the demuxer side, where ADTS streams are read back as "aac".
pub fn fallback_container(codec_name: &str, decode: bool) -> &'static str {
    let tag = if codec_name.contains("mp3") || codec_name.contains("lame") {
        "mp3"
    } else if codec_name.contains("aac") {
        "adts"
    } else if codec_name.contains("opus") || codec_name.contains("vorbis") {
        "ogg"
    } else if codec_name.contains("flac") {
        "flac"
    } else {
        "wav"
    };
    if decode && tag == "adts" {
        "aac"
    } else {
        tag
    }
}

const MP3_SAMPLE_RATES: &[u32] = &[
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000,
];

fn builtin_codecs() -> Vec<CodecCaps> {
    let caps = |id,
                display_name,
                encoder_name,
                muxer_format,
                demuxer_format,
                default_bitrate,
                min_bitrate,
                max_bitrate,
                frame_size| CodecCaps {
        id,
        display_name,
        encoder_name,
        muxer_format,
        demuxer_format,
        default_bitrate,
        min_bitrate,
        max_bitrate,
        frame_size,
        extra_args: &[],
        is_lossless: false,
        supported_sample_rates: &[],
        available: false,
    };

    vec![
        CodecCaps {
            supported_sample_rates: MP3_SAMPLE_RATES,
            ..caps("mp3", "MP3", "libmp3lame", "mp3", "mp3", 128, 8, 320, 1152)
        },
        caps("aac", "AAC", "aac", "adts", "aac", 128, 32, 512, 1024),
        CodecCaps {
            extra_args: &["-profile:a", "aac_he", "-afterburner", "1"],
            ..caps("heaac", "HE-AAC", "libfdk_aac", "adts", "aac", 64, 24, 128, 1024)
        },
        caps("opus", "Opus", "libopus", "ogg", "ogg", 128, 6, 510, 960),
        caps("vorbis", "Vorbis", "libvorbis", "ogg", "ogg", 128, 64, 500, 1024),
        caps("ac3", "AC-3", "ac3", "ac3", "ac3", 192, 32, 640, 1536),
        caps("eac3", "E-AC-3", "eac3", "eac3", "eac3", 192, 32, 6144, 1536),
        CodecCaps {
            is_lossless: true,
            ..caps("flac", "FLAC", "flac", "flac", "flac", 0, 0, 0, 4096)
        },
        caps("mp2", "MP2", "libtwolame", "mp2", "mp3", 192, 64, 384, 1152),
        caps("wma", "WMA v2", "wmav2", "asf", "asf", 128, 32, 192, 2048),
        caps("alaw", "G.711 A-law", "pcm_alaw", "wav", "wav", 64, 64, 64, 160),
        caps("mulaw", "G.711 mu-law", "pcm_mulaw", "wav", "wav", 64, 64, 64, 160),
        caps("speex", "Speex", "libspeex", "ogg", "ogg", 24, 2, 44, 320),
        caps("gsm", "GSM 06.10", "libgsm", "gsm", "gsm", 13, 13, 13, 160),
    ]
}

/// Registry of all supported codecs, injected into configurations explicitly
/// rather than held as process-wide state.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    codecs: Vec<CodecCaps>,
    detected: bool,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: builtin_codecs(),
            detected: false,
        }
    }

    /// Detect available codecs by running `ffmpeg -encoders` once.
    pub fn detect_available(&mut self, ffmpeg_path: &Path) -> Result<()> {
        let output = Command::new(ffmpeg_path)
            .arg("-hide_banner")
            .arg("-encoders")
            .output()
            .with_context(|| format!("failed to run {} -encoders", ffmpeg_path.display()))?;

        let listing = String::from_utf8_lossy(&output.stdout);
        for codec in &mut self.codecs {
            codec.available = listing.contains(codec.encoder_name);
            debug!(
                codec = codec.display_name,
                encoder = codec.encoder_name,
                available = codec.available,
                "encoder detection"
            );
        }
        self.detected = true;

        let count = self.codecs.iter().filter(|c| c.available).count();
        if count == 0 {
            warn!("no usable encoders reported by {}", ffmpeg_path.display());
        } else {
            info!("{} codecs available via {}", count, ffmpeg_path.display());
        }
        Ok(())
    }

    /// All registered codecs, including unavailable ones.
    pub fn all(&self) -> &[CodecCaps] {
        &self.codecs
    }

    /// Only codecs detected as available.
    pub fn available(&self) -> impl Iterator<Item = &CodecCaps> {
        self.codecs.iter().filter(|c| c.available)
    }

    /// Look up a codec by internal id.
    pub fn by_id(&self, id: &str) -> Option<&CodecCaps> {
        self.codecs.iter().find(|c| c.id == id)
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_builtin_codecs() {
        let registry = CodecRegistry::new();
        assert!(registry.by_id("mp3").is_some());
        assert!(registry.by_id("opus").is_some());
        assert!(registry.by_id("nonexistent").is_none());
        assert!(!registry.is_detected());
    }

    #[test]
    fn test_bitrate_snapping_stays_in_range() {
        let registry = CodecRegistry::new();
        let mp3 = registry.by_id("mp3").unwrap();
        assert_eq!(mp3.snap_bitrate(4), 8);
        assert_eq!(mp3.snap_bitrate(128), 128);
        assert_eq!(mp3.snap_bitrate(999), 320);
    }

    #[test]
    fn test_lossless_codec_disables_bitrate() {
        let registry = CodecRegistry::new();
        let flac = registry.by_id("flac").unwrap();
        assert!(flac.is_lossless);
        assert_eq!(flac.snap_bitrate(128), 0);
    }

    #[test]
    fn test_mp3_sample_rate_snapping() {
        let registry = CodecRegistry::new();
        let mp3 = registry.by_id("mp3").unwrap();
        assert_eq!(mp3.snap_sample_rate(44100), 44100);
        assert_eq!(mp3.snap_sample_rate(44000), 44100);
        assert_eq!(mp3.snap_sample_rate(96000), 48000);
        assert_eq!(mp3.snap_sample_rate(7000), 8000);
    }

    #[test]
    fn test_unrestricted_sample_rate_passthrough() {
        let registry = CodecRegistry::new();
        let opus = registry.by_id("opus").unwrap();
        assert_eq!(opus.snap_sample_rate(96000), 96000);
    }

    #[cfg(unix)]
    #[test]
    fn test_detection_marks_listed_encoders() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ffmpeg-stub");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "#!/bin/sh\necho ' A....D libmp3lame  MP3 (MPEG audio layer 3)'\n\
             echo ' A....D libopus     Opus'"
        )
        .unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        drop(file); // close the write handle so exec doesn't hit ETXTBSY

        let mut registry = CodecRegistry::new();
        registry.detect_available(&path).unwrap();
        assert!(registry.is_detected());
        assert!(registry.by_id("mp3").unwrap().available);
        assert!(registry.by_id("opus").unwrap().available);
        assert!(!registry.by_id("flac").unwrap().available);
        assert_eq!(registry.available().count(), 2);
    }

    #[test]
    fn test_detection_fails_for_missing_executable() {
        let mut registry = CodecRegistry::new();
        assert!(registry
            .detect_available(Path::new("/nonexistent/ffmpeg"))
            .is_err());
        assert!(!registry.is_detected());
    }

    #[test]
    fn test_fallback_container_mapping() {
        assert_eq!(fallback_container("libmp3lame", false), "mp3");
        assert_eq!(fallback_container("aac", false), "adts");
        assert_eq!(fallback_container("aac", true), "aac");
        assert_eq!(fallback_container("libopus", false), "ogg");
        assert_eq!(fallback_container("libvorbis", true), "ogg");
        assert_eq!(fallback_container("flac", false), "flac");
        assert_eq!(fallback_container("something_else", false), "wav");
    }
}
