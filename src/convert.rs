// Sample format conversion between f32 and interleaved signed 16-bit PCM
//
// The external transcoder processes speak raw little-endian s16 on their
// standard streams; the audio callback speaks f32 in [-1.0, 1.0]. These
// helpers are stateless and allocation-reusing so the worker threads can
// call them per batch without churn.

/// Bytes per sample on the wire (s16le).
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Convert f32 samples to s16le bytes, appending to `out`.
///
/// Each sample is clamped to [-1.0, 1.0], scaled by 32767 and truncated.
pub fn float_to_s16le_bytes(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = (clamped * 32767.0) as i32 as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Convert s16le bytes back to f32 samples, appending to `out`.
///
/// `bytes.len()` must be a multiple of two; the caller is responsible for
/// frame alignment. 16-bit to float uses `value / 32768.0`.
pub fn s16le_bytes_to_float(bytes: &[u8], out: &mut Vec<f32>) {
    debug_assert!(bytes.len() % BYTES_PER_SAMPLE == 0);
    out.reserve(bytes.len() / BYTES_PER_SAMPLE);
    for pair in bytes.chunks_exact(BYTES_PER_SAMPLE) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        out.push(value as f32 / 32768.0);
    }
}
