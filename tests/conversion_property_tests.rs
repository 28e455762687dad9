// Property tests for the f32 <-> s16le sample conversion layer.

use proptest::prelude::*;

use codec_audition::convert::{float_to_s16le_bytes, s16le_bytes_to_float, BYTES_PER_SAMPLE};

fn roundtrip(samples: &[f32]) -> Vec<f32> {
    let mut bytes = Vec::new();
    float_to_s16le_bytes(samples, &mut bytes);
    let mut back = Vec::new();
    s16le_bytes_to_float(&bytes, &mut back);
    back
}

proptest! {
    #[test]
    fn roundtrip_error_within_one_lsb(sample in -1.0f32..=1.0f32) {
        let back = roundtrip(&[sample]);
        prop_assert!((back[0] - sample).abs() <= 1.0 / 32768.0);
    }

    #[test]
    fn any_finite_input_lands_in_range(sample in proptest::num::f32::NORMAL) {
        let back = roundtrip(&[sample]);
        prop_assert!(back[0] >= -1.0 && back[0] <= 1.0);
    }

    #[test]
    fn byte_length_matches_sample_count(samples in proptest::collection::vec(-1.0f32..=1.0f32, 0..512)) {
        let mut bytes = Vec::new();
        float_to_s16le_bytes(&samples, &mut bytes);
        prop_assert_eq!(bytes.len(), samples.len() * BYTES_PER_SAMPLE);

        let back = roundtrip(&samples);
        prop_assert_eq!(back.len(), samples.len());
    }

    #[test]
    fn conversion_is_monotonic(a in -1.0f32..=1.0f32, b in -1.0f32..=1.0f32) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let back = roundtrip(&[lo, hi]);
        prop_assert!(back[0] <= back[1]);
    }
}
