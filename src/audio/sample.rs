//! Sample conversions and the stereo-to-mono fader law.

use crate::config::MAX_FADER;

/// Round to the nearest integer (ties away from zero) and saturate to the
/// `i16` range.
#[inline]
pub fn to_i16(sample: f64) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    sample
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Attenuation applied to the non-base channel for a fader position.
///
/// Triangular: 1.0 at the centre, falling linearly to 0.0 at both ends.
pub fn fader_attenuation(fader: u32) -> f64 {
    let mid = (MAX_FADER / 2) as i64;
    let fader = fader.min(MAX_FADER) as i64;
    (mid - (mid - fader).abs()) as f64 / mid as f64
}

/// Mix both channels into `out` according to the fader position.
///
/// Above the centre the left channel is the base and the right one is
/// attenuated, at or below the centre it is the other way round.
pub fn fader_mix(left: &[f64], right: &[f64], fader: u32, out: &mut [i16]) {
    let att = fader_attenuation(fader);
    let left_is_base = fader > MAX_FADER / 2;

    for ((dst, &l), &r) in out.iter_mut().zip(left).zip(right) {
        let mixed = if left_is_base { l + att * r } else { r + att * l };
        *dst = to_i16(mixed);
    }
}

/// Split one interleaved stereo block into its two channels.
pub fn deinterleave(interleaved: &[i16], left: &mut [f64], right: &mut [f64]) {
    for (i, frame) in interleaved.chunks_exact(2).enumerate().take(left.len()) {
        left[i] = frame[0] as f64;
        right[i] = frame[1] as f64;
    }
}

/// Merge two channels into one interleaved stereo block.
pub fn interleave(left: &[f64], right: &[f64], interleaved: &mut [i16]) {
    for ((frame, &l), &r) in interleaved.chunks_exact_mut(2).zip(left).zip(right) {
        frame[0] = to_i16(l);
        frame[1] = to_i16(r);
    }
}
