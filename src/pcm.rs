//! PCM helpers shared by the capture, transport, and archive paths.
//!
//! Everything here is pure: linear-interpolation resampling plus the
//! float/int16 conversions the wire formats need. Speech snippets are short
//! enough that linear interpolation holds up fine against heavier filters.

/// Resample `input` from `src_rate` to `dst_rate` by linear interpolation.
///
/// Output length is `round(len * dst / src)`. Identity when the rates match,
/// when either rate is zero, or when the input is empty.
pub fn resample(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    // Guard rails
    if src_rate == 0 || dst_rate == 0 {
        return input.to_vec(); // avoid div-by-zero below
    }
    if input.is_empty() || src_rate == dst_rate {
        return input.to_vec();
    }

    let ratio = dst_rate as f64 / src_rate as f64;
    let output_len = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        if idx + 1 < input.len() {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            // Past the last pair: pad with the final sample.
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }

    output
}

/// Quantize float samples to signed 16-bit PCM.
///
/// Input is clamped to `[-1.0, 1.0]` first; negatives scale by 32768 and
/// positives by 32767 so neither rail can overflow. Non-finite samples from a
/// misbehaving device become silence rather than full-scale noise.
pub fn to_i16(input: &[f32]) -> Vec<i16> {
    input.iter().map(|&sample| quantize(sample)).collect()
}

/// Widen signed 16-bit PCM back to floats in `[-1.0, 1.0)`.
pub fn from_i16(input: &[i16]) -> Vec<f32> {
    input
        .iter()
        .map(|&sample| f32::from(sample) / 32_768.0)
        .collect()
}

/// Serialize 16-bit samples as the little-endian byte stream both wire
/// formats carry.
pub fn pcm16_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

fn quantize(sample: f32) -> i16 {
    if !sample.is_finite() {
        return 0;
    }
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32_768.0) as i16
    } else {
        (clamped * 32_767.0) as i16
    }
}
