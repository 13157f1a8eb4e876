use std::f32::consts::TAU;

use anyhow::{Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::trace;

const RESAMPLE_CHUNK_SIZE: usize = 1024;

const STRETCH_FRAME: usize = 1024;
const STRETCH_HOP: usize = STRETCH_FRAME / 4;
const STRETCH_TOLERANCE: usize = 128;
const STRETCH_MATCH_LEN: usize = STRETCH_FRAME / 2;

/// Periodic Hann window.
#[must_use]
pub fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|index| 0.5 - 0.5 * (TAU * index as f32 / len as f32).cos())
        .collect()
}

#[must_use]
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().copied().map(f32::abs).fold(0.0_f32, f32::max)
}

/// Resamples a mono signal that is to be read at `source_rate` so that it plays at
/// `target_rate`. `source_rate` may be fractional, which is how a pitch ratio is
/// applied: reinterpreting a clip at `native_rate * ratio` and resampling back to a
/// fixed rate raises its pitch by `ratio` and shortens it by the same factor.
pub fn resample(samples: &[f32], source_rate: f64, target_rate: u32) -> Result<Vec<f32>> {
    if !source_rate.is_finite() || source_rate <= 0.0 {
        return Err(anyhow::anyhow!("invalid source sample rate {source_rate}"));
    }

    let ratio = f64::from(target_rate) / source_rate;
    if samples.is_empty() || (ratio - 1.0).abs() < 1e-9 {
        return Ok(samples.to_vec());
    }

    let sinc_params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        oversampling_factor: 128,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, sinc_params, RESAMPLE_CHUNK_SIZE, 1)
        .with_context(|| format!("failed to build resampler for ratio {ratio}"))?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK_SIZE);
    let mut position = 0;

    while samples.len() - position >= resampler.input_frames_next() {
        let frames = resampler.input_frames_next();
        let chunk = [&samples[position..position + frames]];
        let processed = resampler
            .process(&chunk[..], None)
            .context("resampler failed while processing")?;
        output.extend_from_slice(&processed[0]);
        position += frames;
    }

    if position < samples.len() {
        let remainder = [&samples[position..]];
        let processed = resampler
            .process_partial(Some(&remainder[..]), None)
            .context("resampler failed on trailing frames")?;
        output.extend_from_slice(&processed[0]);
    }

    // Flush the filter delay line.
    while output.len() < expected + delay {
        let processed = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .context("resampler failed while flushing")?;
        if processed[0].is_empty() {
            break;
        }
        output.extend_from_slice(&processed[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);
    trace!(
        input = samples.len(),
        output = output.len(),
        ratio,
        "resample complete"
    );
    Ok(output)
}

/// Changes the length of a clip by `1 / factor` without changing its pitch.
///
/// Uses waveform-similarity overlap-add: each synthesis frame is taken from near its
/// nominal input position, shifted by up to [`STRETCH_TOLERANCE`] samples to line up
/// with the natural continuation of the previous frame. The result has exactly
/// `round(len / factor)` samples. A factor of one, or one that is not a positive
/// finite number, returns the input unchanged.
#[must_use]
pub fn time_stretch(input: &[f32], factor: f64) -> Vec<f32> {
    if input.is_empty() || !factor.is_finite() || factor <= 0.0 || (factor - 1.0).abs() < 1e-9 {
        return input.to_vec();
    }

    let target_len = (input.len() as f64 / factor).round() as usize;
    if target_len == 0 {
        return Vec::new();
    }

    let window = hann_window(STRETCH_FRAME);
    let mut output = vec![0.0_f32; target_len + STRETCH_FRAME];
    let mut weights = vec![0.0_f32; target_len + STRETCH_FRAME];
    let mut previous_source: Option<usize> = None;
    let mut out_pos = 0;

    while out_pos < target_len {
        let nominal = (out_pos as f64 * factor).round() as usize;
        let source = match previous_source {
            Some(previous) => best_alignment(input, previous + STRETCH_HOP, nominal),
            None => nominal,
        };

        for (offset, weight) in window.iter().enumerate() {
            let sample = input.get(source + offset).copied().unwrap_or(0.0);
            output[out_pos + offset] += sample * weight;
            weights[out_pos + offset] += weight;
        }

        previous_source = Some(source);
        out_pos += STRETCH_HOP;
    }

    for (sample, weight) in output.iter_mut().zip(&weights) {
        if *weight > 1.0e-3 {
            *sample /= weight;
        }
    }
    output.truncate(target_len);
    output
}

fn best_alignment(input: &[f32], natural: usize, nominal: usize) -> usize {
    if natural >= input.len() || nominal >= input.len() {
        return nominal;
    }

    let low = nominal.saturating_sub(STRETCH_TOLERANCE);
    let high = (nominal + STRETCH_TOLERANCE).min(input.len() - 1);
    let reference_end = (natural + STRETCH_MATCH_LEN).min(input.len());
    let reference = &input[natural..reference_end];

    let mut best = nominal;
    let mut best_score = f32::NEG_INFINITY;
    for candidate in low..=high {
        let score: f32 = reference
            .iter()
            .enumerate()
            .map(|(offset, value)| value * input.get(candidate + offset).copied().unwrap_or(0.0))
            .sum();
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|frame| (TAU * frequency * frame as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    fn zero_crossing_rate(samples: &[f32], sample_rate: u32) -> f32 {
        let crossings = samples
            .windows(2)
            .filter(|pair| (pair[0] < 0.0) != (pair[1] < 0.0))
            .count();
        crossings as f32 * sample_rate as f32 / (2.0 * samples.len() as f32)
    }

    #[test]
    fn hann_window_is_zero_at_start_and_one_at_centre() {
        let window = hann_window(8);
        assert!(window[0].abs() < 1e-6);
        assert!((window[4] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn stretch_produces_exact_target_length() {
        let input = sine(440.0, 22_050, 10_000);
        assert_eq!(time_stretch(&input, 0.5).len(), 20_000);
        assert_eq!(time_stretch(&input, 2.0).len(), 5_000);
        assert_eq!(time_stretch(&input, 3.0).len(), 3_333);
    }

    #[test]
    fn unit_or_invalid_factor_is_passthrough() {
        let input = sine(220.0, 22_050, 500);
        assert_eq!(time_stretch(&input, 1.0), input);
        assert_eq!(time_stretch(&input, f64::NAN), input);
        assert_eq!(time_stretch(&input, 0.0), input);
    }

    #[test]
    fn stretch_preserves_pitch() {
        let input = sine(440.0, 22_050, 11_025);
        let stretched = time_stretch(&input, 0.5);
        let middle = &stretched[2_048..stretched.len() - 2_048];
        let rate = zero_crossing_rate(middle, 22_050);
        assert!((rate - 440.0).abs() < 440.0 * 0.05, "rate was {rate}");
    }

    #[test]
    fn resample_changes_length_by_ratio() {
        let input = sine(220.0, 44_100, 44_100);
        let output = resample(&input, 44_100.0, 22_050).expect("resample should succeed");
        assert_eq!(output.len(), 22_050);
        let rate = zero_crossing_rate(&output[1_000..21_000], 22_050);
        assert!((rate - 220.0).abs() < 220.0 * 0.03, "rate was {rate}");
    }

    #[test]
    fn resample_rejects_invalid_rate() {
        assert!(resample(&[0.0; 16], 0.0, 22_050).is_err());
    }
}
