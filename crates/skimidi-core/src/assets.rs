use std::{
    fs::File,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rustfft::{FftPlanner, num_complex::Complex};
use serde::{Deserialize, Serialize};
use symphonia::core::{
    audio::SampleBuffer, codecs::DecoderOptions, errors::Error as SymphoniaError,
    formats::FormatOptions, io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::{
    dsp,
    model::{ANALYSIS_SAMPLE_RATE, Sample},
};

pub const PITCH_FFT_SIZE: usize = 2048;
pub const PITCH_HOP_SIZE: usize = 512;

const PALETTE_EXTENSION: &str = "wav";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

#[instrument(fields(path = %path.display()))]
pub fn decode_audio_file_mono(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .with_context(|| format!("failed to open audio file: {}", path.display()))?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|value| value.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        source,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default audio track found in {}", path.display()))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(ANALYSIS_SAMPLE_RATE);
    let mut channels = track
        .codec_params
        .channels
        .map(|value| value.count() as u16)
        .unwrap_or(1);
    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(error)) if error.kind() == ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                return Err(anyhow::anyhow!(
                    "audio stream reset required for {}",
                    path.display()
                ));
            }
            Err(error) => return Err(error.into()),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(_)) => {
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        sample_rate = decoded.spec().rate;
        channels = decoded.spec().channels.count() as u16;
        push_mono_samples(decoded, &mut samples);
    }

    if samples.is_empty() {
        return Err(anyhow::anyhow!(
            "decoded zero samples from {}",
            path.display()
        ));
    }

    debug!(
        sample_rate,
        channels,
        total_frames = samples.len(),
        "audio decode complete"
    );

    Ok(DecodedAudio {
        sample_rate,
        channels,
        samples,
    })
}

/// Lists the `.wav` files (any extension case) directly inside a palette directory,
/// sorted by file name.
#[instrument(fields(directory = %directory.display()))]
pub fn scan_palette(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "sound palette path is not a directory: {}",
            directory.display()
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(?error, "ignoring unreadable entry while scanning palette");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let is_wav = entry
            .path()
            .extension()
            .and_then(|value| value.to_str())
            .is_some_and(|value| value.eq_ignore_ascii_case(PALETTE_EXTENSION));
        if is_wav {
            files.push(entry.into_path());
        }
    }

    files.sort_by(|left, right| left.file_name().cmp(&right.file_name()));
    debug!(count = files.len(), "palette scan complete");
    Ok(files)
}

/// Scans and analyses a whole palette in file-name order, calling `on_analyzed`
/// with `(index, total, sample)` after each file.
pub fn analyze_palette<F>(directory: &Path, mut on_analyzed: F) -> Result<Vec<Sample>>
where
    F: FnMut(usize, usize, &Sample),
{
    let files = scan_palette(directory)?;
    let total = files.len();

    let mut palette = Vec::with_capacity(total);
    for (index, path) in files.iter().enumerate() {
        let sample = analyze_sample(path);
        on_analyzed(index, total, &sample);
        palette.push(sample);
    }
    Ok(palette)
}

/// Analyses one palette file. Never fails: any decode problem or a zero pitch
/// estimate degrades to [`Sample::fallback`] with a warning.
#[instrument(fields(path = %path.display()))]
pub fn analyze_sample(path: &Path) -> Sample {
    let filename = file_name(path);

    let decoded = match decode_audio_file_mono(path) {
        Ok(decoded) => decoded,
        Err(error) => {
            warn!(%filename, ?error, "could not analyse sound, using fallback");
            return Sample::fallback(filename, path, ANALYSIS_SAMPLE_RATE);
        }
    };

    let analysed = match dsp::resample(
        &decoded.samples,
        f64::from(decoded.sample_rate),
        ANALYSIS_SAMPLE_RATE,
    ) {
        Ok(samples) => samples,
        Err(error) => {
            warn!(%filename, ?error, "could not analyse sound, using fallback");
            return Sample::fallback(filename, path, decoded.sample_rate);
        }
    };

    let base_pitch_hz = estimate_pitch(&analysed, ANALYSIS_SAMPLE_RATE);
    if base_pitch_hz <= 0.0 {
        warn!(%filename, "no dominant pitch found, using fallback");
        return Sample::fallback(filename, path, decoded.sample_rate);
    }

    let sample = Sample {
        filename,
        path: path.to_path_buf(),
        base_pitch_hz,
        base_duration_sec: analysed.len() as f64 / f64::from(ANALYSIS_SAMPLE_RATE),
        native_sample_rate: decoded.sample_rate,
    };
    debug!(
        filename = %sample.filename,
        base_pitch_hz = sample.base_pitch_hz,
        base_duration_sec = sample.base_duration_sec,
        native_sample_rate = sample.native_sample_rate,
        "sound analysed"
    );
    sample
}

/// Dominant frequency of a Hann-windowed STFT: the bin with the largest mean
/// magnitude, refined by a parabola through the log magnitudes of its neighbours.
/// Returns 0.0 for empty or silent input.
#[must_use]
pub fn estimate_pitch(samples: &[f32], sample_rate: u32) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(PITCH_FFT_SIZE);
    let window = dsp::hann_window(PITCH_FFT_SIZE);
    let bins = PITCH_FFT_SIZE / 2 + 1;

    let mut magnitude_sums = vec![0.0_f32; bins];
    let mut buffer = vec![Complex::new(0.0_f32, 0.0); PITCH_FFT_SIZE];
    let mut frame_count = 0_usize;
    let mut start = 0;

    while start < samples.len() {
        for (offset, slot) in buffer.iter_mut().enumerate() {
            let sample = samples.get(start + offset).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * window[offset], 0.0);
        }
        fft.process(&mut buffer);

        for (sum, value) in magnitude_sums.iter_mut().zip(&buffer[..bins]) {
            *sum += value.norm();
        }
        frame_count += 1;
        start += PITCH_HOP_SIZE;
    }

    let mut best_bin = 0;
    let mut best_magnitude = 0.0_f32;
    for (bin, sum) in magnitude_sums.iter().enumerate() {
        let mean = sum / frame_count as f32;
        if mean > best_magnitude {
            best_magnitude = mean;
            best_bin = bin;
        }
    }

    if best_bin == 0 {
        return 0.0;
    }

    let refined_bin = best_bin as f64 + parabolic_peak_offset(&magnitude_sums, best_bin);
    refined_bin * f64::from(sample_rate) / PITCH_FFT_SIZE as f64
}

fn parabolic_peak_offset(magnitudes: &[f32], bin: usize) -> f64 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return 0.0;
    }

    let log_magnitude = |value: f32| f64::from(value.max(f32::MIN_POSITIVE)).ln();
    let left = log_magnitude(magnitudes[bin - 1]);
    let centre = log_magnitude(magnitudes[bin]);
    let right = log_magnitude(magnitudes[bin + 1]);

    let curvature = left - 2.0 * centre + right;
    if curvature >= 0.0 {
        return 0.0;
    }
    (0.5 * (left - right) / curvature).clamp(-0.5, 0.5)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

fn push_mono_samples(decoded: symphonia::core::audio::AudioBufferRef<'_>, samples: &mut Vec<f32>) {
    let spec = *decoded.spec();
    let channel_count = spec.channels.count().max(1);
    let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
    sample_buffer.copy_interleaved_ref(decoded);

    for frame in sample_buffer.samples().chunks(channel_count) {
        let sum: f32 = frame.iter().copied().sum();
        samples.push(sum / channel_count as f32);
    }
}
