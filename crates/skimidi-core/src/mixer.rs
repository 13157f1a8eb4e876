use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::{
    dsp,
    model::SECONDARY_LAYER_GAIN,
    time::seconds_to_sample_index,
};

/// Gain for one layer of a note: full velocity for the primary sample, and
/// `0.7 / max(extra_layers, 1)` of it for every other layer, where
/// `extra_layers = layer_count - 1`.
#[must_use]
pub fn layer_gain(velocity: f32, is_primary: bool, layer_count: usize) -> f32 {
    if is_primary {
        return velocity;
    }

    let extra_layers = layer_count.saturating_sub(1).max(1);
    velocity * (SECONDARY_LAYER_GAIN / extra_layers as f32)
}

/// The job's output waveform. Only grows while mixing.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterTrack {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl MasterTrack {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
        }
    }

    /// Silent track of `seconds` length.
    #[must_use]
    pub fn with_duration(sample_rate: u32, seconds: f64) -> Self {
        let frames = (seconds.max(0.0) * f64::from(sample_rate)) as usize;
        Self {
            samples: vec![0.0; frames],
            sample_rate,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    #[must_use]
    pub fn peak(&self) -> f32 {
        dsp::peak(&self.samples)
    }

    /// Adds `clip * gain` into the track starting at `start_time_sec`, growing the
    /// track with silence when the clip runs past the current end. Returns the start
    /// sample index.
    pub fn mix(&mut self, clip: &[f32], gain: f32, start_time_sec: f64) -> usize {
        let start = seconds_to_sample_index(start_time_sec, self.sample_rate);
        let end = start + clip.len();
        if end > self.samples.len() {
            // reserve() grows capacity geometrically; resize() keeps len exact.
            self.samples.reserve(end - self.samples.len());
            self.samples.resize(end, 0.0);
        }

        for (target, source) in self.samples[start..end].iter_mut().zip(clip) {
            *target += source * gain;
        }
        start
    }

    /// Divides the track by its peak when the peak exceeds 1.0; quieter tracks are
    /// left untouched. Returns the peak measured before normalisation.
    pub fn normalize(&mut self) -> f32 {
        let peak = self.peak();
        if peak > 1.0 {
            for sample in &mut self.samples {
                *sample /= peak;
            }
            debug!(peak, "master track normalised");
        }
        peak
    }

    /// Writes the track as mono 16-bit PCM.
    #[instrument(skip(self), fields(path = %path.display(), frames = self.samples.len()))]
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create wav output directory: {}",
                    parent.display()
                )
            })?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("failed to create wav file: {}", path.display()))?;

        for sample in &self.samples {
            let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
            writer
                .write_sample(quantized)
                .context("failed to write wav sample")?;
        }

        writer.finalize().context("failed to finalize wav file")?;
        info!("wav export completed");
        Ok(())
    }
}
