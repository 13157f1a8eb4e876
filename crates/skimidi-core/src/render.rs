use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::{
    assets::decode_audio_file_mono,
    dsp,
    model::{Note, Sample},
};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to decode sample {filename}: {message}")]
    Decode { filename: String, message: String },
    #[error("pitch transform failed for {filename}: {message}")]
    Transform { filename: String, message: String },
    #[error("{tool} failed for {filename}: {message}")]
    Tool {
        tool: String,
        filename: String,
        message: String,
    },
    #[error("invalid pitch ratio {ratio} for {filename}")]
    InvalidRatio { filename: String, ratio: f64 },
}

/// Duration is not corrected here; clips may come back shorter or longer.
pub trait PitchTransform: Send {
    fn name(&self) -> &'static str;

    fn transform(
        &mut self,
        sample: &Sample,
        pitch_ratio: f64,
        output_rate: u32,
        scratch_dir: &Path,
    ) -> Result<Vec<f32>, RenderError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchBackend {
    #[default]
    Resample,
    Ffmpeg,
}

impl PitchBackend {
    #[must_use]
    pub fn build(self, ffmpeg_binary: &Path) -> Box<dyn PitchTransform> {
        match self {
            Self::Resample => Box::new(ResamplePitch),
            Self::Ffmpeg => Box::new(FfmpegPitch::new(ffmpeg_binary)),
        }
    }
}

impl fmt::Display for PitchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resample => f.write_str("resample"),
            Self::Ffmpeg => f.write_str("ffmpeg"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResamplePitch;

impl PitchTransform for ResamplePitch {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn transform(
        &mut self,
        sample: &Sample,
        pitch_ratio: f64,
        output_rate: u32,
        _scratch_dir: &Path,
    ) -> Result<Vec<f32>, RenderError> {
        let decoded = decode_audio_file_mono(&sample.path).map_err(|error| RenderError::Decode {
            filename: sample.filename.clone(),
            message: format!("{error:#}"),
        })?;

        let source_rate = f64::from(decoded.sample_rate) * pitch_ratio;
        dsp::resample(&decoded.samples, source_rate, output_rate).map_err(|error| {
            RenderError::Transform {
                filename: sample.filename.clone(),
                message: format!("{error:#}"),
            }
        })
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegPitch {
    binary: PathBuf,
}

impl FfmpegPitch {
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    #[must_use]
    pub fn arguments(
        sample: &Sample,
        pitch_ratio: f64,
        output_rate: u32,
        output_path: &Path,
    ) -> Vec<String> {
        let reinterpreted_rate =
            (f64::from(sample.native_sample_rate) * pitch_ratio).round().max(1.0) as u64;
        vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            sample.path.display().to_string(),
            "-af".to_string(),
            format!("asetrate={reinterpreted_rate},aresample={output_rate}"),
            "-ac".to_string(),
            "1".to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            output_path.display().to_string(),
        ]
    }
}

impl PitchTransform for FfmpegPitch {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn transform(
        &mut self,
        sample: &Sample,
        pitch_ratio: f64,
        output_rate: u32,
        scratch_dir: &Path,
    ) -> Result<Vec<f32>, RenderError> {
        let tool_error = |message: String| RenderError::Tool {
            tool: self.binary.display().to_string(),
            filename: sample.filename.clone(),
            message,
        };

        let stem = Path::new(&sample.filename)
            .file_stem()
            .map_or_else(|| "clip".into(), |stem| stem.to_string_lossy());
        let output_path = scratch_dir.join(format!(
            "{stem}_{}.wav",
            (pitch_ratio * 1_000_000.0).round() as u64
        ));

        let output = Command::new(&self.binary)
            .args(Self::arguments(sample, pitch_ratio, output_rate, &output_path))
            .output()
            .map_err(|error| tool_error(format!("failed to spawn: {error}")))?;
        if !output.status.success() {
            return Err(tool_error(format!(
                "exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let decoded = decode_audio_file_mono(&output_path)
            .map_err(|error| tool_error(format!("unreadable output: {error:#}")))?;
        if decoded.sample_rate == output_rate {
            return Ok(decoded.samples);
        }
        dsp::resample(&decoded.samples, f64::from(decoded.sample_rate), output_rate)
            .map_err(|error| tool_error(format!("{error:#}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub filename: String,
    pub centihertz: u64,
}

impl CacheKey {
    /// Target pitch is rounded to 0.01 Hz.
    #[must_use]
    pub fn new(filename: &str, target_pitch_hz: f64) -> Self {
        Self {
            filename: filename.to_string(),
            centihertz: (target_pitch_hz.max(0.0) * 100.0).round() as u64,
        }
    }
}

#[derive(Debug, Default)]
pub struct RenderCache {
    clips: HashMap<CacheKey, Arc<[f32]>>,
    hits: usize,
    misses: usize,
}

impl RenderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clips.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits
    }

    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses
    }

    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.clips.contains_key(key)
    }

    fn get_or_try_insert<F>(&mut self, key: CacheKey, render: F) -> Result<Arc<[f32]>, RenderError>
    where
        F: FnOnce() -> Result<Vec<f32>, RenderError>,
    {
        if let Some(clip) = self.clips.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(clip));
        }

        self.misses += 1;
        let clip: Arc<[f32]> = render()?.into();
        self.clips.insert(key, Arc::clone(&clip));
        Ok(clip)
    }
}

#[must_use]
pub fn pitch_ratio(target_pitch_hz: f64, base_pitch_hz: f64) -> f64 {
    target_pitch_hz / base_pitch_hz
}

#[must_use]
pub fn stretch_factor(clip_duration_sec: f64, note_duration_sec: f64) -> f64 {
    if note_duration_sec <= 0.0 {
        return 1.0;
    }
    clip_duration_sec / note_duration_sec
}

pub struct Renderer {
    transform: Box<dyn PitchTransform>,
    cache: RenderCache,
    output_rate: u32,
    scratch_dir: PathBuf,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("transform", &self.transform.name())
            .field("cached_clips", &self.cache.len())
            .field("output_rate", &self.output_rate)
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

impl Renderer {
    #[must_use]
    pub fn new(
        transform: Box<dyn PitchTransform>,
        output_rate: u32,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transform,
            cache: RenderCache::new(),
            output_rate,
            scratch_dir: scratch_dir.into(),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn pitched(
        &mut self,
        sample: &Sample,
        target_pitch_hz: f64,
    ) -> Result<Arc<[f32]>, RenderError> {
        let ratio = pitch_ratio(target_pitch_hz, sample.base_pitch_hz);
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(RenderError::InvalidRatio {
                filename: sample.filename.clone(),
                ratio,
            });
        }

        let key = CacheKey::new(&sample.filename, target_pitch_hz);
        let transform = &mut self.transform;
        let output_rate = self.output_rate;
        let scratch_dir = &self.scratch_dir;
        self.cache.get_or_try_insert(key, || {
            trace!(filename = %sample.filename, ratio, backend = transform.name(), "pitch cache miss");
            transform.transform(sample, ratio, output_rate, scratch_dir)
        })
    }

    #[instrument(skip(self, sample, note), fields(filename = %sample.filename, pitch_hz = note.pitch_hz))]
    pub fn render(&mut self, sample: &Sample, note: &Note) -> Result<Vec<f32>, RenderError> {
        let pitched = self.pitched(sample, note.pitch_hz)?;
        let clip_duration = pitched.len() as f64 / f64::from(self.output_rate);
        let factor = stretch_factor(clip_duration, note.duration_sec);
        let stretched = dsp::time_stretch(&pitched, factor);
        debug!(
            pitched_frames = pitched.len(),
            stretched_frames = stretched.len(),
            factor,
            "clip rendered"
        );
        Ok(stretched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_rounds_to_hundredths() {
        assert_eq!(
            CacheKey::new("a.wav", 440.001),
            CacheKey::new("a.wav", 439.999)
        );
        assert_ne!(CacheKey::new("a.wav", 440.0), CacheKey::new("a.wav", 440.02));
        assert_ne!(CacheKey::new("a.wav", 440.0), CacheKey::new("b.wav", 440.0));
    }

    #[test]
    fn stretch_factor_guards_zero_duration() {
        assert_eq!(stretch_factor(2.0, 0.0), 1.0);
        assert!((stretch_factor(2.0, 0.5) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn ffmpeg_arguments_reinterpret_native_rate() {
        let sample = Sample {
            filename: "pad.wav".to_string(),
            path: "/palette/pad.wav".into(),
            base_pitch_hz: 220.0,
            base_duration_sec: 1.0,
            native_sample_rate: 44_100,
        };
        let arguments = FfmpegPitch::arguments(&sample, 2.0, 22_050, Path::new("/tmp/out.wav"));
        assert!(arguments.contains(&"asetrate=88200,aresample=22050".to_string()));
        assert_eq!(arguments.last().map(String::as_str), Some("/tmp/out.wav"));
    }

    #[test]
    fn missing_ffmpeg_binary_is_a_tool_error() {
        let scratch = tempfile::tempdir().expect("tempdir should be creatable");
        let sample = Sample::fallback("tone.wav", scratch.path().join("tone.wav"), 22_050);
        let mut backend = FfmpegPitch::new(scratch.path().join("no-such-ffmpeg"));
        let error = backend
            .transform(&sample, 1.5, 22_050, scratch.path())
            .expect_err("missing binary should fail");
        assert!(matches!(error, RenderError::Tool { .. }));
    }
}
