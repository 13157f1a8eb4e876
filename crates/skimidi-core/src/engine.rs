use std::{
    any::Any,
    fs,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    assets,
    config::{EngineConfig, RenderConfig, RenderSettings},
    midi::{self, ScoreError},
    mixer::{MasterTrack, layer_gain},
    model::{OUTPUT_SAMPLE_RATE, max_note_end},
    progress::{ProgressReporter, ProgressSink},
    render::{RenderError, Renderer},
    selector::{resolve_primary, select_layers},
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Score(#[from] ScoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid midi path: {0}")]
    InvalidMidiPath(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("render job panicked: {0}")]
    Panicked(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Io(format!("{value:#}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub midi_path: PathBuf,
    pub palette_dir: PathBuf,
    pub output_root: PathBuf,
    #[serde(default)]
    pub config: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderSummary {
    pub job_id: Uuid,
    pub output_dir: PathBuf,
    pub output_path: PathBuf,
    pub palette_size: usize,
    pub primary_sound: Option<String>,
    pub note_count: usize,
    pub skipped_notes: usize,
    pub layers_rendered: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub peak_before_normalize: f32,
    pub duration_seconds: f64,
    pub output_sha256: String,
    pub completed_at: DateTime<Utc>,
}

/// Runs render jobs. Holds only settings; every job gets its own cache, master
/// track and scratch directory.
#[derive(Debug, Clone)]
pub struct Engine {
    settings: RenderSettings,
    scratch_root: Option<PathBuf>,
    output_rate: u32,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RenderSettings::default())
    }
}

impl Engine {
    #[must_use]
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            scratch_root: None,
            output_rate: OUTPUT_SAMPLE_RATE,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            settings: config.render.clone(),
            scratch_root: config.paths.scratch_dir.clone(),
            output_rate: OUTPUT_SAMPLE_RATE,
        }
    }

    #[must_use]
    pub fn with_scratch_root(mut self, scratch_root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(scratch_root.into());
        self
    }

    /// Job boundary. Never returns an error or panics: failures become a single
    /// `{error}` progress event and `None`.
    pub fn run(
        &self,
        request: &RenderRequest,
        sink: &mut dyn ProgressSink,
    ) -> Option<RenderSummary> {
        let job_id = Uuid::new_v4();
        let mut reporter = ProgressReporter::new(sink);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.render(job_id, request, &mut reporter)
        }));
        let failure = match outcome {
            Ok(Ok(summary)) => return Some(summary),
            Ok(Err(failure)) => failure,
            Err(payload) => EngineError::Panicked(panic_message(payload.as_ref())),
        };

        error!(%job_id, error = %failure, "render job failed");
        reporter.fail(failure.to_string());
        None
    }

    #[instrument(skip(self, job_id, request, reporter), fields(job_id = %job_id, midi = %request.midi_path.display()))]
    pub fn render(
        &self,
        job_id: Uuid,
        request: &RenderRequest,
        reporter: &mut ProgressReporter<'_>,
    ) -> Result<RenderSummary, EngineError> {
        reporter.start_analysis();
        let palette = assets::analyze_palette(&request.palette_dir, |index, total, sample| {
            reporter.sample_analyzed(index, total, &sample.filename);
        })?;
        let primary = resolve_primary(&palette, request.config.primary_sound_name.as_deref());
        info!(palette_size = palette.len(), primary = primary.as_deref(), "palette analysed");

        reporter.parsing_midi();
        let notes = midi::load_notes(&request.midi_path)?;
        info!(notes = notes.len(), "midi parsed");

        let (output_dir, output_path) = output_paths(&request.output_root, &request.midi_path)?;
        let scratch = self.create_scratch_dir()?;
        let mut renderer = Renderer::new(
            self.settings
                .pitch_backend
                .build(&self.settings.ffmpeg_binary),
            self.output_rate,
            scratch.path(),
        );

        let mut master = MasterTrack::with_duration(
            self.output_rate,
            max_note_end(&notes) + self.settings.tail_seconds.max(0.0),
        );
        let max_layers = request.config.max_layers();
        let mut skipped_notes = 0;
        let mut layers_rendered = 0;

        for (index, note) in notes.iter().enumerate() {
            reporter.weaving(index, notes.len());

            let assignment = select_layers(note, &palette, max_layers, primary.as_deref());
            if assignment.is_empty() {
                skipped_notes += 1;
                continue;
            }

            for (is_primary, sample) in assignment.iter() {
                let clip = renderer.render(sample, note)?;
                let gain = layer_gain(note.velocity, is_primary, assignment.len());
                master.mix(&clip, gain, note.start_time_sec);
                layers_rendered += 1;
            }
        }
        if skipped_notes > 0 {
            warn!(skipped_notes, "notes skipped because the palette is empty");
        }

        reporter.finalizing();
        let peak_before_normalize = master.normalize();
        master.write_wav(&output_path)?;
        let output_sha256 = file_sha256(&output_path)?;

        let cache = renderer.cache();
        let summary = RenderSummary {
            job_id,
            output_dir,
            output_path,
            palette_size: palette.len(),
            primary_sound: primary,
            note_count: notes.len(),
            skipped_notes,
            layers_rendered,
            cache_hits: cache.hits(),
            cache_misses: cache.misses(),
            peak_before_normalize,
            duration_seconds: master.duration_seconds(),
            output_sha256,
            completed_at: Utc::now(),
        };

        drop(renderer);
        if let Err(error) = scratch.close() {
            warn!(?error, "failed to remove job scratch directory");
        }

        reporter.done();
        info!(
            path = %summary.output_path.display(),
            layers_rendered = summary.layers_rendered,
            cache_hits = summary.cache_hits,
            "render job completed"
        );
        Ok(summary)
    }

    fn create_scratch_dir(&self) -> Result<TempDir, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("skimidi-job-");

        let scratch = match &self.scratch_root {
            Some(root) => {
                fs::create_dir_all(root).with_context(|| {
                    format!("failed to create scratch root: {}", root.display())
                })?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .context("failed to create job scratch directory")?;

        debug!(path = %scratch.path().display(), "job scratch directory created");
        Ok(scratch)
    }
}

/// `<output_root>/<stem>/` and `<output_root>/<stem>/<stem>_output.wav` for a MIDI file.
pub fn output_paths(output_root: &Path, midi_path: &Path) -> Result<(PathBuf, PathBuf), EngineError> {
    let stem = midi_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| EngineError::InvalidMidiPath(midi_path.display().to_string()))?;

    let output_dir = output_root.join(&stem);
    let output_path = output_dir.join(format!("{stem}_output.wav"));
    Ok((output_dir, output_path))
}

fn file_sha256(path: &Path) -> Result<String, EngineError> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read rendered output: {}", path.display()))?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
