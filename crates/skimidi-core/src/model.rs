use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const OUTPUT_SAMPLE_RATE: u32 = 22_050;
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;
pub const FALLBACK_PITCH_HZ: f64 = 261.63;
pub const FALLBACK_DURATION_SECONDS: f64 = 1.0;
pub const MIN_NOTE_DURATION_SECONDS: f64 = 0.01;
pub const DEFAULT_TAIL_SECONDS: f64 = 2.0;
pub const DEFAULT_MAX_LAYERS: usize = 1;
pub const SECONDARY_LAYER_GAIN: f32 = 0.7;

/// One analysed palette file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub filename: String,
    pub path: PathBuf,
    pub base_pitch_hz: f64,
    pub base_duration_sec: f64,
    pub native_sample_rate: u32,
}

impl Sample {
    /// Degraded entry used when a palette file cannot be analysed.
    #[must_use]
    pub fn fallback(filename: impl Into<String>, path: impl Into<PathBuf>, sample_rate: u32) -> Self {
        Self {
            filename: filename.into(),
            path: path.into(),
            base_pitch_hz: FALLBACK_PITCH_HZ,
            base_duration_sec: FALLBACK_DURATION_SECONDS,
            native_sample_rate: sample_rate,
        }
    }

    #[must_use]
    pub fn pitch_distance(&self, pitch_hz: f64) -> f64 {
        (self.base_pitch_hz - pitch_hz).abs()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub start_time_sec: f64,
    pub pitch_hz: f64,
    pub duration_sec: f64,
    /// Normalised MIDI velocity in `[0, 1]`.
    pub velocity: f32,
}

impl Note {
    #[must_use]
    pub fn end_time_sec(&self) -> f64 {
        self.start_time_sec + self.duration_sec
    }
}

/// Samples chosen for a single note. When `has_primary` is set the first layer is the
/// primary sample.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerAssignment<'a> {
    pub layers: Vec<&'a Sample>,
    pub has_primary: bool,
}

impl<'a> LayerAssignment<'a> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            layers: Vec::new(),
            has_primary: false,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_primary(&self, index: usize) -> bool {
        self.has_primary && index == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (bool, &'a Sample)> + '_ {
        self.layers
            .iter()
            .enumerate()
            .map(|(index, sample)| (self.is_primary(index), *sample))
    }

    #[must_use]
    pub fn filenames(&self) -> Vec<&'a str> {
        self.layers.iter().map(|sample| sample.filename.as_str()).collect()
    }
}

#[must_use]
pub fn max_note_end(notes: &[Note]) -> f64 {
    notes.iter().map(Note::end_time_sec).fold(0.0, f64::max)
}
