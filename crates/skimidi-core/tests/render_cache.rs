use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use skimidi_core::{Note, PitchTransform, RenderError, Renderer, Sample, render::CacheKey};

const RATE: u32 = 22_050;

/// Returns a fixed 0.1 s clip and counts how often it was asked to.
struct CountingTransform {
    calls: Arc<AtomicUsize>,
}

impl PitchTransform for CountingTransform {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn transform(
        &mut self,
        _sample: &Sample,
        _pitch_ratio: f64,
        output_rate: u32,
        _scratch_dir: &Path,
    ) -> Result<Vec<f32>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0.5; output_rate as usize / 10])
    }
}

fn counting_renderer() -> (Renderer, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let renderer = Renderer::new(
        Box::new(CountingTransform {
            calls: Arc::clone(&calls),
        }),
        RATE,
        std::env::temp_dir(),
    );
    (renderer, calls)
}

fn sample(filename: &str, base_pitch_hz: f64) -> Sample {
    Sample {
        filename: filename.to_string(),
        path: PathBuf::from(filename),
        base_pitch_hz,
        base_duration_sec: 0.1,
        native_sample_rate: RATE,
    }
}

fn note(pitch_hz: f64, duration_sec: f64) -> Note {
    Note {
        start_time_sec: 0.0,
        pitch_hz,
        duration_sec,
        velocity: 1.0,
    }
}

#[test]
fn same_pitch_is_transformed_once_across_durations() {
    let (mut renderer, calls) = counting_renderer();
    let tone = sample("tone.wav", 440.0);

    let short = renderer.render(&tone, &note(440.0, 0.2)).expect("render should succeed");
    let long = renderer
        .render(&tone, &note(440.001, 0.5))
        .expect("render should succeed");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(short.len(), 4_410);
    assert_eq!(long.len(), 11_025);
    assert_eq!(renderer.cache().hits(), 1);
    assert_eq!(renderer.cache().misses(), 1);
    assert!(renderer.cache().contains(&CacheKey::new("tone.wav", 440.0)));
}

#[test]
fn new_pitch_or_file_misses_the_cache() {
    let (mut renderer, calls) = counting_renderer();
    let tone = sample("tone.wav", 440.0);
    let other = sample("other.wav", 440.0);

    renderer.render(&tone, &note(440.0, 0.1)).expect("render should succeed");
    renderer.render(&tone, &note(880.0, 0.1)).expect("render should succeed");
    renderer.render(&other, &note(440.0, 0.1)).expect("render should succeed");

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(renderer.cache().len(), 3);
}

#[test]
fn unpitched_sample_is_rejected_without_transforming() {
    let (mut renderer, calls) = counting_renderer();
    let broken = sample("broken.wav", 0.0);

    let error = renderer
        .render(&broken, &note(440.0, 0.5))
        .expect_err("zero base pitch should fail");
    assert!(matches!(error, RenderError::InvalidRatio { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(renderer.cache().is_empty());
}

#[test]
fn resample_backend_shifts_pitch_and_length() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("a220.wav");
    skimidi_core::fixtures::write_tone_wav(&path, 220.0, 1.0, RATE).expect("tone should be written");

    let tone = Sample {
        filename: "a220.wav".to_string(),
        path,
        base_pitch_hz: 220.0,
        base_duration_sec: 1.0,
        native_sample_rate: RATE,
    };
    let mut renderer = Renderer::new(
        skimidi_core::PitchBackend::Resample.build(Path::new("ffmpeg")),
        RATE,
        temp.path(),
    );

    let pitched = renderer.pitched(&tone, 440.0).expect("pitch shift should succeed");
    // An octave up plays twice as fast.
    assert_eq!(pitched.len(), RATE as usize / 2);

    let clip = renderer.render(&tone, &note(440.0, 1.0)).expect("render should succeed");
    assert_eq!(clip.len(), RATE as usize);
    assert_eq!(renderer.cache().hits(), 1);
}
