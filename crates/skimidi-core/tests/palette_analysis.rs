use std::fs;

use skimidi_core::{
    analyze_palette, analyze_sample,
    assets::estimate_pitch,
    fixtures::write_tone_wav,
    model::{FALLBACK_DURATION_SECONDS, FALLBACK_PITCH_HZ},
    scan_palette,
};
use tempfile::tempdir;

#[test]
fn tone_pitch_and_duration_are_estimated() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("a440.wav");
    write_tone_wav(&path, 440.0, 1.0, 44_100).expect("tone should be written");

    let sample = analyze_sample(&path);
    assert_eq!(sample.filename, "a440.wav");
    assert_eq!(sample.native_sample_rate, 44_100);
    assert!(
        (sample.base_pitch_hz - 440.0).abs() < 2.0,
        "estimated {} Hz",
        sample.base_pitch_hz
    );
    assert!((sample.base_duration_sec - 1.0).abs() < 0.01);
}

#[test]
fn unreadable_file_falls_back() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("broken.wav");
    fs::write(&path, b"definitely not a riff header").expect("file should be writable");

    let sample = analyze_sample(&path);
    assert_eq!(sample.filename, "broken.wav");
    assert_eq!(sample.base_pitch_hz, FALLBACK_PITCH_HZ);
    assert_eq!(sample.base_duration_sec, FALLBACK_DURATION_SECONDS);
}

#[test]
fn silent_file_falls_back() {
    let temp = tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("silence.wav");
    write_tone_wav(&path, 0.0, 0.5, 22_050).expect("silence should be written");

    let sample = analyze_sample(&path);
    assert_eq!(sample.base_pitch_hz, FALLBACK_PITCH_HZ);
    assert_eq!(sample.base_duration_sec, FALLBACK_DURATION_SECONDS);
    assert_eq!(sample.native_sample_rate, 22_050);
}

#[test]
fn empty_signal_has_no_pitch() {
    assert_eq!(estimate_pitch(&[], 22_050), 0.0);
}

#[test]
fn scan_matches_wav_case_insensitively_and_ignores_subdirectories() {
    let temp = tempdir().expect("tempdir should be creatable");
    let root = temp.path();
    write_tone_wav(&root.join("b.WAV"), 220.0, 0.1, 22_050).expect("tone should be written");
    write_tone_wav(&root.join("a.wav"), 330.0, 0.1, 22_050).expect("tone should be written");
    fs::write(root.join("notes.txt"), "ignore me").expect("file should be writable");
    fs::create_dir(root.join("nested")).expect("dir should be creatable");
    write_tone_wav(&root.join("nested").join("c.wav"), 440.0, 0.1, 22_050)
        .expect("tone should be written");

    let files = scan_palette(root).expect("scan should succeed");
    let names: Vec<String> = files
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.wav", "b.WAV"]);
}

#[test]
fn missing_palette_directory_is_an_error() {
    let temp = tempdir().expect("tempdir should be creatable");
    let missing = temp.path().join("nope");
    assert!(scan_palette(&missing).is_err());
    assert!(analyze_palette(&missing, |_, _, _| {}).is_err());
}

#[test]
fn palette_analysis_reports_each_file_in_order() {
    let temp = tempdir().expect("tempdir should be creatable");
    write_tone_wav(&temp.path().join("low.wav"), 220.0, 0.5, 22_050)
        .expect("tone should be written");
    write_tone_wav(&temp.path().join("high.wav"), 880.0, 0.5, 22_050)
        .expect("tone should be written");

    let mut seen = Vec::new();
    let palette = analyze_palette(temp.path(), |index, total, sample| {
        seen.push((index, total, sample.filename.clone()));
    })
    .expect("palette should analyse");

    assert_eq!(
        seen,
        vec![(0, 2, "high.wav".to_string()), (1, 2, "low.wav".to_string())]
    );
    assert!(palette[0].base_pitch_hz > palette[1].base_pitch_hz);
}
