use std::{
    f32::consts::TAU,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use tracing::{debug, instrument};

use crate::time::bpm_to_micros_per_quarter;

pub const FIXTURE_PPQ: u16 = 480;
pub const DEMO_BPM: f64 = 120.0;

pub const DEMO_TONES: [(&str, f32); 3] = [
    ("high_tone.wav", 880.0),
    ("low_tone.wav", 220.0),
    ("mid_tone.wav", 440.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureNote {
    pub key: u8,
    pub velocity: u8,
    pub start_tick: u32,
    pub length_ticks: u32,
}

impl FixtureNote {
    #[must_use]
    pub fn new(key: u8, velocity: u8, start_tick: u32, length_ticks: u32) -> Self {
        Self {
            key,
            velocity,
            start_tick,
            length_ticks,
        }
    }

    #[must_use]
    pub fn end_tick(&self) -> u32 {
        self.start_tick.saturating_add(self.length_ticks)
    }
}

#[derive(Debug, Clone)]
struct AbsoluteMidiEvent {
    tick: u32,
    order: u8,
    kind: TrackEventKind<'static>,
}

#[must_use]
pub fn demo_melody() -> Vec<FixtureNote> {
    let quarter = u32::from(FIXTURE_PPQ);
    vec![
        FixtureNote::new(60, 100, 0, quarter),
        FixtureNote::new(64, 96, quarter, quarter),
        FixtureNote::new(67, 96, quarter * 2, quarter),
        FixtureNote::new(72, 110, quarter * 3, quarter * 2),
        FixtureNote::new(48, 80, quarter * 3, quarter * 2),
        FixtureNote::new(69, 90, quarter * 5, quarter / 2),
        FixtureNote::new(67, 90, quarter * 5 + quarter / 2, quarter / 2),
        FixtureNote::new(60, 120, quarter * 6, quarter * 2),
    ]
}

pub fn melody_midi_bytes(notes: &[FixtureNote], bpm: f64, ppq: u16) -> Result<Vec<u8>> {
    let mut absolute_events: Vec<AbsoluteMidiEvent> =
        notes.iter().flat_map(note_to_midi_events).collect();
    // Note-offs sort ahead of note-ons on the same tick.
    absolute_events.sort_by_key(|event| (event.tick, event.order));

    let mut note_track = Vec::with_capacity(absolute_events.len() + 1);
    let mut previous_tick = 0_u32;
    for event in absolute_events {
        note_track.push(TrackEvent {
            delta: u28::from(event.tick.saturating_sub(previous_tick)),
            kind: event.kind,
        });
        previous_tick = event.tick;
    }
    note_track.push(TrackEvent {
        delta: u28::from(0_u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(u15::from(ppq)),
    };
    let tracks = vec![build_tempo_track(bpm), note_track];

    let mut bytes = Vec::new();
    Smf { header, tracks }
        .write_std(&mut bytes)
        .context("failed to encode midi bytes")?;
    Ok(bytes)
}

#[instrument(skip(notes), fields(path = %path.display(), notes = notes.len()))]
pub fn write_midi(path: &Path, notes: &[FixtureNote], bpm: f64) -> Result<()> {
    let bytes = melody_midi_bytes(notes, bpm, FIXTURE_PPQ)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create midi directory: {}", parent.display()))?;
    }
    fs::write(path, bytes)
        .with_context(|| format!("failed to write midi file: {}", path.display()))?;
    Ok(())
}

pub fn write_tone_wav(path: &Path, frequency_hz: f32, seconds: f32, sample_rate: u32) -> Result<()> {
    let frame_count = (seconds.max(0.0) * sample_rate as f32).round() as usize;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create tone wav: {}", path.display()))?;
    for frame in 0..frame_count {
        let phase = frame as f32 / sample_rate as f32 * frequency_hz * TAU;
        let sample = (phase.sin() * 0.5 * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(sample)
            .context("failed to write tone sample")?;
    }
    writer.finalize().context("failed to finalize tone wav")?;
    Ok(())
}

pub fn write_demo_palette(directory: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(directory).with_context(|| {
        format!("failed to create palette directory: {}", directory.display())
    })?;

    let mut paths = Vec::with_capacity(DEMO_TONES.len());
    for (file_name, frequency_hz) in DEMO_TONES {
        let path = directory.join(file_name);
        write_tone_wav(&path, frequency_hz, 1.0, 44_100)?;
        paths.push(path);
    }
    debug!(directory = %directory.display(), count = paths.len(), "demo palette written");
    Ok(paths)
}

fn build_tempo_track(bpm: f64) -> Vec<TrackEvent<'static>> {
    vec![
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(
                bpm_to_micros_per_quarter(bpm),
            ))),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]
}

fn note_to_midi_events(note: &FixtureNote) -> [AbsoluteMidiEvent; 2] {
    let key = u7::from(note.key.min(127));
    [
        AbsoluteMidiEvent {
            tick: note.start_tick,
            order: 1,
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::NoteOn {
                    key,
                    vel: u7::from(note.velocity.min(127)),
                },
            },
        },
        AbsoluteMidiEvent {
            tick: note.end_tick(),
            order: 0,
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::NoteOff {
                    key,
                    vel: u7::from(0),
                },
            },
        },
    ]
}
