use std::{collections::HashMap, fs, path::Path};

use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::{
    model::{MIN_NOTE_DURATION_SECONDS, Note},
    time::{DEFAULT_MICROS_PER_QUARTER, ticks_to_seconds, timecode_tick_seconds},
};

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to read midi file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid midi data: {0}")]
    Parse(#[from] midly::Error),
    #[error("No notes found in MIDI file.")]
    EmptyScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEventKind {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    pub delta_seconds: f64,
    pub kind: MidiEventKind,
}

impl MidiEvent {
    #[must_use]
    pub fn note_on(delta_seconds: f64, key: u8, velocity: u8) -> Self {
        Self {
            delta_seconds,
            kind: MidiEventKind::NoteOn { key, velocity },
        }
    }

    #[must_use]
    pub fn note_off(delta_seconds: f64, key: u8) -> Self {
        Self {
            delta_seconds,
            kind: MidiEventKind::NoteOff { key },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AbsoluteEvent {
    tick: u64,
    kind: MidiEventKind,
    tempo: Option<u32>,
}

#[must_use]
pub fn midi_to_hz(key: u8) -> f64 {
    let semitone_offset = f64::from(i16::from(key) - 69);
    440.0 * 2_f64.powf(semitone_offset / 12.0)
}

/// A second note-on for a key that is already sounding replaces the open record
/// (last open wins). Unclosed notes and notes no longer than
/// [`MIN_NOTE_DURATION_SECONDS`] are dropped.
pub fn extract_notes(events: &[MidiEvent]) -> Result<Vec<Note>, ScoreError> {
    let mut open_notes: HashMap<u8, (f64, u8)> = HashMap::new();
    let mut notes = Vec::new();
    let mut now = 0.0_f64;

    for event in events {
        now += event.delta_seconds;
        match event.kind {
            MidiEventKind::NoteOn { key, velocity } if velocity > 0 => {
                open_notes.insert(key, (now, velocity));
            }
            MidiEventKind::NoteOn { key, .. } | MidiEventKind::NoteOff { key } => {
                let Some((start_time_sec, velocity)) = open_notes.remove(&key) else {
                    continue;
                };
                let duration_sec = now - start_time_sec;
                if duration_sec <= MIN_NOTE_DURATION_SECONDS {
                    trace!(key, duration_sec, "dropping short note");
                    continue;
                }
                notes.push(Note {
                    start_time_sec,
                    pitch_hz: midi_to_hz(key),
                    duration_sec,
                    velocity: f32::from(velocity) / 127.0,
                });
            }
            MidiEventKind::Other => {}
        }
    }

    if !open_notes.is_empty() {
        debug!(unclosed = open_notes.len(), "ignoring notes without note-off");
    }

    // Vec::sort_by is stable, so equal start times keep close order.
    notes.sort_by(|left, right| left.start_time_sec.total_cmp(&right.start_time_sec));

    if notes.is_empty() {
        return Err(ScoreError::EmptyScore);
    }
    Ok(notes)
}

pub fn parse_midi_events(bytes: &[u8]) -> Result<Vec<MidiEvent>, ScoreError> {
    let smf = Smf::parse(bytes)?;
    let merged = merge_tracks(&smf);

    let mut events = Vec::with_capacity(merged.len());
    let mut tempo = DEFAULT_MICROS_PER_QUARTER;
    let mut previous_tick = 0_u64;

    for event in merged {
        let delta_ticks = event.tick.saturating_sub(previous_tick);
        previous_tick = event.tick;

        let delta_seconds = match smf.header.timing {
            Timing::Metrical(ppq) => ticks_to_seconds(delta_ticks, tempo, ppq.as_int()),
            Timing::Timecode(fps, ticks_per_frame) => {
                delta_ticks as f64 * timecode_tick_seconds(fps.as_f32(), ticks_per_frame)
            }
        };
        if let Some(next_tempo) = event.tempo {
            tempo = next_tempo;
        }

        events.push(MidiEvent {
            delta_seconds,
            kind: event.kind,
        });
    }

    debug!(
        format = ?smf.header.format,
        tracks = smf.tracks.len(),
        events = events.len(),
        "midi decode complete"
    );
    Ok(events)
}

#[instrument(fields(path = %path.display()))]
pub fn load_midi_events(path: &Path) -> Result<Vec<MidiEvent>, ScoreError> {
    let bytes = fs::read(path).map_err(|source| ScoreError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_midi_events(&bytes)
}

#[instrument(fields(path = %path.display()))]
pub fn load_notes(path: &Path) -> Result<Vec<Note>, ScoreError> {
    let events = load_midi_events(path)?;
    let notes = extract_notes(&events)?;
    debug!(notes = notes.len(), "notes extracted");
    Ok(notes)
}

fn merge_tracks(smf: &Smf<'_>) -> Vec<AbsoluteEvent> {
    let mut merged = Vec::new();
    let mut track_offset = 0_u64;

    for track in &smf.tracks {
        let mut tick = track_offset;
        for event in track {
            tick = tick.saturating_add(u64::from(event.delta.as_int()));
            merged.push(AbsoluteEvent {
                tick,
                kind: classify(&event.kind),
                tempo: match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => Some(tempo.as_int()),
                    _ => None,
                },
            });
        }
        if smf.header.format == Format::Sequential {
            track_offset = tick;
        }
    }

    if smf.header.format != Format::Sequential {
        merged.sort_by_key(|event| event.tick);
    }
    merged
}

fn classify(kind: &TrackEventKind<'_>) -> MidiEventKind {
    match kind {
        TrackEventKind::Midi {
            message: MidiMessage::NoteOn { key, vel },
            ..
        } => MidiEventKind::NoteOn {
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        TrackEventKind::Midi {
            message: MidiMessage::NoteOff { key, .. },
            ..
        } => MidiEventKind::NoteOff { key: key.as_int() },
        _ => MidiEventKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concert_a_maps_to_440() {
        assert!((midi_to_hz(69) - 440.0).abs() < 1e-9);
        assert!((midi_to_hz(57) - 220.0).abs() < 1e-9);
        assert!((midi_to_hz(60) - 261.625_565).abs() < 1e-5);
    }

    #[test]
    fn zero_velocity_note_on_closes_note() {
        let events = [
            MidiEvent::note_on(0.0, 60, 100),
            MidiEvent::note_on(0.5, 60, 0),
        ];
        let notes = extract_notes(&events).expect("note should be extracted");
        assert_eq!(notes.len(), 1);
        assert!((notes[0].duration_sec - 0.5).abs() < 1e-12);
        assert!((notes[0].velocity - 100.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn retrigger_before_note_off_keeps_last_open() {
        let events = [
            MidiEvent::note_on(0.0, 64, 90),
            MidiEvent::note_on(0.25, 64, 40),
            MidiEvent::note_off(0.5, 64),
        ];
        let notes = extract_notes(&events).expect("note should be extracted");
        assert_eq!(notes.len(), 1);
        assert!((notes[0].start_time_sec - 0.25).abs() < 1e-12);
        assert!((notes[0].velocity - 40.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn short_notes_are_filtered() {
        let events = [
            MidiEvent::note_on(0.0, 60, 100),
            MidiEvent::note_off(0.005, 60),
            MidiEvent::note_on(0.0, 62, 100),
            MidiEvent::note_off(0.01, 62),
        ];
        assert!(matches!(
            extract_notes(&events),
            Err(ScoreError::EmptyScore)
        ));
    }

    #[test]
    fn unclosed_note_on_yields_no_note() {
        let events = [
            MidiEvent::note_on(0.0, 60, 100),
            MidiEvent::note_on(0.0, 62, 100),
            MidiEvent::note_off(0.5, 62),
        ];
        let notes = extract_notes(&events).expect("closed note should be extracted");
        assert_eq!(notes.len(), 1);
        assert!((notes[0].pitch_hz - midi_to_hz(62)).abs() < 1e-9);

        let dangling = [MidiEvent::note_on(0.0, 60, 100)];
        assert!(matches!(
            extract_notes(&dangling),
            Err(ScoreError::EmptyScore)
        ));
    }

    #[test]
    fn note_off_without_open_note_is_ignored() {
        let events = [
            MidiEvent::note_off(0.0, 61),
            MidiEvent::note_on(0.0, 60, 100),
            MidiEvent::note_off(1.0, 60),
        ];
        let notes = extract_notes(&events).expect("note should be extracted");
        assert_eq!(notes.len(), 1);
    }
}
