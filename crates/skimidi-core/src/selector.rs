use tracing::debug;

use crate::model::{LayerAssignment, Note, Sample};

/// Picks the job's primary sample name once: the requested name when it is in the
/// palette, otherwise the first palette entry, otherwise nothing.
#[must_use]
pub fn resolve_primary(palette: &[Sample], requested: Option<&str>) -> Option<String> {
    if let Some(requested) =
        requested.filter(|name| palette.iter().any(|sample| sample.filename == *name))
    {
        return Some(requested.to_string());
    }

    let resolved = palette.first().map(|sample| sample.filename.clone());
    if requested.is_some() {
        debug!(
            requested,
            resolved = resolved.as_deref(),
            "requested primary sound not in palette"
        );
    }
    resolved
}

/// Chooses up to `max_layers` samples for a note: the primary sample first when it is
/// in the palette, then the remaining samples nearest in pitch. Ties keep palette
/// order. An empty palette yields an empty assignment and the note is skipped.
#[must_use]
pub fn select_layers<'a>(
    note: &Note,
    palette: &'a [Sample],
    max_layers: usize,
    primary: Option<&str>,
) -> LayerAssignment<'a> {
    let max_layers = max_layers.max(1);
    let mut assignment = LayerAssignment::empty();

    if let Some(primary_sample) =
        primary.and_then(|name| palette.iter().find(|sample| sample.filename == name))
    {
        assignment.layers.push(primary_sample);
        assignment.has_primary = true;
    }

    let mut candidates: Vec<&Sample> = palette
        .iter()
        .filter(|sample| Some(sample.filename.as_str()) != primary)
        .collect();
    candidates.sort_by(|left, right| {
        left.pitch_distance(note.pitch_hz)
            .total_cmp(&right.pitch_distance(note.pitch_hz))
    });

    let remaining = max_layers.saturating_sub(assignment.layers.len());
    assignment
        .layers
        .extend(candidates.into_iter().take(remaining));
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(filename: &str, base_pitch_hz: f64) -> Sample {
        Sample {
            filename: filename.to_string(),
            path: filename.into(),
            base_pitch_hz,
            base_duration_sec: 1.0,
            native_sample_rate: 22_050,
        }
    }

    fn note(pitch_hz: f64) -> Note {
        Note {
            start_time_sec: 0.0,
            pitch_hz,
            duration_sec: 0.5,
            velocity: 1.0,
        }
    }

    fn palette() -> Vec<Sample> {
        vec![
            sample("A.wav", 220.0),
            sample("B.wav", 440.0),
            sample("C.wav", 880.0),
        ]
    }

    #[test]
    fn primary_then_nearest_layer() {
        let palette = palette();
        let assignment = select_layers(&note(430.0), &palette, 2, Some("A.wav"));
        assert_eq!(assignment.filenames(), vec!["A.wav", "B.wav"]);
        assert!(assignment.is_primary(0));
        assert!(!assignment.is_primary(1));
    }

    #[test]
    fn single_layer_with_primary_is_primary_only() {
        let palette = palette();
        let assignment = select_layers(&note(870.0), &palette, 1, Some("A.wav"));
        assert_eq!(assignment.filenames(), vec!["A.wav"]);
    }

    #[test]
    fn missing_primary_falls_back_to_nearest() {
        let palette = palette();
        let assignment = select_layers(&note(870.0), &palette, 2, Some("missing.wav"));
        assert_eq!(assignment.filenames(), vec!["C.wav", "B.wav"]);
        assert!(!assignment.has_primary);
    }

    #[test]
    fn distance_ties_keep_palette_order() {
        let palette = vec![sample("low.wav", 300.0), sample("high.wav", 500.0)];
        let assignment = select_layers(&note(400.0), &palette, 2, None);
        assert_eq!(assignment.filenames(), vec!["low.wav", "high.wav"]);
    }

    #[test]
    fn zero_max_layers_is_treated_as_one() {
        let palette = palette();
        let assignment = select_layers(&note(440.0), &palette, 0, None);
        assert_eq!(assignment.filenames(), vec!["B.wav"]);
    }

    #[test]
    fn empty_palette_yields_no_layers() {
        let assignment = select_layers(&note(440.0), &[], 3, Some("A.wav"));
        assert!(assignment.is_empty());
    }

    #[test]
    fn resolve_primary_prefers_requested_name() {
        let palette = palette();
        assert_eq!(
            resolve_primary(&palette, Some("B.wav")).as_deref(),
            Some("B.wav")
        );
        assert_eq!(
            resolve_primary(&palette, Some("nope.wav")).as_deref(),
            Some("A.wav")
        );
        assert_eq!(resolve_primary(&palette, None).as_deref(), Some("A.wav"));
        assert_eq!(resolve_primary(&[], Some("A.wav")), None);
    }
}
