pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

#[must_use]
pub fn ticks_to_seconds(ticks: u64, micros_per_quarter: u32, ppq: u16) -> f64 {
    if ppq == 0 {
        return 0.0;
    }

    let beats = ticks as f64 / f64::from(ppq);
    beats * f64::from(micros_per_quarter) / 1_000_000.0
}

#[must_use]
pub fn bpm_to_micros_per_quarter(bpm: f64) -> u32 {
    (60_000_000.0 / bpm.max(1.0)).round() as u32
}

/// Seconds per tick for SMPTE timecode timing.
#[must_use]
pub fn timecode_tick_seconds(frames_per_second: f32, ticks_per_frame: u8) -> f64 {
    let ticks_per_second = f64::from(frames_per_second) * f64::from(ticks_per_frame);
    if ticks_per_second <= 0.0 {
        return 0.0;
    }

    1.0 / ticks_per_second
}

#[must_use]
pub fn seconds_to_sample_index(seconds: f64, sample_rate: u32) -> usize {
    if seconds <= 0.0 {
        return 0;
    }

    (seconds * f64::from(sample_rate)).round() as usize
}
