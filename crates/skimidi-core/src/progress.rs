use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const ANALYSIS_END_PERCENT: u8 = 15;
pub const WEAVING_END_PERCENT: u8 = 95;
pub const DONE_PERCENT: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Status { status: String, percent: u8 },
    Error { error: String },
}

impl ProgressEvent {
    #[must_use]
    pub fn status(status: impl Into<String>, percent: u8) -> Self {
        Self::Status {
            status: status.into(),
            percent: percent.min(DONE_PERCENT),
        }
    }

    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        match self {
            Self::Status { percent, .. } => Some(*percent),
            Self::Error { .. } => None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Status { percent, .. } => *percent >= DONE_PERCENT,
            Self::Error { .. } => true,
        }
    }
}

pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn emit(&mut self, event: ProgressEvent) {
        self(event);
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<ProgressEvent>,
}

impl ChannelSink {
    #[must_use]
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&mut self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            debug!("progress receiver dropped");
        }
    }
}

/// Percentages never decrease and at most one terminal event is sent.
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn ProgressSink,
    last_percent: u8,
    finished: bool,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            sink,
            last_percent: 0,
            finished: false,
        }
    }

    pub fn start_analysis(&mut self) {
        self.status("Analyzing sound palette...", 0);
    }

    pub fn sample_analyzed(&mut self, index: usize, total: usize, filename: &str) {
        let percent = band_percent(0, ANALYSIS_END_PERCENT, index + 1, total);
        self.status(
            format!("Analyzing sound {}/{total}: {filename}", index + 1),
            percent,
        );
    }

    pub fn parsing_midi(&mut self) {
        self.status("Parsing MIDI file...", ANALYSIS_END_PERCENT);
    }

    pub fn weaving(&mut self, index: usize, total: usize) {
        let percent = band_percent(ANALYSIS_END_PERCENT, WEAVING_END_PERCENT, index + 1, total);
        self.status(format!("Weaving note {}/{total}", index + 1), percent);
    }

    pub fn finalizing(&mut self) {
        self.status("Finalizing audio...", WEAVING_END_PERCENT);
    }

    pub fn done(&mut self) {
        self.status("Done!", DONE_PERCENT);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.sink.emit(ProgressEvent::error(message));
    }

    fn status(&mut self, status: impl Into<String>, percent: u8) {
        if self.finished {
            warn!("progress event after job end ignored");
            return;
        }

        let percent = percent.max(self.last_percent).min(DONE_PERCENT);
        self.last_percent = percent;
        let event = ProgressEvent::status(status, percent);
        self.finished = event.is_terminal();
        self.sink.emit(event);
    }
}

fn band_percent(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let span = u64::from(end - start);
    let done = done.min(total) as u64;
    start + (done * span / total as u64) as u8
}
