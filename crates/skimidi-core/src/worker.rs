use std::{
    io,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, unbounded};
use tracing::{error, info};

use crate::{
    engine::{Engine, RenderRequest, RenderSummary},
    progress::{ChannelSink, ProgressEvent},
};

pub struct JobHandle {
    events: Receiver<ProgressEvent>,
    handle: JoinHandle<Option<RenderSummary>>,
}

impl JobHandle {
    #[must_use]
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn join(self) -> Option<RenderSummary> {
        match self.handle.join() {
            Ok(summary) => summary,
            Err(_) => {
                error!("render worker thread panicked");
                None
            }
        }
    }
}

pub fn spawn_render_job(engine: Engine, request: RenderRequest) -> io::Result<JobHandle> {
    let (sender, events) = unbounded();
    let thread_name = format!(
        "skimidi-render-{}",
        request
            .midi_path
            .file_stem()
            .map_or_else(|| "job".into(), |stem| stem.to_string_lossy())
    );
    info!(thread = %thread_name, midi = %request.midi_path.display(), "spawning render job");

    let handle = thread::Builder::new().name(thread_name).spawn(move || {
        let mut sink = ChannelSink::new(sender);
        engine.run(&request, &mut sink)
    })?;

    Ok(JobHandle { events, handle })
}
