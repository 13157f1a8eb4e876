pub mod assets;
pub mod config;
pub mod diagnostics;
pub mod dsp;
pub mod engine;
pub mod fixtures;
pub mod midi;
pub mod mixer;
pub mod model;
pub mod progress;
pub mod render;
pub mod selector;
pub mod time;
pub mod worker;

pub use assets::{DecodedAudio, analyze_palette, analyze_sample, decode_audio_file_mono, scan_palette};
pub use config::{EngineConfig, LayeringConfig, RenderConfig, RenderSettings};
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use engine::{Engine, EngineError, RenderRequest, RenderSummary};
pub use midi::{ScoreError, extract_notes, load_notes, midi_to_hz};
pub use mixer::{MasterTrack, layer_gain};
pub use model::{LayerAssignment, Note, OUTPUT_SAMPLE_RATE, Sample};
pub use progress::{ChannelSink, ProgressEvent, ProgressReporter, ProgressSink};
pub use render::{PitchBackend, PitchTransform, RenderCache, RenderError, Renderer};
pub use selector::{resolve_primary, select_layers};
pub use worker::{JobHandle, spawn_render_job};
