use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use skimidi_core::{
    Engine, EngineConfig, PitchBackend, RenderConfig, RenderRequest, analyze_palette,
    diagnostics::init_tracing,
    fixtures::{DEMO_BPM, demo_melody, write_demo_palette, write_midi},
    spawn_render_job,
};

#[derive(Debug, Parser)]
#[command(name = "skimidi-cli")]
#[command(about = "Render MIDI files with a palette of recorded sounds")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine settings TOML; discovered from the environment or working directory when omitted.
    #[arg(long, global = true)]
    engine_config: Option<PathBuf>,

    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Render {
        #[arg(long)]
        midi: PathBuf,

        #[arg(long)]
        palette: PathBuf,

        /// Per-job JSON config (`layering.max_layers`, `primarySoundName`).
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        primary: Option<String>,

        #[arg(long)]
        max_layers: Option<usize>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long, value_enum)]
        pitch_backend: Option<PitchBackendArg>,
    },
    Analyze {
        #[arg(long)]
        palette: PathBuf,
    },
    Demo {
        #[arg(long, default_value = "results/demo")]
        output_dir: PathBuf,

        #[arg(long, default_value_t = 2)]
        max_layers: usize,

        #[arg(long, value_enum)]
        pitch_backend: Option<PitchBackendArg>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PitchBackendArg {
    Resample,
    Ffmpeg,
}

impl From<PitchBackendArg> for PitchBackend {
    fn from(value: PitchBackendArg) -> Self {
        match value {
            PitchBackendArg::Resample => Self::Resample,
            PitchBackendArg::Ffmpeg => Self::Ffmpeg,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut engine_config = match &cli.engine_config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load_or_default()?,
    };
    let _telemetry = init_tracing(&engine_config, cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Render {
            midi,
            palette,
            config,
            primary,
            max_layers,
            output_dir,
            pitch_backend,
        } => {
            let mut render_config = match config {
                Some(path) => RenderConfig::load(&path)?,
                None => RenderConfig::default(),
            };
            if primary.is_some() {
                render_config.primary_sound_name = primary;
            }
            if let Some(max_layers) = max_layers {
                render_config.layering.max_layers = max_layers;
            }
            if let Some(pitch_backend) = pitch_backend {
                engine_config.render.pitch_backend = pitch_backend.into();
            }

            let request = RenderRequest {
                midi_path: midi,
                palette_dir: palette,
                output_root: output_dir.unwrap_or_else(|| engine_config.paths.output_dir.clone()),
                config: render_config,
            };
            run_job(&engine_config, request)?;
        }
        Commands::Analyze { palette } => {
            let samples = analyze_palette(&palette, |index, total, sample| {
                tracing::debug!(index, total, filename = %sample.filename, "sound analysed");
            })?;
            print_json_line(&samples)?;
        }
        Commands::Demo {
            output_dir,
            max_layers,
            pitch_backend,
        } => {
            if let Some(pitch_backend) = pitch_backend {
                engine_config.render.pitch_backend = pitch_backend.into();
            }

            let palette_dir = output_dir.join("palette");
            let midi_path = output_dir.join("demo_melody.mid");
            write_demo_palette(&palette_dir)?;
            write_midi(&midi_path, &demo_melody(), DEMO_BPM)?;

            let mut render_config = RenderConfig::default();
            render_config.layering.max_layers = max_layers;
            let request = RenderRequest {
                midi_path,
                palette_dir,
                output_root: output_dir.clone(),
                config: render_config,
            };
            run_job(&engine_config, request)?;
            tracing::info!(path = %output_dir.display(), "demo render generated");
        }
    }

    Ok(())
}

fn run_job(engine_config: &EngineConfig, request: RenderRequest) -> anyhow::Result<()> {
    let midi_path = request.midi_path.clone();
    let job = spawn_render_job(Engine::from_config(engine_config), request)
        .context("failed to spawn render worker")?;

    for event in job.events() {
        print_json_line(&event)?;
    }

    let summary = job
        .join()
        .ok_or_else(|| anyhow::anyhow!("render failed for {}", midi_path.display()))?;
    print_json_line(&summary)
}

fn print_json_line<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, value).context("failed to encode output line")?;
    writeln!(stdout).context("failed to write output line")?;
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}
