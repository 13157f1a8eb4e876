use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    model::{DEFAULT_MAX_LAYERS, DEFAULT_TAIL_SECONDS},
    render::PitchBackend,
};

pub const CONFIG_FILE_NAME: &str = "skimidi.config.toml";
pub const CONFIG_PATH_ENV: &str = "SKIMIDI_CONFIG_PATH";

/// Per-job options sent alongside an upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct RenderConfig {
    pub layering: LayeringConfig,
    #[serde(rename = "primarySoundName")]
    pub primary_sound_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LayeringConfig {
    pub max_layers: usize,
}

impl Default for LayeringConfig {
    fn default() -> Self {
        Self {
            max_layers: DEFAULT_MAX_LAYERS,
        }
    }
}

impl RenderConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("invalid render config json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read render config: {}", path.display()))?;
        Self::from_json(&bytes)
    }

    #[must_use]
    pub fn max_layers(&self) -> usize {
        self.layering.max_layers.max(1)
    }
}

/// Process-wide settings, read from `skimidi.config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub render: RenderSettings,
    pub paths: PathsConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub pitch_backend: PitchBackend,
    pub ffmpeg_binary: PathBuf,
    pub tail_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_dir: PathBuf,
    /// Parent for per-job scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub file_logging: bool,
    pub trace_file_prefix: String,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            pitch_backend: PitchBackend::Resample,
            ffmpeg_binary: PathBuf::from("ffmpeg"),
            tail_seconds: DEFAULT_TAIL_SECONDS,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("results"),
            scratch_dir: None,
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: "info,skimidi_core=debug".to_string(),
            file_logging: true,
            trace_file_prefix: "skimidi".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;

        debug!(path = %path.display(), "engine config loaded");
        Ok(config)
    }

    /// Like [`EngineConfig::load`], but falls back to defaults when no config file
    /// exists. A file that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path() {
            Ok(path) => Self::load_from(&path),
            Err(_) => Ok(Self::default()),
        }
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_config_accepts_transport_json() {
        let config = RenderConfig::from_json(
            br#"{"layering": {"max_layers": 3}, "primarySoundName": "kick.wav"}"#,
        )
        .expect("config should parse");
        assert_eq!(config.layering.max_layers, 3);
        assert_eq!(config.primary_sound_name.as_deref(), Some("kick.wav"));
    }

    #[test]
    fn render_config_defaults_missing_fields() {
        let config = RenderConfig::from_json(br#"{"primarySoundName": null}"#)
            .expect("config should parse");
        assert_eq!(config, RenderConfig::default());
        assert_eq!(config.max_layers(), 1);
    }

    #[test]
    fn zero_layers_clamps_to_one() {
        let config = RenderConfig::from_json(br#"{"layering": {"max_layers": 0}}"#)
            .expect("config should parse");
        assert_eq!(config.max_layers(), 1);
    }

    #[test]
    fn engine_config_fills_defaults_from_partial_toml() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "[render]\npitch_backend = \"ffmpeg\"\n\n[paths]\noutput_dir = \"out\"\n",
        )
        .expect("config should be writable");

        let config = EngineConfig::load_from(&path).expect("config should load");
        assert_eq!(config.render.pitch_backend, PitchBackend::Ffmpeg);
        assert_eq!(config.render.ffmpeg_binary, PathBuf::from("ffmpeg"));
        assert!((config.render.tail_seconds - DEFAULT_TAIL_SECONDS).abs() < f64::EPSILON);
        assert_eq!(config.paths.output_dir, PathBuf::from("out"));
        assert_eq!(config.paths.scratch_dir, None);
        assert_eq!(config.diagnostics.trace_file_prefix, "skimidi");
        assert!(config.diagnostics.file_logging);
    }

    #[test]
    fn diagnostics_section_can_disable_file_logging() {
        let config: EngineConfig = toml::from_str(
            "[diagnostics]\nfile_logging = false\nrust_log_filter = \"warn\"\n",
        )
        .expect("config should parse");
        assert!(!config.diagnostics.file_logging);
        assert_eq!(config.diagnostics.rust_log_filter, "warn");
        assert_eq!(config.diagnostics.trace_file_prefix, "skimidi");
    }
}
