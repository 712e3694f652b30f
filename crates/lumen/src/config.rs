//! Configuration for Lumen
//!
//! Read from `--config` or `$LUMEN_HOME/lumen.toml`. Every field has a
//! default, so an absent file or an empty one is a valid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lumen_cluster::{Metric, WhisperParams};
use lumen_worker::ExecutionMode;
use serde::{Deserialize, Serialize};

use crate::classify::registry::{model_spec, ModelSpec, MODELS};
use crate::error::{LumenError, Result};
use crate::modality::Modality;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    /// Program that runs model scripts
    pub runtime: PathBuf,
    /// Directory holding `<model>.py` scripts
    pub models_dir: PathBuf,
    /// Overrides every model's batch size
    pub batch_size: Option<usize>,
    pub execution: ExecutionConfig,
    pub image: ModalityConfig,
    pub audio: ModalityConfig,
    pub video: ModalityConfig,
    pub models: BTreeMap<String, ModelConfig>,
    pub faces: FacesConfig,
    pub landmarks: LandmarksConfig,
}

impl Default for LumenConfig {
    fn default() -> Self {
        Self {
            runtime: PathBuf::from("python3"),
            models_dir: PathBuf::from("models"),
            batch_size: None,
            execution: ExecutionConfig::default(),
            image: ModalityConfig::default(),
            audio: ModalityConfig::default(),
            video: ModalityConfig::default(),
            models: BTreeMap::new(),
            faces: FacesConfig::default(),
            landmarks: LandmarksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub pure_software: bool,
    pub gpu: bool,
    pub cores: Option<usize>,
}

/// Unset fields fall back to the modality's built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModalityConfig {
    pub mime_types: Option<Vec<String>>,
    pub ignore_markers: Option<Vec<String>>,
    /// Size cap such as `"50MB"`; `"0"` means unbounded
    pub max_size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub enabled: bool,
    pub script: Option<PathBuf>,
    pub batch_size: Option<usize>,
    /// Per-file timeout in seconds, replacing the built-in table
    pub timeout_secs: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            script: None,
            batch_size: None,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacesConfig {
    /// Faces scoring below this are discarded
    pub min_score: f64,
    pub radius: f64,
    pub min_neighbors: usize,
    pub rounds: usize,
    pub metric: Metric,
}

impl Default for FacesConfig {
    fn default() -> Self {
        let whispers = WhisperParams::default();
        Self {
            min_score: 0.9,
            radius: whispers.radius,
            min_neighbors: whispers.min_neighbors,
            rounds: whispers.rounds,
            metric: whispers.metric,
        }
    }
}

impl FacesConfig {
    pub fn whisper_params(&self) -> WhisperParams {
        WhisperParams {
            metric: self.metric,
            radius: self.radius,
            min_neighbors: self.min_neighbors,
            rounds: self.rounds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LandmarksConfig {
    /// Files already tagged with any of these skip landmark recognition
    pub skip_tags: Vec<String>,
}

impl Default for LandmarksConfig {
    fn default() -> Self {
        Self {
            skip_tags: ["people", "portrait", "document", "screenshot"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

/// Modality settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModalitySettings {
    pub modality: Modality,
    pub mime_types: Vec<String>,
    pub ignore_markers: Vec<String>,
    pub max_size: u64,
}

impl LumenConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LumenError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        for name in self.models.keys() {
            if model_spec(name).is_none() {
                return Err(LumenError::UnknownModel(name.clone()));
            }
        }
        for modality in Modality::ALL {
            self.modality(modality)?;
        }
        if !(0.0..=1.0).contains(&self.faces.min_score) {
            return Err(LumenError::Config(format!(
                "faces.min_score must be within 0..=1, got {}",
                self.faces.min_score
            )));
        }
        Ok(())
    }

    pub fn modality(&self, modality: Modality) -> Result<ModalitySettings> {
        let raw = match modality {
            Modality::Image => &self.image,
            Modality::Audio => &self.audio,
            Modality::Video => &self.video,
        };
        let max_size = match raw.max_size.as_deref() {
            Some(text) => parse_size(text).map_err(|e| {
                LumenError::Config(format!("{}.max_size: {}", modality, e))
            })?,
            None => 0,
        };
        Ok(ModalitySettings {
            modality,
            mime_types: raw
                .mime_types
                .clone()
                .unwrap_or_else(|| modality.default_mime_types()),
            ignore_markers: raw
                .ignore_markers
                .clone()
                .unwrap_or_else(|| modality.default_ignore_markers()),
            max_size,
        })
    }

    pub fn model(&self, name: &str) -> ModelConfig {
        self.models.get(name).cloned().unwrap_or_default()
    }

    pub fn enabled_models(&self) -> Vec<&'static ModelSpec> {
        MODELS.iter().filter(|m| self.model(m.name).enabled).collect()
    }

    pub fn enabled_models_for(&self, modality: Modality) -> Vec<&'static ModelSpec> {
        self.enabled_models()
            .into_iter()
            .filter(|m| m.modality == modality)
            .collect()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode {
            pure_software: self.execution.pure_software,
            gpu: self.execution.gpu,
            cores: self.execution.cores,
        }
    }

    pub fn script_for(&self, spec: &ModelSpec) -> PathBuf {
        self.model(spec.name)
            .script
            .unwrap_or_else(|| self.models_dir.join(spec.script))
    }

    pub fn batch_size_for(&self, spec: &ModelSpec) -> usize {
        self.model(spec.name)
            .batch_size
            .or(self.batch_size)
            .unwrap_or(spec.batch_size)
            .max(1)
    }

    pub fn timeout_for(&self, spec: &ModelSpec) -> Duration {
        match self.model(spec.name).timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => spec.timeouts.for_mode(&self.execution_mode()),
        }
    }
}

/// Parse a human-readable size such as `"512"`, `"10KB"` or `"1.5GB"`.
pub fn parse_size(text: &str) -> std::result::Result<u64, String> {
    let upper = text.trim().to_ascii_uppercase();
    let split = upper
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(upper.len());
    let (number, unit) = upper.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{}'", text))?;
    if value < 0.0 || !value.is_finite() {
        return Err(format!("invalid size '{}'", text));
    }
    let scale: u64 = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1 << 10,
        "M" | "MB" => 1 << 20,
        "G" | "GB" => 1 << 30,
        "T" | "TB" => 1 << 40,
        other => return Err(format!("unknown unit '{}'", other)),
    };
    Ok((value * scale as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0"), Ok(0));
        assert_eq!(parse_size("512"), Ok(512));
        assert_eq!(parse_size("10kb"), Ok(10 * 1024));
        assert_eq!(parse_size("1.5 GB"), Ok(1536 * 1024 * 1024));
        assert!(parse_size("ten").is_err());
        assert!(parse_size("5PB").is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LumenConfig::from_toml("").unwrap();
        assert_eq!(config.runtime, PathBuf::from("python3"));
        assert_eq!(config.enabled_models().len(), 5);
        let image = config.modality(Modality::Image).unwrap();
        assert_eq!(image.ignore_markers, vec![".nomedia", ".noimage"]);
        assert_eq!(image.max_size, 0);
    }

    #[test]
    fn test_overrides() {
        let config = LumenConfig::from_toml(
            r#"
            runtime = "/usr/bin/python3.11"
            batch_size = 7

            [execution]
            pure_software = true

            [audio]
            max_size = "50MB"
            ignore_markers = [".quiet"]

            [models.movinet]
            enabled = false

            [models.faces]
            timeout_secs = 5
            script = "/opt/faces.py"

            [faces]
            radius = 0.35
            metric = "manhattan"
            "#,
        )
        .unwrap();

        let audio = config.modality(Modality::Audio).unwrap();
        assert_eq!(audio.max_size, 50 * 1024 * 1024);
        assert_eq!(audio.ignore_markers, vec![".quiet"]);
        assert!(config.enabled_models_for(Modality::Video).is_empty());

        let faces = model_spec("faces").unwrap();
        assert_eq!(config.timeout_for(faces), Duration::from_secs(5));
        assert_eq!(config.script_for(faces), PathBuf::from("/opt/faces.py"));
        assert_eq!(config.batch_size_for(faces), 7);

        let imagenet = model_spec("imagenet").unwrap();
        assert_eq!(config.timeout_for(imagenet), Duration::from_secs(480));
        assert_eq!(config.script_for(imagenet), PathBuf::from("models/imagenet.py"));

        let params = config.faces.whisper_params();
        assert_eq!(params.metric, Metric::Manhattan);
        assert_eq!(params.radius, 0.35);
    }

    #[test]
    fn test_rejects_unknown_model_and_bad_size() {
        assert!(matches!(
            LumenConfig::from_toml("[models.resnet]\nenabled = true\n"),
            Err(LumenError::UnknownModel(_))
        ));
        assert!(matches!(
            LumenConfig::from_toml("[video]\nmax_size = \"huge\"\n"),
            Err(LumenError::Config(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let text = LumenConfig::default().to_toml().unwrap();
        let parsed = LumenConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.faces.min_neighbors, 2);
    }
}
