use crate::error::ArkiaError;
use crate::progress::{COMPLETION_MESSAGE, ProcessingStep, SimulatorSettings, default_steps};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../default-config.toml");
const LOCAL_CONFIG: &str = "arkia.toml";
const ENV_PREFIX: &str = "ARKIA_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArkiaConfig {
    pub export: ExportConfig,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub output_dir: PathBuf,
    pub default_file_name: String,
    pub device_pixel_ratio: f32,
    pub allow_cross_origin: bool,
    #[serde(default)]
    pub font_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub debug_log: Option<PathBuf>,
    #[serde(default)]
    pub perf_log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressConfig {
    pub elapsed_tick_ms: u64,
    pub progress_tick_ms: u64,
    pub max_increment: f64,
    pub sections_generated: u32,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_steps")]
    pub steps: Vec<ProcessingStep>,
}

impl ProgressConfig {
    pub fn simulator_settings(&self) -> SimulatorSettings {
        SimulatorSettings {
            elapsed_tick: Duration::from_millis(self.elapsed_tick_ms),
            progress_tick: Duration::from_millis(self.progress_tick_ms),
            message: COMPLETION_MESSAGE.to_string(),
            sections_generated: self.sections_generated,
        }
    }
}

impl ArkiaConfig {
    /// Embedded defaults, then `./arkia.toml`, then `ARKIA_*` variables.
    pub fn load() -> Result<Self, ArkiaError> {
        Self::load_with_custom_config(None)
    }

    /// Same as `load`, with `custom` merged over `./arkia.toml`.
    pub fn load_with_custom_config(custom: Option<&Path>) -> Result<Self, ArkiaError> {
        Self::from_figment(Self::figment(custom, ENV_PREFIX))
    }

    fn figment(custom: Option<&Path>, env_prefix: &str) -> Figment {
        let mut figment = Figment::new()
            .merge(Toml::string(DEFAULT_CONFIG))
            .merge(Toml::file(LOCAL_CONFIG));
        if let Some(path) = custom {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(env_prefix).split("__"))
    }

    fn from_figment(figment: Figment) -> Result<Self, ArkiaError> {
        let config: ArkiaConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ArkiaError> {
        let dpr = self.export.device_pixel_ratio;
        if !dpr.is_finite() || dpr <= 0.0 {
            return Err(ArkiaError::InvalidConfiguration(format!(
                "export.device_pixel_ratio must be > 0, got {dpr}"
            )));
        }
        if self.export.default_file_name.trim().is_empty() {
            return Err(ArkiaError::InvalidConfiguration(
                "export.default_file_name must not be empty".to_string(),
            ));
        }
        if self.progress.elapsed_tick_ms == 0 || self.progress.progress_tick_ms == 0 {
            return Err(ArkiaError::InvalidConfiguration(
                "progress tick intervals must be > 0".to_string(),
            ));
        }
        if !self.progress.max_increment.is_finite() || self.progress.max_increment < 0.0 {
            return Err(ArkiaError::InvalidConfiguration(
                "progress.max_increment must be a finite value >= 0".to_string(),
            ));
        }
        if self.progress.steps.is_empty() {
            return Err(ArkiaError::InvalidConfiguration(
                "progress.steps must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_pretty_json(&self) -> Result<String, ArkiaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for ArkiaConfig {
    fn default() -> Self {
        Self {
            export: ExportConfig {
                output_dir: PathBuf::from("."),
                default_file_name: crate::export::DEFAULT_FILE_NAME.to_string(),
                device_pixel_ratio: 2.0,
                allow_cross_origin: true,
                font_dirs: Vec::new(),
                debug_log: None,
                perf_log: None,
            },
            progress: ProgressConfig {
                elapsed_tick_ms: 1000,
                progress_tick_ms: 2000,
                max_increment: 10.0,
                sections_generated: crate::progress::SECTIONS_GENERATED,
                seed: None,
                steps: default_steps(),
            },
        }
    }
}
