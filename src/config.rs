use anyhow::{Context, Result};
use configparser::ini::Ini;
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::Level;
use crate::frame_extractor::FramesPerScene;
use crate::processor::ProcessConfig;
use crate::sheet::{LabelStyle, LayoutMode};

const ENV_PREFIX: &str = "SCENE_SHEET_";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Full runtime configuration
#[derive(Debug, Clone)]
pub struct ExtendedConfig {
    /// Pipeline configuration
    pub process: ProcessConfig,
    /// trace, debug, info, warn, error
    pub log_level: String,
}

/// Values given on the command line, `None` when the flag was absent.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Positional threshold argument
    pub threshold: Option<f64>,
    /// `--min-scene-len`
    pub min_scene_len: Option<u64>,
    /// `--frames-per-scene`
    pub frames_per_scene: Option<FramesPerScene>,
    /// `--layout`
    pub layout: Option<LayoutMode>,
    /// `--columns`
    pub columns: Option<u32>,
    /// `--thumb-width`
    pub thumb_width: Option<u32>,
    /// `--output-dir`
    pub output_dir: Option<PathBuf>,
    /// `--font`
    pub font_path: Option<PathBuf>,
    /// `--metadata`, only ever `Some(true)`
    pub write_metadata: Option<bool>,
    /// `--log-level`
    pub log_level: Option<String>,
}

/// One configuration source, every field optional.
#[derive(Debug, Clone, Default, PartialEq)]
struct ConfigLayer {
    threshold: Option<f64>,
    min_scene_len: Option<u64>,
    frames_per_scene: Option<FramesPerScene>,
    output_dir: Option<PathBuf>,
    write_metadata: Option<bool>,
    downloader: Option<String>,
    layout: Option<LayoutMode>,
    columns: Option<u32>,
    thumb_width: Option<u32>,
    padding: Option<u32>,
    border_width: Option<u32>,
    font_path: Option<PathBuf>,
    font_size: Option<f32>,
    label_style: Option<LabelStyle>,
    log_level: Option<String>,
}

impl ConfigLayer {
    /// Fill the gaps in `self` from a lower-priority layer.
    fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            threshold: self.threshold.or(lower.threshold),
            min_scene_len: self.min_scene_len.or(lower.min_scene_len),
            frames_per_scene: self.frames_per_scene.or(lower.frames_per_scene),
            output_dir: self.output_dir.or(lower.output_dir),
            write_metadata: self.write_metadata.or(lower.write_metadata),
            downloader: self.downloader.or(lower.downloader),
            layout: self.layout.or(lower.layout),
            columns: self.columns.or(lower.columns),
            thumb_width: self.thumb_width.or(lower.thumb_width),
            padding: self.padding.or(lower.padding),
            border_width: self.border_width.or(lower.border_width),
            font_path: self.font_path.or(lower.font_path),
            font_size: self.font_size.or(lower.font_size),
            label_style: self.label_style.or(lower.label_style),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    fn into_config(self) -> ExtendedConfig {
        let mut process = ProcessConfig::default();
        let layout = &mut process.layout;

        if let Some(v) = self.threshold {
            process.threshold = v;
        }
        if let Some(v) = self.min_scene_len {
            process.min_scene_len = v;
        }
        if let Some(v) = self.frames_per_scene {
            process.frames_per_scene = v;
        }
        if let Some(v) = self.output_dir {
            process.output_dir = v;
        }
        if let Some(v) = self.write_metadata {
            process.write_metadata = v;
        }
        if let Some(v) = self.downloader {
            process.downloader = v;
        }
        if let Some(v) = self.layout {
            layout.mode = v;
        }
        if let Some(v) = self.columns {
            layout.columns = v;
        }
        if let Some(v) = self.thumb_width {
            layout.thumb_width = v;
        }
        if let Some(v) = self.padding {
            layout.padding = v;
        }
        if let Some(v) = self.border_width {
            layout.border_width = v;
        }
        if self.font_path.is_some() {
            layout.font_path = self.font_path;
        }
        if let Some(v) = self.font_size {
            layout.font_size = v;
        }
        if let Some(v) = self.label_style {
            layout.label_style = v;
        }

        ExtendedConfig {
            process,
            log_level: self.log_level.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}

impl From<&CliOverrides> for ConfigLayer {
    fn from(cli: &CliOverrides) -> Self {
        ConfigLayer {
            threshold: cli.threshold,
            min_scene_len: cli.min_scene_len,
            frames_per_scene: cli.frames_per_scene,
            output_dir: cli.output_dir.clone(),
            write_metadata: cli.write_metadata,
            layout: cli.layout,
            columns: cli.columns,
            thumb_width: cli.thumb_width,
            font_path: cli.font_path.clone(),
            log_level: cli.log_level.clone(),
            ..ConfigLayer::default()
        }
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from every source, priority: command line > environment > config file > defaults
    ///
    /// An explicit `config_file` must exist. Without one the default
    /// locations are searched and a missing file is not an error. Values that
    /// do not parse are reported instead of being skipped.
    pub fn load_config(config_file: Option<&Path>, overrides: &CliOverrides) -> Result<ExtendedConfig> {
        // 1. config file
        let file_layer = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load_from_default_locations()?.unwrap_or_default(),
        };

        // 2. environment
        let env_layer = Self::load_from_env()?;

        // 3. merge
        let config = ConfigLayer::from(overrides).or(env_layer).or(file_layer).into_config();

        config
            .log_level
            .parse::<Level>()
            .map_err(|_| anyhow::anyhow!("invalid log level `{}`", config.log_level))?;
        config.process.validate()?;

        Ok(config)
    }

    fn load_from_env() -> Result<ConfigLayer> {
        Self::layer_from_vars(|name| env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Build a layer from `SCENE_SHEET_*` style variables, `lookup` receives the unprefixed name.
    fn layer_from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<ConfigLayer> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let var = |name: &str| format!("{}{}", ENV_PREFIX, name);

        Ok(ConfigLayer {
            threshold: parse_value(get("THRESHOLD"), &var("THRESHOLD"))?,
            min_scene_len: parse_value(get("MIN_SCENE_LEN"), &var("MIN_SCENE_LEN"))?,
            frames_per_scene: parse_value(get("FRAMES_PER_SCENE"), &var("FRAMES_PER_SCENE"))?,
            output_dir: get("OUTPUT_DIR").map(PathBuf::from),
            write_metadata: parse_bool(get("METADATA"), &var("METADATA"))?,
            downloader: get("DOWNLOADER"),
            layout: parse_value(get("LAYOUT"), &var("LAYOUT"))?,
            columns: parse_value(get("COLUMNS"), &var("COLUMNS"))?,
            thumb_width: parse_value(get("THUMB_WIDTH"), &var("THUMB_WIDTH"))?,
            font_path: get("FONT").map(PathBuf::from),
            log_level: get("LOG_LEVEL"),
            ..ConfigLayer::default()
        })
    }

    /// Load a layer from an INI config file
    fn load_from_file(config_path: &Path) -> Result<ConfigLayer> {
        if !config_path.exists() {
            anyhow::bail!("config file does not exist: {}", config_path.display());
        }

        let mut ini = Ini::new();
        ini.load(config_path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", config_path.display(), e))?;

        Self::layer_from_ini(&ini).with_context(|| format!("invalid config file {}", config_path.display()))
    }

    fn layer_from_ini(ini: &Ini) -> Result<ConfigLayer> {
        let get = |section: &str, key: &str| ini.get(section, key).filter(|v| !v.trim().is_empty());

        Ok(ConfigLayer {
            threshold: parse_value(get("scene_sheet", "threshold"), "scene_sheet.threshold")?,
            min_scene_len: parse_value(get("scene_sheet", "min_scene_len"), "scene_sheet.min_scene_len")?,
            frames_per_scene: parse_value(
                get("scene_sheet", "frames_per_scene"),
                "scene_sheet.frames_per_scene",
            )?,
            output_dir: get("scene_sheet", "output_dir").map(PathBuf::from),
            write_metadata: parse_bool(get("scene_sheet", "write_metadata"), "scene_sheet.write_metadata")?,
            downloader: get("scene_sheet", "downloader"),
            layout: parse_value(get("layout", "mode"), "layout.mode")?,
            columns: parse_value(get("layout", "columns"), "layout.columns")?,
            thumb_width: parse_value(get("layout", "thumb_width"), "layout.thumb_width")?,
            padding: parse_value(get("layout", "padding"), "layout.padding")?,
            border_width: parse_value(get("layout", "border_width"), "layout.border_width")?,
            font_path: get("layout", "font_path").map(PathBuf::from),
            font_size: parse_value(get("layout", "font_size"), "layout.font_size")?,
            label_style: parse_value(get("layout", "label_style"), "layout.label_style")?,
            log_level: get("logging", "level"),
        })
    }

    /// First config file found in the default locations, if any
    fn load_from_default_locations() -> Result<Option<ConfigLayer>> {
        let mut candidates = vec![PathBuf::from("scene-sheet.ini"), PathBuf::from(".scene-sheet.ini")];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".scene-sheet.ini"));
        }
        candidates.push(PathBuf::from("/etc/scene-sheet.ini"));

        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Self::load_from_file(path).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_value<T>(raw: Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value `{}` for {}: {}", v, key, e))
    })
    .transpose()
}

fn parse_bool(raw: Option<String>, key: &str) -> Result<Option<bool>> {
    raw.map(|v| match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("invalid value `{}` for {}: expected true or false", v, key)),
    })
    .transpose()
}
