use anyhow::{Context, Result};
use directories::ProjectDirs;
use facecheck_vision::{EngineOptions, ModelPaths, StreamRequest};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "facecheck")
}

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACECHECK_CONFIG_PATH") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facecheck.toml")),
});

pub static DEFAULT_MODEL_DIR: Lazy<PathBuf> = Lazy::new(|| match option_env!("FACECHECK_MODEL_DIR") {
    Some(p) => PathBuf::from(p),
    None => project_dirs()
        .map(|d| d.data_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from("models")),
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: String,
    pub model_dir: PathBuf,
    /// Cosine distance above which a test face counts as unknown.
    pub max_distance: f32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub capture_width: u32,
    pub capture_height: u32,
    /// JPEG quality for captured frames, 1-100.
    pub capture_quality: u8,
    /// Analyze every n-th frame of a video input.
    pub video_frame_stride: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "/dev/video0".to_string(),
            model_dir: DEFAULT_MODEL_DIR.clone(),
            max_distance: 0.6,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            capture_width: 640,
            capture_height: 480,
            capture_quality: 90,
            video_frame_stride: 6,
        }
    }
}

impl Config {
    pub fn stream_request(&self) -> StreamRequest {
        StreamRequest {
            device: self.camera.clone(),
            width: self.capture_width,
            height: self.capture_height,
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            max_distance: self.max_distance,
        }
    }

    fn validate(self) -> Result<Self> {
        if !(1..=100).contains(&self.capture_quality) {
            anyhow::bail!("capture_quality must be within 1..=100, got {}", self.capture_quality);
        }
        if self.video_frame_stride == 0 {
            anyhow::bail!("video_frame_stride must be at least 1");
        }
        if self.capture_width == 0 || self.capture_height == 0 {
            anyhow::bail!("capture size must be non-zero");
        }
        Ok(self)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.stream_request().width, 640);
        assert_eq!(cfg.stream_request().height, 480);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "camera = \"/dev/video2\"\nmax_distance = 0.4\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.camera, "/dev/video2");
        assert_eq!(cfg.max_distance, 0.4);
        assert_eq!(cfg.capture_quality, 90);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            video_frame_stride: 3,
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn test_rejects_bad_quality() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "capture_quality = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
