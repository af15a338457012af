use anyhow::{Context, Result};
use rollcall_core::RosterSource;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where a new day's ledger rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterKind {
    Dataset,
    Gallery,
}

impl FromStr for RosterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dataset" => Ok(Self::Dataset),
            "gallery" => Ok(Self::Gallery),
            other => Err(format!("unknown roster source {other:?}")),
        }
    }
}

/// Runtime configuration: defaults, then the TOML file, then `ROLLCALL_*`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub gallery_path: PathBuf,
    pub attendance_dir: PathBuf,
    /// `{name}_{id}` photo folders; also the default roster.
    pub dataset_dir: PathBuf,
    /// ArcFace-style ONNX embedding model.
    pub model_path: PathBuf,
    /// Cosine similarity a match must exceed.
    pub similarity_threshold: f32,
    pub camera_index: u32,
    /// Frames discarded after opening the camera (auto-exposure settling).
    pub warmup_frames: usize,
    pub skip_dark_frames: bool,
    pub roster_source: RosterKind,
}

/// Every field optional; present fields replace the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    gallery_path: Option<PathBuf>,
    attendance_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    model_path: Option<PathBuf>,
    similarity_threshold: Option<f32>,
    camera_index: Option<u32>,
    warmup_frames: Option<usize>,
    skip_dark_frames: Option<bool>,
    roster_source: Option<RosterKind>,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = Self::with_data_dir(default_data_dir(&env));

        if let Some(path) = config_file_path(&env) {
            if path.exists() {
                config.apply_file(&path)?;
                tracing::debug!(path = %path.display(), "config file loaded");
            }
        }

        config.apply_env(env);
        Ok(config)
    }

    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            gallery_path: data_dir.join("gallery.json"),
            attendance_dir: data_dir.join("attendance"),
            dataset_dir: data_dir.join("dataset"),
            model_path: data_dir.join("models").join("arcface.onnx"),
            similarity_threshold: rollcall_core::DEFAULT_THRESHOLD,
            camera_index: 0,
            warmup_frames: 4,
            skip_dark_frames: true,
            roster_source: RosterKind::Dataset,
        }
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let file: ConfigFile =
            toml::from_str(&text).with_context(|| format!("parse config file {}", path.display()))?;

        if let Some(v) = file.gallery_path {
            self.gallery_path = v;
        }
        if let Some(v) = file.attendance_dir {
            self.attendance_dir = v;
        }
        if let Some(v) = file.dataset_dir {
            self.dataset_dir = v;
        }
        if let Some(v) = file.model_path {
            self.model_path = v;
        }
        if let Some(v) = file.similarity_threshold {
            self.set_threshold(v, "config file");
        }
        if let Some(v) = file.camera_index {
            self.camera_index = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.skip_dark_frames {
            self.skip_dark_frames = v;
        }
        if let Some(v) = file.roster_source {
            self.roster_source = v;
        }
        Ok(())
    }

    /// Unparsable values keep whatever the earlier layers set.
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ROLLCALL_GALLERY_PATH") {
            self.gallery_path = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_ATTENDANCE_DIR") {
            self.attendance_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_DATASET_DIR") {
            self.dataset_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        let threshold = env_parse(&env, "ROLLCALL_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.set_threshold(threshold, "ROLLCALL_SIMILARITY_THRESHOLD");
        self.camera_index = env_parse(&env, "ROLLCALL_CAMERA_INDEX", self.camera_index);
        self.warmup_frames = env_parse(&env, "ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        self.roster_source = env_parse(&env, "ROLLCALL_ROSTER_SOURCE", self.roster_source);
        self.skip_dark_frames = env("ROLLCALL_SKIP_DARK_FRAMES")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(self.skip_dark_frames);
    }

    /// Cosine scores live in [-1, 1]; anything else (or NaN) keeps the
    /// current value.
    fn set_threshold(&mut self, value: f32, origin: &str) {
        if value.is_finite() && (-1.0..=1.0).contains(&value) {
            self.similarity_threshold = value;
        } else {
            tracing::warn!(origin, value, "similarity threshold must be within [-1, 1]; ignoring");
        }
    }

    pub fn roster_source(&self) -> RosterSource {
        match self.roster_source {
            RosterKind::Dataset => RosterSource::Dataset(self.dataset_dir.clone()),
            RosterKind::Gallery => RosterSource::Gallery,
        }
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn config_file_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = env("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("rollcall").join("config.toml"))
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match env(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
                current
            }
        },
        None => current,
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::with_data_dir(PathBuf::from("/data/rollcall"));
        assert_eq!(config.gallery_path, PathBuf::from("/data/rollcall/gallery.json"));
        assert_eq!(config.model_path, PathBuf::from("/data/rollcall/models/arcface.onnx"));
        assert!((config.similarity_threshold - 0.45).abs() < 1e-6);
        assert_eq!(config.warmup_frames, 4);
        assert!(config.skip_dark_frames);
        assert_eq!(config.roster_source, RosterKind::Dataset);
    }

    #[test]
    fn test_default_data_dir() {
        let xdg = env_of(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/a")]);
        assert_eq!(default_data_dir(&xdg), PathBuf::from("/xdg/rollcall"));

        let home = env_of(&[("HOME", "/home/a")]);
        assert_eq!(default_data_dir(&home), PathBuf::from("/home/a/.local/share/rollcall"));
    }

    #[test]
    fn test_config_file_path() {
        let explicit = env_of(&[("ROLLCALL_CONFIG", "/etc/rc.toml"), ("HOME", "/home/a")]);
        assert_eq!(config_file_path(&explicit), Some(PathBuf::from("/etc/rc.toml")));

        let home = env_of(&[("HOME", "/home/a")]);
        assert_eq!(
            config_file_path(&home),
            Some(PathBuf::from("/home/a/.config/rollcall/config.toml"))
        );
        assert_eq!(config_file_path(&env_of(&[])), None);
    }

    #[test]
    fn test_file_overrides_subset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "similarity_threshold = 0.6\nroster_source = \"gallery\"\nskip_dark_frames = false\n",
        )
        .unwrap();

        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        config.apply_file(&path).unwrap();

        assert!((config.similarity_threshold - 0.6).abs() < 1e-6);
        assert_eq!(config.roster_source, RosterKind::Gallery);
        assert!(!config.skip_dark_frames);
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.gallery_path, PathBuf::from("/d/gallery.json"));
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "threshhold = 0.6\n").unwrap();

        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        assert!(config.apply_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        config.apply_env(env_of(&[
            ("ROLLCALL_GALLERY_PATH", "/g.json"),
            ("ROLLCALL_SIMILARITY_THRESHOLD", "0.5"),
            ("ROLLCALL_CAMERA_INDEX", "2"),
            ("ROLLCALL_SKIP_DARK_FRAMES", "off"),
            ("ROLLCALL_ROSTER_SOURCE", "Gallery"),
        ]));

        assert_eq!(config.gallery_path, PathBuf::from("/g.json"));
        assert!((config.similarity_threshold - 0.5).abs() < 1e-6);
        assert_eq!(config.camera_index, 2);
        assert!(!config.skip_dark_frames);
        assert_eq!(config.roster_source(), RosterSource::Gallery);
    }

    #[test]
    fn test_env_unparsable_keeps_previous() {
        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        config.camera_index = 3;
        config.apply_env(env_of(&[
            ("ROLLCALL_CAMERA_INDEX", "front"),
            ("ROLLCALL_WARMUP_FRAMES", "-1"),
            ("ROLLCALL_SKIP_DARK_FRAMES", "maybe"),
            ("ROLLCALL_ROSTER_SOURCE", "ldap"),
        ]));

        assert_eq!(config.camera_index, 3);
        assert_eq!(config.warmup_frames, 4);
        assert!(config.skip_dark_frames);
        assert_eq!(config.roster_source, RosterKind::Dataset);
        assert_eq!(config.roster_source(), RosterSource::Dataset(PathBuf::from("/d/dataset")));
    }

    #[test]
    fn test_out_of_range_threshold_keeps_previous_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "similarity_threshold = 0.6\n").unwrap();

        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        config.apply_file(&path).unwrap();
        for bad in ["NaN", "inf", "1.5", "-2"] {
            config.apply_env(env_of(&[("ROLLCALL_SIMILARITY_THRESHOLD", bad)]));
            assert!((config.similarity_threshold - 0.6).abs() < 1e-6, "{bad} was accepted");
        }

        std::fs::write(&path, "similarity_threshold = nan\n").unwrap();
        let mut config = Config::with_data_dir(PathBuf::from("/d"));
        config.apply_file(&path).unwrap();
        assert!((config.similarity_threshold - 0.45).abs() < 1e-6);
    }
}
