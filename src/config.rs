use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptRootConfig {
    pub root: PathBuf,
    #[serde(default = "ScriptRootConfig::default_recursive")]
    pub recursive: bool,
    pub suffix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderConfig {
    /// `0` picks a worker count from the available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "ScriptRootConfig::default_tilesets")]
    pub tilesets: ScriptRootConfig,
    #[serde(default = "ScriptRootConfig::default_map_generators")]
    pub map_generators: ScriptRootConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl ScriptRootConfig {
    pub fn new(root: impl Into<PathBuf>, recursive: bool, suffix: impl Into<String>) -> Self {
        Self { root: root.into(), recursive, suffix: suffix.into() }
    }

    const fn default_recursive() -> bool {
        true
    }

    fn default_tilesets() -> Self {
        Self::new("data/tilesets", true, ".tileset.rhai")
    }

    fn default_map_generators() -> Self {
        Self::new("data/mapgen", true, ".mapgen.rhai")
    }
}

impl LoaderConfig {
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism().map(|n| n.get().clamp(2, 4)).unwrap_or(2)
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            tilesets: ScriptRootConfig::default_tilesets(),
            map_generators: ScriptRootConfig::default_map_generators(),
            loader: LoaderConfig::default(),
        }
    }
}

impl AssetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}
