//! Service configuration
//!
//! Values resolve in three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. TOML file named by `RA_CONFIG_PATH` (if set)
//! 3. Environment variables (after `.env` loading)

use crate::longevity::model::{ModelConfig, ModelKind};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_VAR: &str = "RA_CONFIG_PATH";

/// Development token; replace via `API_BEARER_TOKEN` in any real deployment.
pub const DEFAULT_BEARER_TOKEN: &str = "demo-token-replace-in-production";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory for run artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_bearer_token")]
    pub api_bearer_token: String,

    #[serde(default)]
    pub model: ModelConfig,

    /// Request body cap for JSON and CSV uploads.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("./artifacts")
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_bearer_token() -> String {
    DEFAULT_BEARER_TOKEN.to_string()
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: default_artifacts_dir(),
            bind_addr: default_bind_addr(),
            api_bearer_token: default_bearer_token(),
            model: ModelConfig::default(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl AppConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve using `lookup` for variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = match var(CONFIG_PATH_VAR) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };

        if let Some(dir) = var("RA_ARTIFACTS_DIR") {
            config.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(addr) = var("RA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(token) = var("API_BEARER_TOKEN") {
            config.api_bearer_token = token;
        }
        if let Some(kind) = var("RA_MODEL_KIND") {
            config.model.kind = parse_model_kind(&kind)?;
        }
        if let Some(n) = var("RA_N_ESTIMATORS") {
            config.model.n_estimators = n.parse().context("RA_N_ESTIMATORS must be an integer")?;
        }
        if let Some(seed) = var("RA_MODEL_SEED") {
            config.model.seed = seed.parse().context("RA_MODEL_SEED must be an integer")?;
        }
        if let Some(bytes) = var("RA_MAX_BODY_BYTES") {
            config.max_body_bytes = bytes.parse().context("RA_MAX_BODY_BYTES must be an integer")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.n_estimators == 0 {
            bail!("model.n_estimators must be at least 1");
        }
        if self.api_bearer_token.is_empty() {
            bail!("api_bearer_token must not be empty");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be positive");
        }
        Ok(())
    }

    pub fn uses_default_token(&self) -> bool {
        self.api_bearer_token == DEFAULT_BEARER_TOKEN
    }
}

fn parse_model_kind(raw: &str) -> Result<ModelKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "random_forest" => Ok(ModelKind::RandomForest),
        "linear" => Ok(ModelKind::Linear),
        other => bail!("unknown model kind '{}' (expected random_forest or linear)", other),
    }
}

/// Load `.env` from the working directory (and parents), then from the
/// crate directory.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
