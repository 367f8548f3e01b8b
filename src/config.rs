//! Configuration for scamshield.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SCAMSHIELD_HOME)
//! 2. Config file (.scamshield/config.yaml)
//! 3. Defaults (~/.scamshield, built-in engine settings)
//!
//! Config file discovery:
//! - Searches current directory and parents for .scamshield/config.yaml
//! - Paths in the config file are relative to the .scamshield/ directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::EngineConfig;
use crate::sources::DomainRecord;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const HOME_ENV: &str = "SCAMSHIELD_HOME";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub reputation: ReputationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (recorded analyses)
    pub home: Option<String>,
    /// Labelled exemplar corpus (JSONL)
    pub exemplars: Option<String>,
}

/// Offline reputation tables used by the built-in sources
#[derive(Debug, Clone, Deserialize)]
pub struct ReputationConfig {
    /// Known sending domains
    #[serde(default)]
    pub domains: HashMap<String, DomainRecord>,

    /// Glob patterns over URL hosts
    #[serde(default)]
    pub blocklist: Vec<String>,

    #[serde(default = "default_blocklist_confidence")]
    pub blocklist_confidence: f64,
}

fn default_blocklist_confidence() -> f64 {
    0.9
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            domains: HashMap::new(),
            blocklist: Vec::new(),
            blocklist_confidence: default_blocklist_confidence(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Exemplars returned per content query
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_dimension() -> usize {
    256
}
fn default_top_k() -> usize {
    5
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            top_k: default_top_k(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Exemplar corpus, if configured
    pub exemplars: Option<PathBuf>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Validated engine settings
    pub engine: EngineConfig,
    pub reputation: ReputationConfig,
    pub embedding: EmbeddingConfig,
}

impl ResolvedConfig {
    /// Directory holding recorded analyses
    pub fn analyses_dir(&self) -> PathBuf {
        self.home.join("analyses")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".scamshield").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Build the resolved configuration from an optional file and home override
fn resolve(config_file: Option<PathBuf>, env_home: Option<PathBuf>) -> Result<ResolvedConfig> {
    let default_home = || -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".scamshield"))
    };

    let Some(config_path) = config_file else {
        let home = match env_home {
            Some(home) => home,
            None => default_home()?,
        };
        return Ok(ResolvedConfig {
            home,
            exemplars: None,
            config_file: None,
            engine: EngineConfig::default(),
            reputation: ReputationConfig::default(),
            embedding: EmbeddingConfig::default(),
        });
    };

    let file = load_config_file(&config_path)?;
    file.engine
        .validate()
        .with_context(|| format!("Invalid engine settings in {}", config_path.display()))?;

    let config_dir = config_path.parent().unwrap_or(Path::new("."));

    let home = match (env_home, &file.paths.home) {
        (Some(home), _) => home,
        (None, Some(home)) => resolve_path(config_dir, home),
        (None, None) => default_home()?,
    };

    let exemplars = file
        .paths
        .exemplars
        .as_deref()
        .map(|path| resolve_path(config_dir, path));

    Ok(ResolvedConfig {
        home,
        exemplars,
        config_file: Some(config_path),
        engine: file.engine,
        reputation: file.reputation,
        embedding: file.embedding,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let env_home = std::env::var(HOME_ENV).ok().map(PathBuf::from);
    resolve(find_config_file(), env_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Get the recorded analyses directory ($SCAMSHIELD_HOME/analyses)
pub fn analyses_dir() -> Result<PathBuf> {
    Ok(config()?.analyses_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceId;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(temp: &TempDir, yaml: &str) -> PathBuf {
        let dir = temp.path().join(".scamshield");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", yaml).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve(None, Some(PathBuf::from("/tmp/shield"))).unwrap();
        assert_eq!(config.home, PathBuf::from("/tmp/shield"));
        assert_eq!(config.analyses_dir(), PathBuf::from("/tmp/shield/analyses"));
        assert!(config.config_file.is_none());
        assert!(config.exemplars.is_none());
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./state
  exemplars: /data/exemplars.jsonl
engine:
  collection:
    global_deadline_ms: 3000
    optional_sources: []
  prior_score: 15
reputation:
  domains:
    example.com: { age_days: 4000, spf_pass: true }
  blocklist: ["*.paypa1.com"]
embedding:
  dimension: 128
"#,
        );

        let config = resolve(Some(path.clone()), None).unwrap();
        assert_eq!(config.config_file, Some(path));
        assert_eq!(config.exemplars, Some(PathBuf::from("/data/exemplars.jsonl")));
        assert!(config.home.ends_with("state"));
        assert_eq!(config.engine.collection.global_deadline_ms, 3000);
        assert_eq!(config.engine.prior_score, Some(15));
        assert_eq!(
            config.engine.source_order(),
            vec![
                SourceId::SenderReputation,
                SourceId::UrlInspection,
                SourceId::ContentAnalysis
            ]
        );
        assert_eq!(config.reputation.domains["example.com"].age_days, Some(4000));
        assert_eq!(config.reputation.blocklist_confidence, 0.9);
        assert_eq!(config.embedding.dimension, 128);
        assert_eq!(config.embedding.top_k, 5);
    }

    #[test]
    fn test_env_home_wins_over_file() {
        let temp = TempDir::new().unwrap();
        let path = write_config(&temp, "version: \"1.0\"\npaths:\n  home: ./state\n");
        let config = resolve(Some(path), Some(PathBuf::from("/override"))).unwrap();
        assert_eq!(config.home, PathBuf::from("/override"));
    }

    #[test]
    fn test_invalid_engine_settings_fail_fast() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            "version: \"1.0\"\nengine:\n  rules:\n    score_thresholds: [0, 50, 40, 90]\n",
        );
        assert!(resolve(Some(path), None).is_err());
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.scamshield");

        assert_eq!(
            resolve_path(&base, "./corpus.jsonl"),
            PathBuf::from("/home/user/project/.scamshield/corpus.jsonl")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
