//! Layered configuration: hardcoded defaults beaten by the user-scope
//! file, then the project-scope file, then environment overrides.
//!
//! Later layers only override fields they actually set; lists merge by
//! append+dedupe so project excludes add to the defaults. Writes to the
//! user-scope file keep timestamped backups, newest three retained.

use crate::chunker::ChunkerConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const ENV_PREFIX: &str = "AMANMCP_";
pub const CONFIG_FILE: &str = "config.toml";
/// Timestamped user-config backups retained on write.
pub const BACKUP_KEEP: usize = 3;

const KNOWN_PROVIDERS: &[&str] = &["hash", "ollama", "disabled"];

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub cooldown_secs: u64,
    pub idle_secs: u64,
    pub min_orphans: usize,
    pub orphan_ratio: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_secs: 3600,
            idle_secs: 30,
            min_orphans: 100,
            orphan_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub embeddings_provider: String,
    pub embeddings_model: String,
    pub ollama_host: String,
    pub log_level: String,
    pub transport: String,
    pub bm25_weight: f64,
    pub semantic_weight: f64,
    pub rrf_constant: f64,
    pub max_projects: usize,
    pub max_chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub classifier_cache_size: usize,
    /// Path patterns excluded from indexing, on top of gitignore.
    pub exclude: Vec<String>,
    pub compaction: CompactionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embeddings_provider: "hash".to_string(),
            embeddings_model: String::new(),
            ollama_host: "http://127.0.0.1:11434".to_string(),
            log_level: "info".to_string(),
            transport: "unix".to_string(),
            bm25_weight: 0.35,
            semantic_weight: 0.65,
            rrf_constant: 60.0,
            max_projects: 5,
            max_chunk_tokens: 512,
            overlap_tokens: 64,
            classifier_cache_size: 10_000,
            exclude: vec![".git".to_string(), "node_modules".to_string(), "target".to_string()],
            compaction: CompactionConfig::default(),
        }
    }
}

impl Config {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_tokens: self.max_chunk_tokens,
            overlap_tokens: self.overlap_tokens,
        }
    }

    /// Check invariants shared by every layer combination.
    pub fn validate(&self) -> Result<()> {
        if !KNOWN_PROVIDERS.contains(&self.embeddings_provider.as_str()) {
            return Err(Error::Config(format!(
                "unknown embeddings provider {:?} (expected one of {})",
                self.embeddings_provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }
        let sum = self.bm25_weight + self.semantic_weight;
        if (sum - 1.0).abs() > 0.01 {
            return Err(Error::Config(format!(
                "bm25_weight + semantic_weight must equal 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Layer patches
// ---------------------------------------------------------------------------

/// One configuration layer. Unset fields leave the accumulated value
/// alone; counts are parsed signed so negatives can be rejected instead of
/// wrapping.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Patch {
    embeddings_provider: Option<String>,
    embeddings_model: Option<String>,
    ollama_host: Option<String>,
    log_level: Option<String>,
    transport: Option<String>,
    bm25_weight: Option<f64>,
    semantic_weight: Option<f64>,
    rrf_constant: Option<f64>,
    max_projects: Option<i64>,
    max_chunk_tokens: Option<i64>,
    overlap_tokens: Option<i64>,
    classifier_cache_size: Option<i64>,
    exclude: Option<Vec<String>>,
    compaction: Option<CompactionPatch>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CompactionPatch {
    enabled: Option<bool>,
    cooldown_secs: Option<i64>,
    idle_secs: Option<i64>,
    min_orphans: Option<i64>,
    orphan_ratio: Option<f64>,
}

fn count(field: &str, value: i64) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| Error::Config(format!("{field} must not be negative, got {value}")))
}

impl Patch {
    fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    /// Environment layer. An empty variable counts as unset.
    fn from_env() -> Self {
        fn var(name: &str) -> Option<String> {
            std::env::var(format!("{ENV_PREFIX}{name}")).ok().filter(|v| !v.is_empty())
        }
        fn var_f64(name: &str) -> Option<f64> {
            var(name).and_then(|v| match v.parse() {
                Ok(f) => Some(f),
                Err(_) => {
                    warn!(var = name, value = v.as_str(), "ignoring unparseable env override");
                    None
                }
            })
        }
        Patch {
            embeddings_provider: var("EMBEDDINGS_PROVIDER"),
            embeddings_model: var("EMBEDDINGS_MODEL"),
            ollama_host: var("OLLAMA_HOST"),
            log_level: var("LOG_LEVEL"),
            transport: var("TRANSPORT"),
            bm25_weight: var_f64("BM25_WEIGHT"),
            semantic_weight: var_f64("SEMANTIC_WEIGHT"),
            rrf_constant: var_f64("RRF_CONSTANT"),
            ..Default::default()
        }
    }

    /// Fold this layer into the accumulated config. Empty strings are
    /// treated as unset; lists append and dedupe.
    fn apply(self, config: &mut Config) -> Result<()> {
        fn set_str(target: &mut String, value: Option<String>) {
            if let Some(v) = value {
                if !v.is_empty() {
                    *target = v;
                }
            }
        }
        set_str(&mut config.embeddings_provider, self.embeddings_provider);
        set_str(&mut config.embeddings_model, self.embeddings_model);
        set_str(&mut config.ollama_host, self.ollama_host);
        set_str(&mut config.log_level, self.log_level);
        set_str(&mut config.transport, self.transport);
        if let Some(v) = self.bm25_weight {
            config.bm25_weight = v;
        }
        if let Some(v) = self.semantic_weight {
            config.semantic_weight = v;
        }
        if let Some(v) = self.rrf_constant {
            config.rrf_constant = v;
        }
        if let Some(v) = self.max_projects {
            config.max_projects = count("max_projects", v)?;
        }
        if let Some(v) = self.max_chunk_tokens {
            config.max_chunk_tokens = count("max_chunk_tokens", v)?;
        }
        if let Some(v) = self.overlap_tokens {
            config.overlap_tokens = count("overlap_tokens", v)?;
        }
        if let Some(v) = self.classifier_cache_size {
            config.classifier_cache_size = count("classifier_cache_size", v)?;
        }
        if let Some(extra) = self.exclude {
            for item in extra {
                if !config.exclude.contains(&item) {
                    config.exclude.push(item);
                }
            }
        }
        if let Some(c) = self.compaction {
            if let Some(v) = c.enabled {
                config.compaction.enabled = v;
            }
            if let Some(v) = c.cooldown_secs {
                config.compaction.cooldown_secs = count("compaction.cooldown_secs", v)? as u64;
            }
            if let Some(v) = c.idle_secs {
                config.compaction.idle_secs = count("compaction.idle_secs", v)? as u64;
            }
            if let Some(v) = c.min_orphans {
                config.compaction.min_orphans = count("compaction.min_orphans", v)?;
            }
            if let Some(v) = c.orphan_ratio {
                config.compaction.orphan_ratio = v;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// User-scope config path: `~/.amanmcp/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".amanmcp").join(CONFIG_FILE))
}

/// Project-scope config path: `<root>/.amanmcp/config.toml`.
pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(".amanmcp").join(CONFIG_FILE)
}

fn apply_file(config: &mut Config, path: &Path) -> Result<()> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(path = %path.display(), "applying config layer");
            Patch::from_toml(&text)?.apply(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Resolve the effective configuration: defaults → user file → project
/// file → environment. Validation runs on the final merge.
pub fn resolve(user_path: Option<&Path>, project_root: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();
    let user = user_path.map(PathBuf::from).or_else(user_config_path);
    if let Some(path) = user {
        apply_file(&mut config, &path)?;
    }
    if let Some(root) = project_root {
        apply_file(&mut config, &project_config_path(root))?;
    }
    Patch::from_env().apply(&mut config)?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// User-config writes with backups
// ---------------------------------------------------------------------------

/// Write the user-scope config, backing up the existing file first.
/// Backups are timestamped copies next to the file; only the newest
/// `BACKUP_KEEP` are retained, pruning is best-effort.
pub fn write_user_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let backup = path.with_extension(format!("toml.{}.{:09}.bak", ts.as_secs(), ts.subsec_nanos()));
        if let Err(e) = std::fs::copy(path, &backup) {
            warn!(error = %e, "could not back up user config");
        }
        prune_backups(path);
    }
    let text = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("could not serialize config: {e}")))?;
    std::fs::write(path, text)?;
    Ok(())
}

fn prune_backups(path: &Path) {
    let Some(parent) = path.parent() else { return };
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { return };
    let prefix = format!("{stem}.toml.");

    let mut backups: Vec<PathBuf> = match std::fs::read_dir(parent) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix) && n.ends_with(".bak"))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => return,
    };
    // Timestamps sort lexicographically within the fixed-width name.
    backups.sort();
    while backups.len() > BACKUP_KEEP {
        let victim = backups.remove(0);
        if let Err(e) = std::fs::remove_file(&victim) {
            warn!(path = %victim.display(), error = %e, "could not prune config backup");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.max_projects, 5);
        assert_eq!(config.rrf_constant, 60.0);
        assert!(config.compaction.enabled);
    }

    #[test]
    fn test_later_layer_overrides_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "max_projects = 9\nlog_level = \"debug\"\n").unwrap();

        let root = dir.path().join("proj");
        std::fs::create_dir_all(root.join(".amanmcp")).unwrap();
        std::fs::write(project_config_path(&root), "log_level = \"warn\"\n").unwrap();

        let config = resolve(Some(&user), Some(&root)).unwrap();
        assert_eq!(config.max_projects, 9, "user layer survives");
        assert_eq!(config.log_level, "warn", "project layer wins");
    }

    #[test]
    fn test_unset_fields_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "transport = \"\"\nmax_chunk_tokens = 256\n").unwrap();
        let config = resolve(Some(&user), None).unwrap();
        assert_eq!(config.transport, "unix", "empty string is unset");
        assert_eq!(config.max_chunk_tokens, 256);
    }

    #[test]
    fn test_env_override_and_empty_is_unset() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "embeddings_model = \"from-file\"\n").unwrap();

        std::env::set_var("AMANMCP_EMBEDDINGS_MODEL", "from-env");
        std::env::set_var("AMANMCP_OLLAMA_HOST", "");
        let config = resolve(Some(&user), None).unwrap();
        std::env::remove_var("AMANMCP_EMBEDDINGS_MODEL");
        std::env::remove_var("AMANMCP_OLLAMA_HOST");

        assert_eq!(config.embeddings_model, "from-env", "env beats file");
        assert_eq!(config.ollama_host, Config::default().ollama_host, "empty env var is unset");
    }

    #[test]
    fn test_exclude_lists_merge_append_dedupe() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "exclude = [\"vendor\", \"target\"]\n").unwrap();
        let config = resolve(Some(&user), None).unwrap();
        assert!(config.exclude.contains(&"vendor".to_string()));
        assert!(config.exclude.contains(&".git".to_string()), "defaults kept");
        let targets = config.exclude.iter().filter(|e| e.as_str() == "target").count();
        assert_eq!(targets, 1, "deduped");
    }

    #[test]
    fn test_negative_count_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "max_projects = -2\n").unwrap();
        let err = resolve(Some(&user), None).unwrap_err();
        assert!(err.to_string().contains("max_projects"));
    }

    #[test]
    fn test_weight_sum_validated() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "bm25_weight = 0.8\nsemantic_weight = 0.4\n").unwrap();
        let err = resolve(Some(&user), None).unwrap_err();
        assert!(err.to_string().contains("1.0"));

        // Within tolerance passes.
        std::fs::write(&user, "bm25_weight = 0.701\nsemantic_weight = 0.3\n").unwrap();
        resolve(Some(&user), None).unwrap();
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        std::fs::write(&user, "embeddings_provider = \"mystery\"\n").unwrap();
        let err = resolve(Some(&user), None).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_backup_retention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::default();
        for _ in 0..6 {
            write_user_config(&config, &path).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert!(backups <= BACKUP_KEEP, "expected at most {BACKUP_KEEP} backups, got {backups}");
    }
}
