use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the project configuration, relative to the project root.
pub const CONFIG_FILE: &str = "project.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectMeta,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectMeta {
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectMeta {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "Story Project".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines_per_chunk: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_pack_dir")]
    pub pack_dir: PathBuf,
    #[serde(default = "default_pack")]
    pub pack: String,
    #[serde(default = "default_pipeline")]
    pub pipeline: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_lines_per_chunk: default_max_lines(),
            overlap: default_overlap(),
            pack_dir: default_pack_dir(),
            pack: default_pack(),
            pipeline: default_pipeline(),
        }
    }
}

fn default_max_lines() -> usize {
    80
}
fn default_overlap() -> usize {
    10
}
fn default_pack_dir() -> PathBuf {
    PathBuf::from("content/packs")
}
fn default_pack() -> String {
    "ingest_v1".to_string()
}
fn default_pipeline() -> String {
    "ingest_extract".to_string()
}

impl IngestConfig {
    /// Resolve `pack_dir` against the project root unless it is absolute.
    pub fn resolved_pack_dir(&self, project_root: &Path) -> PathBuf {
        if self.pack_dir.is_absolute() {
            self.pack_dir.clone()
        } else {
            project_root.join(&self.pack_dir)
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.ingest.max_lines_per_chunk == 0 {
        anyhow::bail!("ingest.max_lines_per_chunk must be > 0");
    }

    if config.llm.model.trim().is_empty() {
        anyhow::bail!("llm.model must not be empty");
    }

    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    match config.llm.provider.as_str() {
        "openai" | "stub" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or stub.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(body: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        std::fs::write(&path, body).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let (_tmp, path) = write_config("");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.ingest.max_lines_per_chunk, 80);
        assert_eq!(cfg.ingest.overlap, 10);
        assert_eq!(cfg.ingest.pack, "ingest_v1");
        assert_eq!(cfg.ingest.pipeline, "ingest_extract");
    }

    #[test]
    fn test_overrides() {
        let (_tmp, path) = write_config(
            r#"
[project]
name = "Hundred Acre"

[llm]
provider = "stub"
model = "local-test"

[ingest]
max_lines_per_chunk = 40
overlap = 5
pack_dir = "/opt/packs"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.project.name, "Hundred Acre");
        assert_eq!(cfg.llm.provider, "stub");
        assert_eq!(cfg.ingest.max_lines_per_chunk, 40);
        assert_eq!(
            cfg.ingest.resolved_pack_dir(Path::new("/proj")),
            PathBuf::from("/opt/packs")
        );
    }

    #[test]
    fn test_relative_pack_dir_resolves_under_project() {
        let cfg = Config::default();
        assert_eq!(
            cfg.ingest.resolved_pack_dir(Path::new("/proj")),
            PathBuf::from("/proj/content/packs")
        );
    }

    #[test]
    fn test_zero_max_lines_rejected() {
        let (_tmp, path) = write_config("[ingest]\nmax_lines_per_chunk = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_lines_per_chunk"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let (_tmp, path) = write_config("[llm]\nprovider = \"carrier-pigeon\"\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }
}
