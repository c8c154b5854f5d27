//! Prompt pack loader.
//!
//! A pack is a versioned directory of prompt templates, guardrail
//! snippets, and an output-schema description, tied together by a
//! `pack.toml` manifest:
//!
//! ```text
//! content/packs/ingest_v1/
//! ├── pack.toml
//! ├── prompts/system.md
//! ├── prompts/user.md
//! ├── schemas/extractor_output.md
//! └── guardrails/*.md
//! ```
//!
//! [`load_pipeline`] resolves one named pipeline into a [`PackPipeline`]
//! with every text field trimmed and terminated by exactly one newline,
//! so concatenation is deterministic.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::IngestError;

pub const MANIFEST_FILE: &str = "pack.toml";

/// Used when the manifest's `[defaults]` omits `temperature`.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;
/// Used when the manifest's `[defaults]` omits `max_output_tokens`.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2500;

/// Files of the `ingest_v1` pack shipped with the binary, as
/// `(relative path, contents)`.
pub const BUNDLED_INGEST_PACK: &[(&str, &str)] = &[
    (
        "pack.toml",
        include_str!("../content/packs/ingest_v1/pack.toml"),
    ),
    (
        "prompts/system.md",
        include_str!("../content/packs/ingest_v1/prompts/system.md"),
    ),
    (
        "prompts/user.md",
        include_str!("../content/packs/ingest_v1/prompts/user.md"),
    ),
    (
        "schemas/extractor_output.md",
        include_str!("../content/packs/ingest_v1/schemas/extractor_output.md"),
    ),
    (
        "guardrails/evidence.md",
        include_str!("../content/packs/ingest_v1/guardrails/evidence.md"),
    ),
    (
        "guardrails/no_invention.md",
        include_str!("../content/packs/ingest_v1/guardrails/no_invention.md"),
    ),
];

#[derive(Debug, Deserialize)]
struct PackManifest {
    #[serde(default)]
    defaults: PackDefaults,
    #[serde(default)]
    pipelines: BTreeMap<String, PipelineEntry>,
}

#[derive(Debug, Deserialize, Default)]
struct PackDefaults {
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PipelineEntry {
    prompts: PromptPaths,
    schema: PathBuf,
    #[serde(default)]
    guardrails: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct PromptPaths {
    system: PathBuf,
    user: PathBuf,
}

/// One resolved pipeline of a pack.
#[derive(Debug, Clone, PartialEq)]
pub struct PackPipeline {
    /// `"<pack>:<pipeline>"`.
    pub name: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub guardrails: Vec<String>,
    pub schema_text: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl PackPipeline {
    /// Guardrails in manifest order, followed by the system prompt.
    pub fn assemble_system(&self) -> String {
        let mut out: String = self.guardrails.concat();
        out.push_str(&self.system_prompt);
        out
    }

    /// Fill the user template's `{{filename}}`, `{{schema}}`, and
    /// `{{chunk_text}}` placeholders. The chunk block is substituted last
    /// so placeholder-like text inside the source is left alone.
    pub fn assemble_user(&self, filename: &str, chunk_text: &str) -> String {
        self.user_prompt
            .replace("{{filename}}", filename)
            .replace("{{schema}}", self.schema_text.trim_end())
            .replace("{{chunk_text}}", chunk_text)
    }
}

/// Pack name plus the pipelines its manifest declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub name: String,
    pub path: PathBuf,
    pub pipelines: Vec<String>,
}

fn read_text(path: &Path, what: &str) -> Result<String> {
    if !path.is_file() {
        return Err(IngestError::not_found(what, path).into());
    }
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&raw);
    Ok(format!("{}\n", text.trim()))
}

fn read_manifest(pack_root: &Path) -> Result<PackManifest> {
    let manifest_path = pack_root.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(IngestError::not_found("pack", manifest_path).into());
    }
    let content = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse pack manifest {}", manifest_path.display()))
}

/// Load `pipeline` from `<pack_dir>/<pack>/pack.toml`.
///
/// # Errors
///
/// [`IngestError::NotFound`] if the pack manifest, the named pipeline, or
/// any file it references is missing.
pub fn load_pipeline(pack_dir: &Path, pack: &str, pipeline: &str) -> Result<PackPipeline> {
    let pack_root = pack_dir.join(pack);
    let manifest = read_manifest(&pack_root)?;

    let entry = manifest.pipelines.get(pipeline).ok_or_else(|| {
        IngestError::not_found(
            format!("pipeline '{}'", pipeline),
            pack_root.join(MANIFEST_FILE),
        )
    })?;

    let guardrails = entry
        .guardrails
        .iter()
        .map(|p| read_text(&pack_root.join(p), "guardrail"))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!(pack, pipeline, guardrails = guardrails.len(), "loaded pack pipeline");

    Ok(PackPipeline {
        name: format!("{}:{}", pack, pipeline),
        system_prompt: read_text(&pack_root.join(&entry.prompts.system), "system prompt")?,
        user_prompt: read_text(&pack_root.join(&entry.prompts.user), "user prompt")?,
        guardrails,
        schema_text: read_text(&pack_root.join(&entry.schema), "schema")?,
        temperature: manifest
            .defaults
            .temperature
            .unwrap_or(DEFAULT_TEMPERATURE),
        max_output_tokens: manifest
            .defaults
            .max_output_tokens
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
    })
}

/// List every pack directly under `pack_dir` that has a manifest.
/// Directories whose manifest fails to parse are reported with no pipelines.
pub fn list_packs(pack_dir: &Path) -> Result<Vec<PackSummary>> {
    if !pack_dir.is_dir() {
        return Err(IngestError::not_found("pack directory", pack_dir).into());
    }

    let mut packs = Vec::new();
    for entry in WalkDir::new(pack_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_dir() || !entry.path().join(MANIFEST_FILE).is_file() {
            continue;
        }
        let pipelines = match read_manifest(entry.path()) {
            Ok(m) => m.pipelines.into_keys().collect(),
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "unreadable pack manifest");
                Vec::new()
            }
        };
        packs.push(PackSummary {
            name: entry.file_name().to_string_lossy().to_string(),
            path: entry.path().to_path_buf(),
            pipelines,
        });
    }
    Ok(packs)
}

/// Write the bundled `ingest_v1` pack under `pack_dir`, skipping files
/// that already exist. Returns the number of files written.
pub fn install_bundled_pack(pack_dir: &Path) -> Result<usize> {
    let root = pack_dir.join("ingest_v1");
    let mut written = 0;
    for (rel, contents) in BUNDLED_INGEST_PACK {
        let path = root.join(rel);
        if path.exists() {
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pack(root: &Path, manifest: &str) {
        let pack = root.join("test_pack");
        fs::create_dir_all(pack.join("prompts")).unwrap();
        fs::write(pack.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(pack.join("prompts/system.md"), "\n\n  Be careful.  \n\n").unwrap();
        fs::write(pack.join("prompts/user.md"), "File {{filename}}\n{{chunk_text}}").unwrap();
        fs::write(pack.join("schema.md"), "{\"world\":{}}").unwrap();
        fs::write(pack.join("g1.md"), "Rule one.").unwrap();
        fs::write(pack.join("g2.md"), "Rule two.\n\n\n").unwrap();
    }

    const MANIFEST: &str = r#"
[defaults]
temperature = 0.5
max_output_tokens = 900

[pipelines.extract]
schema = "schema.md"
guardrails = ["g1.md", "g2.md"]

[pipelines.extract.prompts]
system = "prompts/system.md"
user = "prompts/user.md"
"#;

    #[test]
    fn test_load_pipeline_normalizes_text() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), MANIFEST);
        let p = load_pipeline(tmp.path(), "test_pack", "extract").unwrap();
        assert_eq!(p.name, "test_pack:extract");
        assert_eq!(p.system_prompt, "Be careful.\n");
        assert_eq!(p.guardrails, vec!["Rule one.\n", "Rule two.\n"]);
        assert_eq!(p.schema_text, "{\"world\":{}}\n");
        assert_eq!(p.temperature, 0.5);
        assert_eq!(p.max_output_tokens, 900);
        assert_eq!(p.assemble_system(), "Rule one.\nRule two.\nBe careful.\n");
    }

    #[test]
    fn test_defaults_fall_back_to_constants() {
        let tmp = TempDir::new().unwrap();
        let manifest = MANIFEST.replace("temperature = 0.5\nmax_output_tokens = 900\n", "");
        write_pack(tmp.path(), &manifest);
        let p = load_pipeline(tmp.path(), "test_pack", "extract").unwrap();
        assert_eq!(p.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(p.max_output_tokens, DEFAULT_MAX_OUTPUT_TOKENS);
    }

    #[test]
    fn test_assemble_user_substitutes_placeholders() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), MANIFEST);
        let p = load_pipeline(tmp.path(), "test_pack", "extract").unwrap();
        let user = p.assemble_user("ch1.txt", "## chunk_001 [ch1.txt:L1-L2]\nhello {{filename}}\n");
        assert!(user.starts_with("File ch1.txt\n"));
        assert!(user.contains("hello {{filename}}"));
    }

    #[test]
    fn test_missing_pack() {
        let tmp = TempDir::new().unwrap();
        let err = load_pipeline(tmp.path(), "nope", "extract").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::NotFound { .. })
        ));
    }

    #[test]
    fn test_missing_pipeline() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), MANIFEST);
        let err = load_pipeline(tmp.path(), "test_pack", "summarize").unwrap_err();
        match err.downcast_ref::<IngestError>() {
            Some(IngestError::NotFound { what, .. }) => assert!(what.contains("summarize")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_referenced_file() {
        let tmp = TempDir::new().unwrap();
        write_pack(tmp.path(), MANIFEST);
        fs::remove_file(tmp.path().join("test_pack/g2.md")).unwrap();
        let err = load_pipeline(tmp.path(), "test_pack", "extract").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::NotFound { .. })
        ));
    }

    #[test]
    fn test_bundled_pack_loads() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(install_bundled_pack(tmp.path()).unwrap(), BUNDLED_INGEST_PACK.len());
        assert_eq!(install_bundled_pack(tmp.path()).unwrap(), 0);
        let p = load_pipeline(tmp.path(), "ingest_v1", "ingest_extract").unwrap();
        assert_eq!(p.guardrails.len(), 2);
        assert!(p.assemble_user("a.txt", "X").contains("\"timeline\""));

        let packs = list_packs(tmp.path()).unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].name, "ingest_v1");
        assert_eq!(packs[0].pipelines, vec!["ingest_extract".to_string()]);
    }

    #[test]
    fn test_install_into_blocked_dir_names_path() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ingest_v1"), "").unwrap();
        let err = install_bundled_pack(tmp.path()).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Failed to create"), "{}", msg);
        assert!(msg.contains("ingest_v1"), "{}", msg);
    }
}
