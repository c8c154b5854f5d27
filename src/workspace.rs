//! Project directory layout, run identifiers, and scaffolding.
//!
//! ```text
//! <project>/
//! ├── project.toml
//! ├── 00_INGEST/
//! │   ├── inputs/
//! │   ├── proposals/<run_id>/     one directory per extraction run
//! │   ├── approved/<run_id>/      approval report + source trace
//! │   └── eval_reports/
//! ├── 01_CANON/world.md, timeline.md
//! └── 02_CHARACTERS/<slug>.md
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::config::{self, Config, CONFIG_FILE};
use crate::error::IngestError;
use crate::pack;

pub const RAW_OUTPUT_FILE: &str = "raw_llm_output.txt";
pub const PROMPT_FILE: &str = "prompt.md";
pub const PARSED_FILE: &str = "parsed.json";
pub const PARSE_ERRORS_FILE: &str = "parse_errors.txt";
pub const META_FILE: &str = "00_META.md";
pub const APPROVAL_REPORT_FILE: &str = "APPROVAL_REPORT.md";
pub const SOURCE_TRACE_FILE: &str = "source_proposals_path.txt";

const SCAFFOLD_DIRS: &[&str] = &[
    "00_INGEST/inputs",
    "00_INGEST/proposals",
    "01_CANON",
    "02_CHARACTERS",
    "03_OUTLINES",
    "04_DRAFTS",
    "05_RUNS",
    "06_EXPORTS",
];

static SLUG_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Filesystem-safe slug: lowercase, non-alphanumeric runs collapsed to a
/// single `-`, trimmed of leading/trailing hyphens, `"item"` if empty.
pub fn safe_slug(text: &str) -> String {
    slug_or(text, "item")
}

/// Like [`safe_slug`] but capped at `max_len` bytes.
pub fn bounded_slug(text: &str, max_len: usize, fallback: &str) -> String {
    let slug = slug_or(text, fallback);
    if slug.len() <= max_len {
        return slug;
    }
    // slugs are ASCII, so byte slicing is safe
    let cut = slug[..max_len].trim_end_matches('-');
    if cut.is_empty() {
        fallback.to_string()
    } else {
        cut.to_string()
    }
}

fn slug_or(text: &str, fallback: &str) -> String {
    let lowered = text.trim().to_lowercase();
    let slug = SLUG_SEPARATOR.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug.to_string()
    }
}

/// Human-readable, lexicographically sortable run identifier, e.g.
/// `2025-12-26_00-14-03__ingest__winnie-ch1__a1b2c3`.
pub fn make_run_id(label: Option<&str>) -> String {
    let mut parts = vec![
        Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
        "ingest".to_string(),
    ];
    if let Some(label) = label {
        parts.push(bounded_slug(label, 40, "run"));
    }
    let suffix = Uuid::new_v4().simple().to_string();
    parts.push(suffix[..6].to_string());
    parts.join("__")
}

/// Reject run identifiers that could escape the proposals directory.
pub fn validate_run_id(run_id: &str) -> Result<()> {
    let bad = run_id.is_empty()
        || run_id == "."
        || run_id == ".."
        || run_id.contains(['/', '\\'])
        || run_id.contains('\0');
    if bad {
        return Err(IngestError::InvalidArgument(format!("invalid run id: '{}'", run_id)).into());
    }
    Ok(())
}

/// Paths of one project tree. Pure path arithmetic, no I/O.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ingest_dir(&self) -> PathBuf {
        self.root.join("00_INGEST")
    }

    pub fn proposals_dir(&self) -> PathBuf {
        self.ingest_dir().join("proposals")
    }

    pub fn proposal_run_dir(&self, run_id: &str) -> PathBuf {
        self.proposals_dir().join(run_id)
    }

    pub fn approved_dir(&self, run_id: &str) -> PathBuf {
        self.ingest_dir().join("approved").join(run_id)
    }

    pub fn eval_reports_dir(&self) -> PathBuf {
        self.ingest_dir().join("eval_reports")
    }

    pub fn canon_dir(&self) -> PathBuf {
        self.root.join("01_CANON")
    }

    pub fn canon_world(&self) -> PathBuf {
        self.canon_dir().join("world.md")
    }

    pub fn canon_timeline(&self) -> PathBuf {
        self.canon_dir().join("timeline.md")
    }

    pub fn characters_dir(&self) -> PathBuf {
        self.root.join("02_CHARACTERS")
    }

    pub fn character_file(&self, name: &str) -> PathBuf {
        self.characters_dir()
            .join(format!("{}.md", safe_slug(name)))
    }
}

/// An opened project: layout plus its validated configuration.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub layout: ProjectLayout,
    pub config: Config,
}

impl Workspace {
    /// Open a project directory containing `project.toml`.
    pub fn open(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);
        if !config_path.is_file() {
            return Err(IngestError::not_found("project config", config_path).into());
        }
        let config = config::load_config(&config_path)?;
        Ok(Self {
            layout: ProjectLayout::new(project_dir),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.config.ingest.resolved_pack_dir(self.root())
    }
}

/// Create a project skeleton at `target_dir`. Existing files are kept.
pub fn init_project(target_dir: &Path, name: &str) -> Result<()> {
    for dir in SCAFFOLD_DIRS {
        std::fs::create_dir_all(target_dir.join(dir))
            .with_context(|| format!("Failed to create {}", target_dir.join(dir).display()))?;
    }

    write_if_absent(&target_dir.join(CONFIG_FILE), &default_config_toml(name))?;
    write_if_absent(
        &target_dir.join("00_README.md"),
        "# Story Project\n\n\
         This is a human-readable canon workspace.\n\n\
         ## Ingest\n\n\
         - Put raw text into 00_INGEST/inputs/ and run `canon extract <file>`.\n\
         - Review 00_INGEST/proposals/<run_id>/, then run `canon approve <run_id>`.\n",
    )?;

    let written = pack::install_bundled_pack(&target_dir.join("content/packs"))?;
    tracing::info!(project = %target_dir.display(), pack_files = written, "project initialized");
    Ok(())
}

fn write_if_absent(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn default_config_toml(name: &str) -> String {
    // toml::Value gives us correct string escaping for the project name
    let quoted = toml::Value::String(name.to_string()).to_string();
    format!(
        r#"[project]
name = {}

[llm]
provider = "openai"
model = "gpt-4.1-mini"
timeout_secs = 120

[ingest]
max_lines_per_chunk = 80
overlap = 10
pack_dir = "content/packs"
pack = "ingest_v1"
pipeline = "ingest_extract"
"#,
        quoted
    )
}

/// Where a proposal run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No parsed record and no parse error yet.
    Pending,
    Parsed,
    ParseFailed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Parsed => "parsed",
            RunState::ParseFailed => "parse_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub run_id: String,
    pub state: RunState,
    pub approved: bool,
}

/// All proposal runs, sorted by run id (and therefore by creation time).
pub fn list_runs(layout: &ProjectLayout) -> Result<Vec<RunStatus>> {
    let proposals = layout.proposals_dir();
    if !proposals.is_dir() {
        return Ok(Vec::new());
    }

    let mut runs = Vec::new();
    for entry in std::fs::read_dir(&proposals)
        .with_context(|| format!("Failed to list {}", proposals.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let run_id = entry.file_name().to_string_lossy().to_string();
        let dir = entry.path();
        let state = if dir.join(PARSED_FILE).is_file() {
            RunState::Parsed
        } else if dir.join(PARSE_ERRORS_FILE).is_file() {
            RunState::ParseFailed
        } else {
            RunState::Pending
        };
        let approved = layout.approved_dir(&run_id).is_dir();
        runs.push(RunStatus {
            run_id,
            state,
            approved,
        });
    }
    runs.sort_by(|a, b| a.run_id.cmp(&b.run_id));
    Ok(runs)
}
