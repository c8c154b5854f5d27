//! Canon merge.
//!
//! Approval re-reads a run's `raw_llm_output.txt`, parses it the same way
//! extraction does, and appends every claim not already present to the
//! canon markdown files:
//!
//! | Category | Target |
//! |----------|--------|
//! | world facts | `01_CANON/world.md` |
//! | timeline events | `01_CANON/timeline.md` |
//! | character facts | `02_CHARACTERS/<slug>.md` |
//!
//! Canon files are append-only. Each approval adds one section per touched
//! file, headed by the run id and a UTC timestamp; nothing already in the
//! file is rewritten beyond trailing whitespace.
//!
//! Dedupe is textual. A bullet's key is its text with the leading dash and
//! any trailing `(high)` / `(med)` / `(low)` / `(medium)` marker stripped,
//! so re-approving a run converges to appending nothing. Model text has its
//! whitespace runs folded to single spaces first, so every claim renders as
//! exactly one line.
//!
//! All target content is computed before the first write. Writes are
//! per file; a crash between files can leave canon partially updated.

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::error::IngestError;
use crate::parse::parse_extractor_output;
use crate::schema::{ConfidenceVocabulary, ExtractorOutput, ProposedFact};
use crate::workspace::{
    validate_run_id, ProjectLayout, APPROVAL_REPORT_FILE, RAW_OUTPUT_FILE, SOURCE_TRACE_FILE,
};

static CONFIDENCE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*\((high|med|low|medium)\)\s*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalResult {
    pub run_id: String,
    pub approved_dir: PathBuf,
    pub world_facts_added: usize,
    pub timeline_events_added: usize,
    pub characters_touched: usize,
    pub character_facts_added: usize,
}

/// Bullets that will be appended to one character file.
#[derive(Debug, Clone)]
struct CharacterBlock {
    name: String,
    path: PathBuf,
    existing: HashSet<String>,
    lines: Vec<String>,
}

/// Dedupe key of one markdown line, or `None` if it is not a bullet.
pub fn claim_key(line: &str) -> Option<String> {
    let line = line.trim();
    if !line.starts_with('-') {
        return None;
    }
    let body = line.trim_start_matches('-').trim();
    let key = CONFIDENCE_MARKER.replace(body, "");
    let key = key.trim();
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

/// Keys of every bullet already in `path`. A missing file has none.
pub fn read_existing_claims(path: &Path) -> Result<HashSet<String>> {
    if !path.is_file() {
        return Ok(HashSet::new());
    }
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&raw)
        .lines()
        .filter_map(claim_key)
        .collect())
}

pub fn format_fact_line(claim: &str, confidence: &str) -> String {
    if confidence.is_empty() {
        format!("- {}", claim)
    } else {
        format!("- {} ({})", claim, confidence)
    }
}

/// Collapse every whitespace run, newlines included, to one space.
/// Model text is folded this way before it is keyed or rendered, so each
/// claim stays a single canon bullet.
pub fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn event_key(when: &str, what: &str) -> String {
    if when.is_empty() {
        what.to_string()
    } else {
        format!("{}: {}", when, what)
    }
}

/// Push bullets for `facts` whose claims are not in `seen`; `seen` grows
/// as lines are accepted so a claim lands at most once per file.
fn collect_fact_lines(facts: &[ProposedFact], seen: &mut HashSet<String>, out: &mut Vec<String>) {
    for f in facts {
        let claim = single_line(&f.claim);
        if claim.is_empty() {
            continue;
        }
        if seen.insert(claim.clone()) {
            out.push(format_fact_line(&claim, f.confidence.as_str()));
        }
    }
}

/// Render one appended canon section.
pub fn render_section(title: &str, stamp: &str, lines: &[String]) -> String {
    let mut block = vec![format!("## {}", title), format!("_Approved: {}_", stamp), String::new()];
    block.extend(lines.iter().cloned());
    block.push(String::new());
    block.join("\n")
}

/// Existing content of `path` with trailing whitespace normalized to one
/// blank separator line, or `header` if the file does not exist yet.
fn section_prefix(path: &Path, header: Option<&str>) -> Result<String> {
    if path.is_file() {
        let raw =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let text = String::from_utf8_lossy(&raw);
        return Ok(format!("{}\n\n", text.trim_end()));
    }
    Ok(header.map(str::to_string).unwrap_or_default())
}

fn append_section(path: &Path, header: Option<&str>, section: &str) -> Result<()> {
    let mut content = section_prefix(path, header)?;
    content.push_str(section);
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::debug!(path = %path.display(), "appended canon section");
    Ok(())
}

/// Everything one approval would append, computed without writing.
#[derive(Debug, Clone)]
struct MergePlan {
    world_lines: Vec<String>,
    timeline_lines: Vec<String>,
    characters: Vec<CharacterBlock>,
}

impl MergePlan {
    fn build(layout: &ProjectLayout, output: &ExtractorOutput) -> Result<Self> {
        let mut world_seen = read_existing_claims(&layout.canon_world())?;
        let mut world_lines = Vec::new();
        collect_fact_lines(&output.world.facts, &mut world_seen, &mut world_lines);

        let mut timeline_seen = read_existing_claims(&layout.canon_timeline())?;
        let mut timeline_lines = Vec::new();
        for ev in &output.timeline.events {
            let when = single_line(&ev.when);
            let what = single_line(&ev.what);
            if what.is_empty() {
                continue;
            }
            let key = event_key(&when, &what);
            if timeline_seen.insert(key.clone()) {
                timeline_lines.push(format_fact_line(&key, ev.confidence.as_str()));
            }
        }

        // characters sharing a slug share a file and a dedupe set
        let mut characters: Vec<CharacterBlock> = Vec::new();
        for ch in &output.characters {
            let name = single_line(&ch.name);
            if name.is_empty() {
                if !ch.facts.is_empty() {
                    tracing::warn!(facts = ch.facts.len(), "skipping character with blank name");
                }
                continue;
            }
            let path = layout.character_file(&name);
            let idx = match characters.iter().position(|b| b.path == path) {
                Some(i) => i,
                None => {
                    characters.push(CharacterBlock {
                        name,
                        existing: read_existing_claims(&path)?,
                        path,
                        lines: Vec::new(),
                    });
                    characters.len() - 1
                }
            };
            let block = &mut characters[idx];
            collect_fact_lines(&ch.facts, &mut block.existing, &mut block.lines);
        }
        characters.retain(|b| !b.lines.is_empty());

        Ok(Self {
            world_lines,
            timeline_lines,
            characters,
        })
    }

    fn character_facts(&self) -> usize {
        self.characters.iter().map(|b| b.lines.len()).sum()
    }

    fn report(&self, run_id: &str, project: &Path) -> String {
        let mut lines = vec![
            format!("# Approval report: {}", run_id),
            String::new(),
            format!("Project: {}", project.display()),
            String::new(),
            "## Summary".to_string(),
            format!("- World facts added: {}", self.world_lines.len()),
            format!("- Timeline events added: {}", self.timeline_lines.len()),
            format!("- Characters touched: {}", self.characters.len()),
            format!("- Character facts added: {}", self.character_facts()),
            String::new(),
            "## Details".to_string(),
        ];
        if !self.world_lines.is_empty() {
            lines.push("### World".to_string());
            lines.push(String::new());
            lines.extend(self.world_lines.iter().cloned());
            lines.push(String::new());
        }
        if !self.timeline_lines.is_empty() {
            lines.push("### Timeline".to_string());
            lines.push(String::new());
            lines.extend(self.timeline_lines.iter().cloned());
            lines.push(String::new());
        }
        if !self.characters.is_empty() {
            lines.push("### Characters".to_string());
            lines.push(String::new());
            for block in &self.characters {
                lines.push(format!("#### {}", block.name));
                lines.push(String::new());
                lines.extend(block.lines.iter().cloned());
                lines.push(String::new());
            }
        }
        lines.join("\n")
    }
}

/// Approve proposal run `run_id` of the project at `layout`.
///
/// With `dry_run` the returned counts are exactly those a real approval
/// would report, and nothing on disk is touched.
///
/// # Errors
///
/// - [`IngestError::InvalidArgument`] for a run id that is not a plain
///   directory name.
/// - [`IngestError::NotFound`] if the run directory or its raw reply is
///   missing.
/// - Parse errors from the raw reply. Canon is untouched in every error
///   case above.
pub fn approve_run(layout: &ProjectLayout, run_id: &str, dry_run: bool) -> Result<ApprovalResult> {
    validate_run_id(run_id)?;
    let run_dir = layout.proposal_run_dir(run_id);
    if !run_dir.is_dir() {
        return Err(IngestError::not_found("proposal run", run_dir).into());
    }
    let raw_path = run_dir.join(RAW_OUTPUT_FILE);
    if !raw_path.is_file() {
        return Err(IngestError::not_found("raw model output", raw_path).into());
    }

    let raw = std::fs::read(&raw_path)
        .with_context(|| format!("Failed to read {}", raw_path.display()))?;
    let output = parse_extractor_output(
        &String::from_utf8_lossy(&raw),
        &ConfidenceVocabulary::standard(),
    )?;

    let plan = MergePlan::build(layout, &output)?;
    let approved_dir = layout.approved_dir(run_id);
    let result = ApprovalResult {
        run_id: run_id.to_string(),
        approved_dir: approved_dir.clone(),
        world_facts_added: plan.world_lines.len(),
        timeline_events_added: plan.timeline_lines.len(),
        characters_touched: plan.characters.len(),
        character_facts_added: plan.character_facts(),
    };

    if dry_run {
        tracing::info!(run_id, "dry run, canon not modified");
        return Ok(result);
    }

    for dir in [&layout.canon_dir(), &layout.characters_dir(), &approved_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let stamp = Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
    let facts_title = format!("Approved ingest facts ({})", run_id);

    if !plan.world_lines.is_empty() {
        let section = render_section(&facts_title, &stamp, &plan.world_lines);
        append_section(&layout.canon_world(), None, &section)?;
    }
    if !plan.timeline_lines.is_empty() {
        let title = format!("Approved ingest timeline ({})", run_id);
        let section = render_section(&title, &stamp, &plan.timeline_lines);
        append_section(&layout.canon_timeline(), None, &section)?;
    }
    for block in &plan.characters {
        let section = render_section(&facts_title, &stamp, &block.lines);
        let header = format!("# {}\n\n", block.name);
        append_section(&block.path, Some(&header), &section)?;
    }

    let project = std::fs::canonicalize(layout.root()).unwrap_or_else(|_| layout.root().to_path_buf());
    let report_path = approved_dir.join(APPROVAL_REPORT_FILE);
    std::fs::write(&report_path, plan.report(run_id, &project))
        .with_context(|| format!("Failed to write {}", report_path.display()))?;
    let trace_path = approved_dir.join(SOURCE_TRACE_FILE);
    std::fs::write(&trace_path, run_dir.display().to_string())
        .with_context(|| format!("Failed to write {}", trace_path.display()))?;

    tracing::info!(
        run_id,
        world = result.world_facts_added,
        timeline = result.timeline_events_added,
        characters = result.characters_touched,
        character_facts = result.character_facts_added,
        "approved run into canon"
    );
    Ok(result)
}
