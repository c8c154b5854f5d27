//! Proposal artifacts for operator review.
//!
//! Markdown files are for humans reading a run before approving it;
//! JSON files are the same records, one per item, for tooling. Item
//! files are named `<NNN>_<slug>` where `NNN` is the 1-based position in
//! the parsed record, so two characters both called "Owl" never collide.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::schema::{
    Evidence, ExtractorOutput, OpenQuestion, ProposedCharacter, ProposedFact, ProposedTimeline,
    ProposedWorld,
};
use crate::workspace::bounded_slug;

const ITEM_SLUG_MAX: usize = 48;

fn evidence_lines(out: &mut Vec<String>, evidence: &[Evidence]) {
    for ev in evidence {
        if ev.note.is_empty() {
            out.push(format!("- [source: {}]", ev.source));
        } else {
            out.push(format!("- [source: {}] — {}", ev.source, ev.note));
        }
    }
}

fn fact_lines(out: &mut Vec<String>, facts: &[ProposedFact]) {
    if facts.is_empty() {
        out.push("- (none)".to_string());
    }
    for f in facts {
        out.push(format!("- {}  (confidence: {})", f.claim, f.confidence));
        evidence_lines(out, &f.evidence);
    }
}

fn question_lines(out: &mut Vec<String>, questions: &[OpenQuestion]) {
    if questions.is_empty() {
        out.push("- (none)".to_string());
    }
    for q in questions {
        out.push(format!("- {}", q.question));
        evidence_lines(out, &q.evidence);
    }
}

pub fn render_character_md(ch: &ProposedCharacter) -> String {
    let mut lines = vec![
        format!("# Proposed Character: {}", ch.name),
        String::new(),
        "## Facts (proposed)".to_string(),
    ];
    fact_lines(&mut lines, &ch.facts);
    lines.push(String::new());
    lines.push("## Open questions".to_string());
    question_lines(&mut lines, &ch.open_questions);
    lines.push(String::new());
    lines.join("\n")
}

pub fn render_world_md(world: &ProposedWorld) -> String {
    let mut lines = vec![
        "# Proposed World Facts".to_string(),
        String::new(),
        "## Facts (proposed)".to_string(),
    ];
    fact_lines(&mut lines, &world.facts);
    lines.push(String::new());
    lines.push("## Open questions".to_string());
    question_lines(&mut lines, &world.open_questions);
    lines.push(String::new());
    lines.join("\n")
}

pub fn render_timeline_md(timeline: &ProposedTimeline) -> String {
    let mut lines = vec!["# Proposed Timeline".to_string(), String::new()];
    if timeline.events.is_empty() {
        lines.push("- (none)".to_string());
    }
    for e in &timeline.events {
        lines.push(format!(
            "- **{}** — {}  (confidence: {})",
            e.when, e.what, e.confidence
        ));
        evidence_lines(&mut lines, &e.evidence);
    }
    lines.push(String::new());
    lines.join("\n")
}

/// `001_owl`, `002_the-hundred-acre-wood-is-north-of`...
pub fn item_stem(ordinal: usize, label: &str) -> String {
    format!("{:03}_{}", ordinal, bounded_slug(label, ITEM_SLUG_MAX, "item"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json + "\n").with_context(|| format!("Failed to write {}", path.display()))
}

fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Counts of files written by [`write_proposal_files`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposalFiles {
    pub characters: usize,
    pub entities: usize,
    pub timeline_events: usize,
}

/// Write the canonical `parsed.json` plus every rendered proposal file
/// into `run_dir`.
pub fn write_proposal_files(run_dir: &Path, output: &ExtractorOutput) -> Result<ProposalFiles> {
    write_json(&run_dir.join(crate::workspace::PARSED_FILE), output)?;

    write_text(&run_dir.join("world.md"), &render_world_md(&output.world))?;
    write_text(
        &run_dir.join("timeline.md"),
        &render_timeline_md(&output.timeline),
    )?;

    let characters_dir = run_dir.join("characters");
    let entities_dir = run_dir.join("entities");
    let world_dir = run_dir.join("world");
    let timeline_dir = run_dir.join("timeline");
    for dir in [&characters_dir, &entities_dir, &world_dir, &timeline_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    write_json(&world_dir.join("world.json"), &output.world)?;
    write_json(&timeline_dir.join("timeline.json"), &output.timeline)?;

    let mut files = ProposalFiles::default();

    for (i, ch) in output.characters.iter().enumerate() {
        let stem = item_stem(i + 1, &ch.name);
        write_text(
            &characters_dir.join(format!("{}.md", stem)),
            &render_character_md(ch),
        )?;
        write_json(&characters_dir.join(format!("{}.json", stem)), ch)?;
        files.characters += 1;
    }

    for (i, fact) in output.world.facts.iter().enumerate() {
        let stem = item_stem(i + 1, &fact.claim);
        write_json(&entities_dir.join(format!("{}.json", stem)), fact)?;
        files.entities += 1;
    }

    for (i, event) in output.timeline.events.iter().enumerate() {
        let label = if event.when.trim().is_empty() {
            event.what.clone()
        } else {
            format!("{} {}", event.when, event.what)
        };
        let stem = item_stem(i + 1, &label);
        write_json(&timeline_dir.join(format!("{}.json", stem)), event)?;
        files.timeline_events += 1;
    }

    Ok(files)
}
