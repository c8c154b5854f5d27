//! Extraction evaluation harness.
//!
//! A dataset is a TOML file of cases. Each case names an input document
//! and loose expectations about what extraction should find in it:
//!
//! ```toml
//! [[cases]]
//! id = "winnie_ch1"
//! input = "inputs/winnie_ch1.txt"   # relative to the dataset file
//!
//! [cases.expected]
//! characters_min = 3
//! must_include_names = ["Pooh", "Christopher Robin"]
//! ```
//!
//! Every case runs a real extraction (one proposal run per case) and is
//! checked against the `parsed.json` it produced. A case whose extraction
//! fails counts as a failed case; the remaining cases still run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extract::{run_extract, ExtractOptions};
use crate::llm::LanguageModel;
use crate::schema::ExtractorOutput;
use crate::workspace::{ProjectLayout, PARSED_FILE};

pub const REPORT_FILE: &str = "latest_ingest_eval.json";

#[derive(Debug, Clone, Deserialize)]
pub struct EvalDataset {
    #[serde(default)]
    pub cases: Vec<EvalCase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub id: String,
    pub input: PathBuf,
    #[serde(default)]
    pub expected: Expectations,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectations {
    #[serde(default)]
    pub characters_min: usize,
    #[serde(default)]
    pub must_include_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case: String,
    pub ok: bool,
    pub run_dir: Option<PathBuf>,
    pub characters_count: usize,
    pub missing_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub dataset: PathBuf,
    pub passed: usize,
    pub failed: usize,
    pub cases: Vec<CaseReport>,
}

impl EvalReport {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Load a dataset; relative case inputs are resolved against the dataset
/// file's directory.
pub fn load_dataset(path: &Path) -> Result<EvalDataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read eval dataset {}", path.display()))?;
    let mut dataset: EvalDataset = toml::from_str(&content)
        .with_context(|| format!("Failed to parse eval dataset {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for case in &mut dataset.cases {
        if case.input.is_relative() {
            case.input = base.join(&case.input);
        }
    }
    Ok(dataset)
}

/// Grade one parsed record against a case's expectations.
pub fn grade(case: &EvalCase, output: &ExtractorOutput) -> (bool, Vec<String>) {
    let missing: Vec<String> = case
        .expected
        .must_include_names
        .iter()
        .filter(|want| !output.characters.iter().any(|c| c.name == want.as_str()))
        .cloned()
        .collect();
    let ok = output.characters.len() >= case.expected.characters_min && missing.is_empty();
    (ok, missing)
}

async fn eval_case(
    layout: &ProjectLayout,
    base: &ExtractOptions,
    case: &EvalCase,
    model: &dyn LanguageModel,
) -> Result<CaseReport> {
    let options = ExtractOptions {
        input_path: case.input.clone(),
        ..base.clone()
    };
    let result = run_extract(layout, &options, model).await?;
    let parsed_path = result.proposals_dir.join(PARSED_FILE);
    let parsed = std::fs::read_to_string(&parsed_path)
        .with_context(|| format!("Failed to read {}", parsed_path.display()))?;
    let output: ExtractorOutput = serde_json::from_str(&parsed)?;

    let (ok, missing_names) = grade(case, &output);
    Ok(CaseReport {
        case: case.id.clone(),
        ok,
        run_dir: Some(result.proposals_dir),
        characters_count: output.characters.len(),
        missing_names,
        error: None,
    })
}

/// Run every case of `dataset` in order.
///
/// `base` supplies chunking, pack, and model settings; its input path is
/// replaced per case.
pub async fn run_eval(
    layout: &ProjectLayout,
    base: &ExtractOptions,
    dataset_path: &Path,
    model: &dyn LanguageModel,
) -> Result<EvalReport> {
    let dataset = load_dataset(dataset_path)?;
    let mut cases = Vec::with_capacity(dataset.cases.len());

    for case in &dataset.cases {
        let report = match eval_case(layout, base, case, model).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(case = %case.id, error = %e, "eval case failed to extract");
                CaseReport {
                    case: case.id.clone(),
                    ok: false,
                    run_dir: None,
                    characters_count: 0,
                    missing_names: case.expected.must_include_names.clone(),
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        tracing::info!(case = %report.case, ok = report.ok, characters = report.characters_count, "eval case done");
        cases.push(report);
    }

    let passed = cases.iter().filter(|c| c.ok).count();
    Ok(EvalReport {
        dataset: dataset_path.to_path_buf(),
        passed,
        failed: cases.len() - passed,
        cases,
    })
}

/// Write `report` to `00_INGEST/eval_reports/latest_ingest_eval.json`.
pub fn write_report(layout: &ProjectLayout, report: &EvalReport) -> Result<PathBuf> {
    let dir = layout.eval_reports_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json + "\n")
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
