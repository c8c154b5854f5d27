//! Extraction orchestration.
//!
//! Coordinates one proposal run: read input → chunk → load pack pipeline
//! → assemble prompt → model call → parse → render proposals. Every run
//! gets a fresh directory under `00_INGEST/proposals/` and that directory
//! is written once, never revisited.
//!
//! The prompt and the raw model reply are persisted before parsing is
//! attempted. When parsing fails, a `parse_errors.txt` is written next
//! to them and the error is returned; no `parsed.json` or proposal files
//! exist for that run.

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::chunk::{chunk_lines, split_lines_keep_ends};
use crate::config::Config;
use crate::error::IngestError;
use crate::llm::{ChatMessage, LanguageModel};
use crate::models::TextChunk;
use crate::pack::load_pipeline;
use crate::parse::parse_extractor_output;
use crate::render::{write_proposal_files, ProposalFiles};
use crate::schema::{ConfidenceVocabulary, SCHEMA_VERSION};
use crate::workspace::{
    make_run_id, ProjectLayout, META_FILE, PARSE_ERRORS_FILE, PROMPT_FILE, RAW_OUTPUT_FILE,
};

/// Parameters of one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub input_path: PathBuf,
    pub max_lines_per_chunk: usize,
    pub overlap: usize,
    pub pack_dir: PathBuf,
    pub pack: String,
    pub pipeline: String,
    pub model: String,
}

impl ExtractOptions {
    /// Options taken from the project config, for the given input file.
    pub fn from_config(config: &Config, project_root: &Path, input_path: &Path) -> Self {
        Self {
            input_path: input_path.to_path_buf(),
            max_lines_per_chunk: config.ingest.max_lines_per_chunk,
            overlap: config.ingest.overlap,
            pack_dir: config.ingest.resolved_pack_dir(project_root),
            pack: config.ingest.pack.clone(),
            pipeline: config.ingest.pipeline.clone(),
            model: config.llm.model.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractResult {
    pub run_id: String,
    pub proposals_dir: PathBuf,
    pub chunks: usize,
    pub files: ProposalFiles,
}

/// Render the chunk block substituted for `{{chunk_text}}`.
///
/// Each chunk is headed by its id and its citation string, e.g.
/// `## chunk_002 [ch1.txt:L71-L100]`.
pub fn render_chunk_block(chunks: &[TextChunk], filename: &str) -> String {
    chunks
        .iter()
        .map(|c| format!("## {} [{}]\n{}", c.id, c.span.reference(filename), c.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_prompt_md(system: &str, user: &str) -> String {
    format!(
        "# Prompt (assembled)\n\n## system\n{}\n\n## user\n{}\n",
        system, user
    )
}

fn write_artifact(run_dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = run_dir.join(name);
    std::fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

/// Execute one extraction run against `model`.
///
/// # Errors
///
/// - [`IngestError::NotFound`] for a missing input file or pack/pipeline;
///   nothing is written in that case.
/// - [`IngestError::RunExists`] if the run directory already exists.
/// - Model failures, unmodified.
/// - [`IngestError::NoJsonObject`], [`IngestError::MalformedJson`], or
///   [`IngestError::Schema`] when the reply does not parse. The run
///   directory keeps the prompt, raw reply, and `parse_errors.txt`.
pub async fn run_extract(
    layout: &ProjectLayout,
    options: &ExtractOptions,
    model: &dyn LanguageModel,
) -> Result<ExtractResult> {
    let input_path = &options.input_path;
    if !input_path.is_file() {
        return Err(IngestError::not_found("input file", input_path).into());
    }
    let raw_input = std::fs::read(input_path)
        .with_context(|| format!("Failed to read {}", input_path.display()))?;
    let text = String::from_utf8_lossy(&raw_input);
    let lines = split_lines_keep_ends(&text);
    let chunks = chunk_lines(&lines, options.max_lines_per_chunk, options.overlap)?;

    let filename = input_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| input_path.display().to_string());
    let label = input_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string());

    let pipeline = load_pipeline(&options.pack_dir, &options.pack, &options.pipeline)?;
    let system_prompt = pipeline.assemble_system();
    let user_prompt = pipeline.assemble_user(&filename, &render_chunk_block(&chunks, &filename));

    // created
    let run_id = make_run_id(label.as_deref());
    let run_dir = layout.proposal_run_dir(&run_id);
    let proposals_dir = layout.proposals_dir();
    std::fs::create_dir_all(&proposals_dir)
        .with_context(|| format!("Failed to create {}", proposals_dir.display()))?;
    match std::fs::create_dir(&run_dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(IngestError::RunExists(run_dir).into());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to create {}", run_dir.display()));
        }
    }
    tracing::info!(run_id = %run_id, input = %input_path.display(), "created proposal run");
    tracing::debug!(
        chunks = chunks.len(),
        max_lines = options.max_lines_per_chunk,
        overlap = options.overlap,
        "chunked input"
    );

    let mut hasher = Sha256::new();
    hasher.update(&raw_input);
    let input_sha = format!("{:x}", hasher.finalize());

    write_artifact(
        &run_dir,
        META_FILE,
        &format!(
            "# Ingest run {}\n\n\
             - input: {}\n\
             - input_sha256: {}\n\
             - created_utc: {}\n\
             - chunks: {} (max_lines={}, overlap={})\n\
             - pipeline: {}\n\
             - model: {} ({})\n\
             - schema: {}\n",
            run_id,
            input_path.display(),
            input_sha,
            Utc::now().to_rfc3339(),
            chunks.len(),
            options.max_lines_per_chunk,
            options.overlap,
            pipeline.name,
            options.model,
            model.provider(),
            SCHEMA_VERSION,
        ),
    )?;
    write_artifact(
        &run_dir,
        PROMPT_FILE,
        &render_prompt_md(&system_prompt, &user_prompt),
    )?;

    // prompted → awaiting_model
    let messages = [
        ChatMessage::system(system_prompt),
        ChatMessage::user(user_prompt),
    ];
    tracing::info!(run_id = %run_id, model = %options.model, provider = model.provider(), "calling model");
    let reply = model
        .generate(
            &messages,
            &options.model,
            pipeline.temperature,
            pipeline.max_output_tokens,
        )
        .await?;
    tracing::info!(run_id = %run_id, reply_len = reply.len(), "model replied");

    write_artifact(&run_dir, RAW_OUTPUT_FILE, &reply)?;

    let output = match parse_extractor_output(&reply, &ConfidenceVocabulary::standard()) {
        Ok(output) => output,
        Err(err) => {
            let errors_path = run_dir.join(PARSE_ERRORS_FILE);
            write_artifact(&run_dir, PARSE_ERRORS_FILE, &format!("{}\n", err))?;
            tracing::warn!(run_id = %run_id, error = %err, path = %errors_path.display(), "model reply did not parse");
            return Err(err);
        }
    };

    let files = write_proposal_files(&run_dir, &output)?;
    tracing::info!(
        run_id = %run_id,
        characters = output.characters.len(),
        world_facts = output.world_fact_count(),
        timeline_events = output.timeline_event_count(),
        "parsed proposals"
    );

    Ok(ExtractResult {
        run_id,
        proposals_dir: run_dir,
        chunks: chunks.len(),
        files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::install_bundled_pack;
    use crate::schema::ExtractorOutput;
    use crate::workspace::PARSED_FILE;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct CannedModel {
        reply: String,
        seen: Mutex<Vec<ChatMessage>>,
    }

    impl CannedModel {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        fn provider(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            _model: &str,
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        fn provider(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _: &[ChatMessage], _: &str, _: f32, _: u32) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn setup(lines: usize) -> (TempDir, ProjectLayout, ExtractOptions) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("project");
        std::fs::create_dir_all(&root).unwrap();
        let pack_dir = tmp.path().join("packs");
        install_bundled_pack(&pack_dir).unwrap();

        let input = tmp.path().join("chapter1.txt");
        let body: String = (1..=lines).map(|i| format!("Line {} of the tale.\n", i)).collect();
        std::fs::write(&input, body).unwrap();

        let options = ExtractOptions {
            input_path: input,
            max_lines_per_chunk: 80,
            overlap: 10,
            pack_dir,
            pack: "ingest_v1".to_string(),
            pipeline: "ingest_extract".to_string(),
            model: "test-model".to_string(),
        };
        (tmp, ProjectLayout::new(root), options)
    }

    const GOOD_REPLY: &str = r#"Sure! ```json
{"characters":[{"name":"Pooh","facts":[{"claim":"Loves honey","confidence":"High",
  "evidence":[{"source":"chapter1.txt:L1-L80","note":""}]}]}],
 "world":{"facts":[{"claim":"The city has two moons","confidence":"Medium"}]},
 "timeline":{"events":[{"when":"Morning","what":"Pooh wakes","confidence":"low"}]}}
```"#;

    #[test]
    fn test_render_chunk_block() {
        let lines: Vec<String> = (1..=3).map(|i| format!("l{}\n", i)).collect();
        let chunks = chunk_lines(&lines, 2, 0).unwrap();
        let block = render_chunk_block(&chunks, "a.txt");
        assert_eq!(
            block,
            "## chunk_001 [a.txt:L1-L2]\nl1\nl2\n\n\n## chunk_002 [a.txt:L3-L3]\nl3\n"
        );
    }

    #[tokio::test]
    async fn test_successful_run_writes_all_artifacts() {
        let (_tmp, layout, options) = setup(100);
        let model = CannedModel::new(GOOD_REPLY);

        let result = run_extract(&layout, &options, &model).await.unwrap();
        assert_eq!(result.chunks, 2);
        let dir = &result.proposals_dir;
        assert_eq!(dir, &layout.proposal_run_dir(&result.run_id));
        for f in [META_FILE, PROMPT_FILE, RAW_OUTPUT_FILE, PARSED_FILE, "world.md", "timeline.md"] {
            assert!(dir.join(f).is_file(), "missing {}", f);
        }
        assert!(!dir.join(PARSE_ERRORS_FILE).exists());
        assert_eq!(std::fs::read_to_string(dir.join(RAW_OUTPUT_FILE)).unwrap(), GOOD_REPLY);
        assert!(dir.join("characters/001_pooh.json").is_file());
        assert!(dir.join("entities/001_the-city-has-two-moons.json").is_file());

        let parsed: ExtractorOutput =
            serde_json::from_str(&std::fs::read_to_string(dir.join(PARSED_FILE)).unwrap()).unwrap();
        assert_eq!(parsed.world.facts[0].confidence.as_str(), "med");
        assert_eq!(parsed.characters[0].facts[0].confidence.as_str(), "high");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].role, "system");
        assert!(seen[0].content.starts_with("Evidence MUST refer"));
        assert!(seen[1].content.contains("## chunk_002 [chapter1.txt:L71-L100]"));
        assert!(seen[1].content.contains("Source file: chapter1.txt"));
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_trail() {
        let (_tmp, layout, options) = setup(5);
        let model = CannedModel::new("I'm sorry, I can't help with that.");

        let err = run_extract(&layout, &options, &model).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::NoJsonObject)
        ));

        let runs = crate::workspace::list_runs(&layout).unwrap();
        assert_eq!(runs.len(), 1);
        let dir = layout.proposal_run_dir(&runs[0].run_id);
        assert!(dir.join(RAW_OUTPUT_FILE).is_file());
        assert!(dir.join(PROMPT_FILE).is_file());
        assert!(dir.join(PARSE_ERRORS_FILE).is_file());
        assert!(!dir.join(PARSED_FILE).exists());
        assert!(!dir.join("world.md").exists());
        assert!(!dir.join("characters").exists());
    }

    #[tokio::test]
    async fn test_model_failure_propagates_unmodified() {
        let (_tmp, layout, options) = setup(5);
        let err = run_extract(&layout, &options, &FailingModel).await.unwrap_err();
        assert_eq!(err.to_string(), "connection refused");
        assert!(err.downcast_ref::<IngestError>().is_none());
    }

    #[tokio::test]
    async fn test_missing_input_writes_nothing() {
        let (tmp, layout, mut options) = setup(5);
        options.input_path = tmp.path().join("missing.txt");
        let err = run_extract(&layout, &options, &CannedModel::new("{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::NotFound { .. })
        ));
        assert!(!layout.proposals_dir().exists());
    }

    #[tokio::test]
    async fn test_missing_pack_writes_nothing() {
        let (_tmp, layout, mut options) = setup(5);
        options.pack = "ingest_v9".to_string();
        let err = run_extract(&layout, &options, &CannedModel::new("{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::NotFound { .. })
        ));
        assert!(!layout.proposals_dir().exists());
    }

    #[tokio::test]
    async fn test_unwritable_proposals_dir_names_path() {
        let (_tmp, layout, options) = setup(5);
        // a file where the ingest directory should be
        std::fs::write(layout.root().join("00_INGEST"), "").unwrap();
        let err = run_extract(&layout, &options, &CannedModel::new("{}"))
            .await
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Failed to create"), "{}", msg);
        assert!(msg.contains("proposals"), "{}", msg);
    }

    #[tokio::test]
    async fn test_empty_input_still_runs() {
        let (_tmp, layout, options) = setup(0);
        let result = run_extract(&layout, &options, &CannedModel::new("{}"))
            .await
            .unwrap();
        assert_eq!(result.chunks, 0);
        assert_eq!(result.files, ProposalFiles::default());
    }
}
