//! # Canon Harness CLI (`canon`)
//!
//! The `canon` binary drives the ingest pipeline of a story project:
//! scaffolding, extraction runs, approval into canon, and evaluation.
//!
//! ## Usage
//!
//! ```bash
//! canon --project ./my-story <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `canon init <dir>` | Create a project skeleton with the bundled prompt pack |
//! | `canon extract <file>` | Run extraction on one input file into a new proposal run |
//! | `canon runs` | List proposal runs and their status |
//! | `canon approve <run_id>` | Merge a proposal run into canon |
//! | `canon packs` | List prompt packs and their pipelines |
//! | `canon eval --dataset <file>` | Run the extraction evaluation dataset |
//! | `canon completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Offline run: the stub model echoes the prompt, leaving a parse-error trail
//! canon init demo --name "Demo"
//! sed -i 's/provider = "openai"/provider = "stub"/' demo/project.toml
//! canon --project demo extract demo/00_INGEST/inputs/ch1.txt
//!
//! # Preview, then apply
//! canon --project demo approve 2025-12-26_00-14-03__ingest__ch1__a1b2c3 --dry-run
//! canon --project demo approve 2025-12-26_00-14-03__ingest__ch1__a1b2c3
//! ```

use canon_harness::{approve, eval, extract, llm, pack, workspace};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Canon Harness CLI: LLM-assisted extraction of story canon, with an
/// operator approval step between proposal and canon.
#[derive(Parser)]
#[command(
    name = "canon",
    about = "Canon Harness — turn narrative text into auditable, append-only story canon",
    version
)]
struct Cli {
    /// Project directory (the one containing `project.toml`).
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Increase log verbosity (`-v` info, `-vv` debug). `RUST_LOG` wins when set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project skeleton.
    ///
    /// Writes the directory tree, a default `project.toml`, a README, and
    /// the bundled `ingest_v1` prompt pack. Existing files are kept.
    Init {
        /// Target directory.
        dir: PathBuf,

        /// Project name recorded in `project.toml`.
        #[arg(long, default_value = "Untitled Story")]
        name: String,
    },

    /// Extract proposals from one input file.
    ///
    /// Creates `00_INGEST/proposals/<run_id>/` with the assembled prompt,
    /// the raw model reply, and (when the reply parses) the proposed
    /// characters, world facts, and timeline.
    Extract {
        /// Input text file.
        input: PathBuf,

        /// Maximum lines per chunk (overrides `ingest.max_lines_per_chunk`).
        #[arg(long)]
        max_lines: Option<usize>,

        /// Lines shared by consecutive chunks (overrides `ingest.overlap`).
        #[arg(long)]
        overlap: Option<usize>,

        /// Pack root directory (overrides `ingest.pack_dir`).
        #[arg(long)]
        pack_dir: Option<PathBuf>,

        /// Pack name (overrides `ingest.pack`).
        #[arg(long)]
        pack: Option<String>,

        /// Pipeline name within the pack (overrides `ingest.pipeline`).
        #[arg(long)]
        pipeline: Option<String>,

        /// Model id (overrides `llm.model`).
        #[arg(long)]
        model: Option<String>,
    },

    /// List proposal runs.
    Runs,

    /// Merge a proposal run into canon.
    ///
    /// Appends world facts, timeline events, and character facts that are
    /// not already in canon, and writes an approval report.
    Approve {
        /// Run id (directory name under `00_INGEST/proposals/`).
        run_id: String,

        /// Show what would be appended without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// List prompt packs.
    Packs {
        /// Pack root directory (overrides `ingest.pack_dir`).
        #[arg(long)]
        pack_dir: Option<PathBuf>,
    },

    /// Run the extraction evaluation dataset.
    ///
    /// Exits with status 2 if any case fails.
    Eval {
        /// Dataset file (TOML).
        #[arg(long)]
        dataset: PathBuf,
    },

    /// Print shell completions to stdout.
    Completions {
        shell: Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't need an existing project
    match &cli.command {
        Commands::Init { dir, name } => {
            workspace::init_project(dir, name)?;
            println!("Initialized project at {}", dir.display());
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "canon", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let ws = workspace::Workspace::open(&cli.project)?;

    match cli.command {
        Commands::Extract {
            input,
            max_lines,
            overlap,
            pack_dir,
            pack,
            pipeline,
            model,
        } => {
            let mut options = extract::ExtractOptions::from_config(&ws.config, ws.root(), &input);
            if let Some(v) = max_lines {
                options.max_lines_per_chunk = v;
            }
            if let Some(v) = overlap {
                options.overlap = v;
            }
            if let Some(v) = pack_dir {
                options.pack_dir = v;
            }
            if let Some(v) = pack {
                options.pack = v;
            }
            if let Some(v) = pipeline {
                options.pipeline = v;
            }
            if let Some(v) = model {
                options.model = v;
            }

            let llm = llm::create_model(&ws.config.llm)?;
            let result = extract::run_extract(&ws.layout, &options, llm.as_ref()).await?;
            println!("Run: {}", result.run_id);
            println!("Proposals: {}", result.proposals_dir.display());
            println!(
                "Chunks: {}  characters: {}  entities: {}  timeline events: {}",
                result.chunks,
                result.files.characters,
                result.files.entities,
                result.files.timeline_events
            );
        }
        Commands::Runs => {
            let runs = workspace::list_runs(&ws.layout)?;
            if runs.is_empty() {
                println!("No proposal runs.");
            }
            for run in runs {
                println!(
                    "{:<14} {:<10} {}",
                    run.state.as_str(),
                    if run.approved { "approved" } else { "-" },
                    run.run_id
                );
            }
        }
        Commands::Approve { run_id, dry_run } => {
            let result = approve::approve_run(&ws.layout, &run_id, dry_run)?;
            if dry_run {
                println!("Dry run: nothing written.");
            }
            println!("Run: {}", result.run_id);
            println!("World facts added: {}", result.world_facts_added);
            println!("Timeline events added: {}", result.timeline_events_added);
            println!("Characters touched: {}", result.characters_touched);
            println!("Character facts added: {}", result.character_facts_added);
            if !dry_run {
                println!("Report: {}", result.approved_dir.display());
            }
        }
        Commands::Packs { pack_dir } => {
            let dir = pack_dir.unwrap_or_else(|| ws.pack_dir());
            let packs = pack::list_packs(&dir)?;
            if packs.is_empty() {
                println!("No packs under {}", dir.display());
            }
            for p in packs {
                println!("{}  [{}]", p.name, p.pipelines.join(", "));
            }
        }
        Commands::Eval { dataset } => {
            let options =
                extract::ExtractOptions::from_config(&ws.config, ws.root(), &PathBuf::new());
            let llm = llm::create_model(&ws.config.llm)?;
            let report = eval::run_eval(&ws.layout, &options, &dataset, llm.as_ref()).await?;
            for case in &report.cases {
                println!(
                    "[{}] ok={} characters={} missing={:?}",
                    case.case, case.ok, case.characters_count, case.missing_names
                );
            }
            let path = eval::write_report(&ws.layout, &report)?;
            println!(
                "{} passed, {} failed. Report: {}",
                report.passed,
                report.failed,
                path.display()
            );
            if !report.all_passed() {
                std::process::exit(2);
            }
        }
        Commands::Init { .. } | Commands::Completions { .. } => {
            // Handled above (before project loading)
            unreachable!()
        }
    }

    Ok(())
}
