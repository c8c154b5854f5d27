//! # Canon Harness
//!
//! Turns narrative source text into auditable, append-only story canon.
//!
//! Raw text is chunked into line-addressed windows, sent to a language
//! model together with a versioned prompt pack, and the reply is parsed
//! into a validated record of characters, world facts, and timeline
//! events. Every claim carries evidence pointing back at source lines.
//! Nothing reaches canon until an operator approves the proposal run;
//! approval appends only claims that are not already present.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │  Chunker │──▶│   Pack   │──▶│   Model   │──▶│ Parse+Render │
//! │ (lines)  │   │ (prompt) │   │ (openai)  │   │  proposals/  │
//! └──────────┘   └──────────┘   └───────────┘   └──────┬───────┘
//!                                                      │ operator review
//!                                                      ▼
//!                                               ┌──────────────┐
//!                                               │   Approve    │
//!                                               │ 01_CANON/ …  │
//!                                               └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! canon init my-story --name "My Story"
//! canon --project my-story extract my-story/00_INGEST/inputs/ch1.txt
//! canon --project my-story runs
//! canon --project my-story approve <run_id> --dry-run
//! canon --project my-story approve <run_id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | `project.toml` parsing |
//! | [`models`] | Line spans and chunks |
//! | [`chunk`] | Overlapping line chunker |
//! | [`schema`] | Extractor record types and confidence vocabulary |
//! | [`parse`] | Model reply → validated record |
//! | [`pack`] | Prompt pack loader |
//! | [`llm`] | Language model abstraction |
//! | [`workspace`] | Project layout, run ids, scaffolding |
//! | [`render`] | Proposal artifacts |
//! | [`extract`] | Extraction orchestrator |
//! | [`approve`] | Canon merge |
//! | [`eval`] | Extraction evaluation |
//! | [`error`] | Error taxonomy |

pub mod approve;
pub mod chunk;
pub mod config;
pub mod error;
pub mod eval;
pub mod extract;
pub mod llm;
pub mod models;
pub mod pack;
pub mod parse;
pub mod render;
pub mod schema;
pub mod workspace;
