//! CLI binary for docpipe.
//!
//! A thin shim over the library crate: maps CLI flags to a [`Pipeline`]
//! over a filesystem workspace (blobs in a directory tree, tracker state
//! in one JSON file) and prints results.
//!
//! The analysis backend wired in here is the in-process stub — every
//! submission is accepted and yields deterministic placeholder output —
//! which makes the binary a complete dry-run harness for the pipeline's
//! orchestration, identity, and resumability behaviour without any
//! external service.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docpipe::{
    AdvanceOutcome, AnalysisFeature, AnalysisKind, BlobStore, DocumentId, DocumentKind,
    FsBlobStore, IngestRequest, JsonTracker, PdfiumSplitter, Pipeline, PipelineConfig, Stage,
    StubBackend, TrackerConfig, Workspace,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI definition ───────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "docpipe",
    version,
    about = "Resumable document extraction pipeline (dry-run backend)"
)]
struct Cli {
    /// Workspace directory: blobs plus tracker.json.
    #[arg(long, global = true, default_value = "./doc-store", env = "DOCPIPE_WORKSPACE")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the content-derived document id of a file.
    Id {
        /// Path to the document file.
        path: PathBuf,
    },

    /// Ingest a document (path or URL) and create its tracker record.
    Ingest {
        /// Local file path or HTTP/HTTPS URL.
        source: String,
        #[arg(long, value_enum, default_value = "pdf")]
        kind: KindArg,
        /// Document-analysis features, comma separated.
        #[arg(long, value_enum, value_delimiter = ',')]
        features: Vec<FeatureArg>,
        /// Analysis variants to run, comma separated.
        #[arg(long, value_enum, value_delimiter = ',')]
        analyses: Vec<AnalysisArg>,
    },

    /// Show a document's tracker record.
    Status {
        /// 64-hex-char document id.
        doc_id: String,
    },

    /// Run the next stage for a document.
    Advance {
        doc_id: String,
        /// After a submit stage, wait for its jobs before returning.
        #[arg(long)]
        wait: bool,
    },

    /// Ingest a document and drive it through every stage.
    Run {
        source: String,
        #[arg(long, value_enum, default_value = "pdf")]
        kind: KindArg,
        #[arg(long, value_enum, value_delimiter = ',')]
        features: Vec<FeatureArg>,
        #[arg(long, value_enum, value_delimiter = ',')]
        analyses: Vec<AnalysisArg>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Pdf,
    Image,
    Word,
}

impl From<KindArg> for DocumentKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Pdf => DocumentKind::Pdf,
            KindArg::Image => DocumentKind::Image,
            KindArg::Word => DocumentKind::Word,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FeatureArg {
    Tables,
    Forms,
    Queries,
    Signatures,
    Layout,
}

impl From<FeatureArg> for AnalysisFeature {
    fn from(arg: FeatureArg) -> Self {
        match arg {
            FeatureArg::Tables => AnalysisFeature::Tables,
            FeatureArg::Forms => AnalysisFeature::Forms,
            FeatureArg::Queries => AnalysisFeature::Queries,
            FeatureArg::Signatures => AnalysisFeature::Signatures,
            FeatureArg::Layout => AnalysisFeature::Layout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AnalysisArg {
    TextDetection,
    DocumentAnalysis,
    ExpenseAnalysis,
    LendingAnalysis,
}

impl From<AnalysisArg> for AnalysisKind {
    fn from(arg: AnalysisArg) -> Self {
        match arg {
            AnalysisArg::TextDetection => AnalysisKind::TextDetection,
            AnalysisArg::DocumentAnalysis => AnalysisKind::DocumentAnalysis,
            AnalysisArg::ExpenseAnalysis => AnalysisKind::ExpenseAnalysis,
            AnalysisArg::LendingAnalysis => AnalysisKind::LendingAnalysis,
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn build_pipeline(dir: &PathBuf) -> Result<(Pipeline, Arc<FsBlobStore>)> {
    let store = Arc::new(FsBlobStore::new(dir));
    let tracker = JsonTracker::open(dir.join("tracker.json"), TrackerConfig::default())
        .context("could not open tracker state")?;
    let pipeline = Pipeline::new(
        Arc::new(tracker),
        store.clone(),
        Arc::new(StubBackend::new()),
        Arc::new(PdfiumSplitter::new()),
        Workspace::new("store"),
        PipelineConfig::default(),
    )?;
    Ok((pipeline, store))
}

fn parse_doc_id(s: &str) -> Result<DocumentId> {
    DocumentId::parse(s)
        .with_context(|| format!("'{s}' is not a document id (expected 64 hex chars)"))
}

fn ingest_request(features: Vec<FeatureArg>, analyses: Vec<AnalysisArg>) -> IngestRequest {
    IngestRequest {
        features: features.into_iter().map(Into::into).collect(),
        analyses: analyses.into_iter().map(Into::into).collect(),
    }
}

/// The analysis variant a submit stage belongs to, if it is one.
fn submit_kind_of(stage: Stage) -> Option<AnalysisKind> {
    AnalysisKind::ALL
        .into_iter()
        .find(|kind| kind.submit_stage() == stage)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Id { path } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("could not read '{}'", path.display()))?;
            println!("{}", DocumentId::of_bytes(&bytes));
        }

        Command::Ingest {
            source,
            kind,
            features,
            analyses,
        } => {
            let (pipeline, _) = build_pipeline(&cli.workspace)?;
            let receipt = pipeline
                .ingest(&source, kind.into(), ingest_request(features, analyses))
                .await?;
            if receipt.duplicate {
                println!(
                    "{} document already ingested: {}",
                    dim("="),
                    receipt.doc_id
                );
            } else {
                println!("{} ingested {}", green("✓"), bold(&receipt.doc_id.to_string()));
                println!("  landing: {}", dim(receipt.landing_ref.as_str()));
            }
        }

        Command::Status { doc_id } => {
            let (pipeline, _) = build_pipeline(&cli.workspace)?;
            let doc_id = parse_doc_id(&doc_id)?;
            let Some(record) = pipeline.record(&doc_id)? else {
                bail!("no record for document {doc_id}");
            };
            println!("{}  {}", bold(&doc_id.to_string()), record.status);
            println!("  kind:      {}", record.payload.ingest.kind);
            println!("  fragments: {}", record.payload.fragment_count());
            for kind in AnalysisKind::ALL {
                if let Some(fan_out) = record.payload.submissions.get(kind) {
                    println!(
                        "  {kind}: {} job(s){}",
                        fan_out.job_count(),
                        if fan_out.is_single_call() {
                            " (single call)"
                        } else {
                            ""
                        }
                    );
                }
            }
            if let Some(error) = &record.error {
                println!("  {} {}", red("last error:"), error.message);
            }
        }

        Command::Advance { doc_id, wait } => {
            let (pipeline, _) = build_pipeline(&cli.workspace)?;
            let doc_id = parse_doc_id(&doc_id)?;
            match pipeline.advance(&doc_id).await? {
                AdvanceOutcome::Ran { stage } => {
                    println!("{} ran stage '{stage}'", green("✓"));
                    if wait {
                        if let Some(kind) = submit_kind_of(stage) {
                            pipeline.wait_for_analysis(&doc_id, kind).await?;
                            println!("{} {kind} jobs terminal", green("✓"));
                        }
                    }
                }
                AdvanceOutcome::Complete => println!("{} pipeline complete", green("✓")),
                AdvanceOutcome::Halted { status } => {
                    println!("{} halted at {status}", red("✗"))
                }
            }
        }

        Command::Run {
            source,
            kind,
            features,
            analyses,
        } => {
            let (pipeline, store) = build_pipeline(&cli.workspace)?;
            let receipt = pipeline
                .ingest(&source, kind.into(), ingest_request(features, analyses))
                .await?;
            let doc_id = receipt.doc_id.clone();
            println!("{} document {}", green("✓"), bold(&doc_id.to_string()));

            loop {
                match pipeline.advance(&doc_id).await? {
                    AdvanceOutcome::Ran { stage } => {
                        println!("  {} {stage}", green("✓"));
                        if let Some(kind) = submit_kind_of(stage) {
                            pipeline.wait_for_analysis(&doc_id, kind).await?;
                        }
                    }
                    AdvanceOutcome::Complete => break,
                    AdvanceOutcome::Halted { status } => {
                        bail!("pipeline halted at {status}");
                    }
                }
            }

            let record = pipeline
                .record(&doc_id)?
                .context("record vanished mid-run")?;
            for kind in AnalysisKind::ALL {
                let Some(result) = record.payload.outputs.get(kind) else {
                    continue;
                };
                println!("\n{}", bold(&format!("── {kind} ──")));
                for item in &result.items {
                    let text = store.get(&item.text_ref).await?;
                    println!("{}", dim(&format!("[{}]", item.fragment)));
                    print!("{}", String::from_utf8_lossy(&text));
                }
            }
        }
    }

    Ok(())
}
