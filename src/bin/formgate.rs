//! CLI binary for formgate.
//!
//! A thin shim over the library crate: detect form boundaries in a PDF
//! batch and optionally write one standalone PDF per form. Analysis needs a
//! deployment-specific model backend and stays library-only.

use anyhow::{Context, Result};
use clap::Parser;
use formgate::{DetectOptions, ProcessingConfig, SourceDocument};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = "\
Examples:
  formgate batch.pdf                        # print detected form boundaries
  formgate batch.pdf -o forms/              # split into forms/batch_form1.pdf, …
  formgate batch.pdf --pages-per-form 3     # fixed fallback cuts every 3 pages
  formgate batch.pdf --json                 # boundary list as JSON
";

#[derive(Parser, Debug)]
#[command(
    name = "formgate",
    version,
    about = "Detect form boundaries in multi-form PDF batches and split them",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF batch file to inspect or split.
    input: PathBuf,

    /// Write one PDF per detected form into this directory.
    #[arg(short, long, env = "FORMGATE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Pages per form for the fixed fallback strategy.
    #[arg(long, env = "FORMGATE_PAGES_PER_FORM", default_value_t = 2)]
    pages_per_form: usize,

    /// Jaccard similarity threshold for the header-match strategy (0–1].
    #[arg(long, env = "FORMGATE_SIMILARITY", default_value_t = 0.7)]
    similarity_threshold: f64,

    /// Confidence floor for header-match boundaries.
    #[arg(long, env = "FORMGATE_MIN_CONFIDENCE", default_value_t = 0.5)]
    min_confidence: f64,

    /// Print the boundary list as JSON instead of a table.
    #[arg(long, env = "FORMGATE_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "FORMGATE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "FORMGATE_QUIET")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = ProcessingConfig::builder()
        .pages_per_form(cli.pages_per_form)
        .header_similarity_threshold(cli.similarity_threshold)
        .min_boundary_confidence(cli.min_confidence)
        .build()
        .context("Invalid configuration")?;
    let opts = DetectOptions::from(&config);

    let bytes = std::fs::read(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let source_id = cli.input.display().to_string();
    let document = SourceDocument::from_bytes(source_id, bytes)
        .with_context(|| format!("Failed to parse {}", cli.input.display()))?;

    let (boundaries, chunks) = document
        .detect_and_split(&opts)
        .context("Failed to split document")?;

    if cli.json {
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &boundaries)?;
        writeln!(stdout)?;
    } else if !cli.quiet {
        println!(
            "{} {} pages, {} forms detected",
            bold(&cli.input.display().to_string()),
            document.page_count(),
            boundaries.len()
        );
        for (i, b) in boundaries.iter().enumerate() {
            println!(
                "  form {:>3}  pages {:>3}-{:<3}  {}",
                i + 1,
                b.start_page,
                b.end_page,
                dim(&format!("{:?} ({:.2})", b.method, b.confidence)),
            );
        }
    }

    if let Some(dir) = cli.output_dir {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let stem = cli
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch".to_string());

        for (i, chunk) in chunks.iter().enumerate() {
            let path = dir.join(format!("{stem}_form{}.pdf", i + 1));
            std::fs::write(&path, &chunk.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                println!(
                    "  {} {}  {}",
                    green("✓"),
                    path.display(),
                    dim(&format!("{} pages, {} bytes", chunk.page_count(), chunk.bytes.len())),
                );
            }
        }
    }

    Ok(())
}
