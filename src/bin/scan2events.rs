//! CLI binary for scan2events.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use scan2events::{
    checkpoint_status, process_document_with_cancel, CancelHandle, EtlError, EventQuery,
    PageRange, PipelineConfig, ProgressCallback, ResumePolicy, RunProgressCallback, RunState,
    RunStats, Side, SliceOrder, SqliteResultStore,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a bar when the range is closed, a spinner
/// when it runs to the end of the document, plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.reset_eta();
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_run_start(&self, range: PageRange) {
        if let Some(to) = range.to {
            self.activate_bar(to + 1 - range.from);
        }
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing pages {range}…"))
        ));
    }

    fn on_state(&self, state: RunState) {
        match state {
            RunState::Aggregating | RunState::Persisting => {
                self.bar.set_message(state.to_string())
            }
            _ => {}
        }
    }

    fn on_page_restored(&self, page: usize, blocks: usize) {
        self.bar.println(format!(
            "  {} Page {:>4}  {}",
            dim("↺"),
            page,
            dim(&format!("{blocks:>4} blocks (checkpoint)")),
        ));
        self.bar.inc(1);
    }

    fn on_page_start(&self, page: usize) {
        self.bar.set_message(format!("page {page}"));
    }

    fn on_slice_complete(&self, page: usize, side: Side, _blocks: usize) {
        self.bar.set_message(format!("page {page} ({side} half done)"));
    }

    fn on_page_complete(&self, page: usize, blocks: usize) {
        self.bar.println(format!(
            "  {} Page {:>4}  {}",
            green("✓"),
            page,
            dim(&format!("{blocks:>4} blocks")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} page(s) extracted, {} restored  →  {} events",
            green("✔"),
            bold(&stats.pages_extracted.to_string()),
            stats.pages_restored,
            bold(&stats.total_events.to_string()),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole document, results in data/sqlite.db
  scan2events data/input_pdfs/chronicle.pdf

  # Pages 11 to 13 only
  scan2events --from-page 11 --to-page 13 chronicle.pdf

  # Remote OCR server, left column first
  scan2events --endpoint http://gpu-box:8000/infer --slice-order left-first book.pdf

  # Which pages are already checkpointed?
  scan2events --status chronicle.pdf

  # Print stored events of one document for 1950
  scan2events --list-events --from-date 1950/01/01 --to-date 1950/12/31 chronicle.pdf

RESUMING:
  Every finished page is checkpointed. After a crash, a timeout or Ctrl-C,
  run the same command again: checkpointed pages are reloaded and the newest
  one is redone (use --keep-checkpoints-on-resume to trust it as well).

ENVIRONMENT VARIABLES:
  SCAN2EVENTS_*        Every flag, e.g. SCAN2EVENTS_ENDPOINT, SCAN2EVENTS_DPI
  PDFIUM_LIB_PATH      Path to libpdfium (file or directory)
  RUST_LOG             Log filter, overrides --verbose/--quiet
"#;

/// Extract dated events from scanned PDFs through a layout-aware OCR server.
#[derive(Parser, Debug)]
#[command(
    name = "scan2events",
    version,
    about = "Extract dated events from scanned PDFs through a layout-aware OCR server",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    #[arg(required_unless_present = "list_events")]
    input: Option<PathBuf>,

    /// First page to process (1-based).
    #[arg(long, env = "SCAN2EVENTS_FROM_PAGE", default_value_t = 1)]
    from_page: usize,

    /// Last page to process (inclusive). Default: end of document.
    #[arg(long, env = "SCAN2EVENTS_TO_PAGE")]
    to_page: Option<usize>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "SCAN2EVENTS_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// OCR inference endpoint.
    #[arg(long, env = "SCAN2EVENTS_ENDPOINT", default_value = scan2events::config::DEFAULT_OCR_ENDPOINT)]
    endpoint: String,

    /// Per-slice OCR timeout in seconds.
    #[arg(long, env = "SCAN2EVENTS_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Path to a text file sent as the OCR `prompt` field.
    #[arg(long, env = "SCAN2EVENTS_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Which half of each page is sent first.
    #[arg(long, env = "SCAN2EVENTS_SLICE_ORDER", value_enum, default_value = "right-first")]
    slice_order: SliceOrderArg,

    /// Checkpoint directory.
    #[arg(long, env = "SCAN2EVENTS_CHECKPOINT_DIR", default_value = "data/checkpoints")]
    checkpoint_dir: PathBuf,

    /// SQLite database for raw results and events.
    #[arg(long, env = "SCAN2EVENTS_DATABASE", default_value = "data/sqlite.db")]
    database: PathBuf,

    /// Trust every checkpoint on resume instead of redoing the newest page.
    #[arg(long, env = "SCAN2EVENTS_KEEP_CHECKPOINTS_ON_RESUME")]
    keep_checkpoints_on_resume: bool,

    /// Delete the document's checkpoints after a successful run.
    #[arg(long, env = "SCAN2EVENTS_PURGE_CHECKPOINTS")]
    purge_checkpoints: bool,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SCAN2EVENTS_PASSWORD")]
    password: Option<String>,

    /// Print the run output (blocks, events, stats) as JSON on stdout.
    #[arg(long, env = "SCAN2EVENTS_JSON")]
    json: bool,

    /// Print checkpointed pages of INPUT and exit.
    #[arg(long)]
    status: bool,

    /// Print stored events (of INPUT, if given) and exit.
    #[arg(long)]
    list_events: bool,

    /// With --list-events: earliest date, inclusive (YYYY/MM/DD).
    #[arg(long, requires = "list_events")]
    from_date: Option<String>,

    /// With --list-events: latest date, inclusive (YYYY/MM/DD).
    #[arg(long, requires = "list_events")]
    to_date: Option<String>,

    /// Disable progress bar.
    #[arg(long, env = "SCAN2EVENTS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN2EVENTS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCAN2EVENTS_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum SliceOrderArg {
    RightFirst,
    LeftFirst,
}

impl From<SliceOrderArg> for SliceOrder {
    fn from(v: SliceOrderArg) -> Self {
        match v {
            SliceOrderArg::RightFirst => SliceOrder::RightFirst,
            SliceOrderArg::LeftFirst => SliceOrder::LeftFirst,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Read-only modes ──────────────────────────────────────────────────
    if cli.list_events {
        return list_events(&cli);
    }

    let input = cli
        .input
        .clone()
        .context("An input document is required")?;

    if cli.status {
        let config = build_config(&cli, None).await?;
        let pages = checkpoint_status(&input, &config).context("Failed to read checkpoints")?;
        if cli.json {
            println!("{}", serde_json::to_string(&pages)?);
        } else if pages.is_empty() {
            println!("{}: no checkpoints", input.display());
        } else {
            println!(
                "{}: {} checkpointed page(s): {}",
                input.display(),
                pages.len(),
                format_pages(&pages)
            );
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Ctrl-C → cancel at the next page boundary; twice → exit now ───────
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        let quiet = cli.quiet;
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                match on_interrupt(&cancel) {
                    Interrupt::Cancel => {
                        if !quiet {
                            eprintln!(
                                "{} Cancelling after the current page… (Ctrl-C again to quit now)",
                                yellow("⚠")
                            );
                        }
                    }
                    Interrupt::Exit => {
                        if !quiet {
                            eprintln!("{} Interrupted. The current page was not saved.", yellow("⚠"));
                        }
                        std::process::exit(130);
                    }
                }
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let output = match process_document_with_cancel(&input, &config, cancel).await {
        Ok(output) => output,
        Err(EtlError::Cancelled { last_checkpoint }) => {
            if !cli.quiet {
                eprintln!(
                    "{} Cancelled. Last checkpointed page: {}. Run again to resume.",
                    yellow("⚠"),
                    last_checkpoint.map_or_else(|| "none".to_string(), |p| p.to_string())
                );
            }
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("Run failed"),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        let s = &output.stats;
        eprintln!(
            "Processed {} ({}): {} extracted + {} restored page(s), {} blocks, {} events in {}ms",
            output.document,
            output.range_tag,
            s.pages_extracted,
            s.pages_restored,
            s.total_blocks,
            s.total_events,
            s.total_duration_ms
        );
    }
    if !cli.quiet && !cli.json {
        eprintln!(
            "   {}",
            dim(&format!("results → {}", config.database_path.display()))
        );
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .ocr_endpoint(cli.endpoint.clone())
        .ocr_timeout_secs(cli.timeout)
        .dpi(cli.dpi)
        .pages(PageRange::new(cli.from_page, cli.to_page))
        .slice_order(cli.slice_order.clone().into())
        .checkpoint_dir(cli.checkpoint_dir.clone())
        .database_path(cli.database.clone())
        .purge_checkpoints_on_success(cli.purge_checkpoints);

    if cli.keep_checkpoints_on_resume {
        builder = builder.resume_policy(ResumePolicy::KeepAll);
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.ocr_prompt(prompt);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn list_events(cli: &Cli) -> Result<()> {
    let store = SqliteResultStore::open(&cli.database)
        .with_context(|| format!("Failed to open {}", cli.database.display()))?;
    let query = EventQuery {
        source_id: cli.input.as_ref().map(|p| p.display().to_string()),
        from_date: cli.from_date.clone(),
        to_date: cli.to_date.clone(),
    };
    let events = store.events(&query).context("Failed to query events")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    for record in &events {
        println!(
            "{:>6}  {}  {}",
            dim(&record.id.to_string()),
            bold(&record.event.date),
            record.event.text.replace('\n', " ⏎ ")
        );
    }
    if !cli.quiet {
        eprintln!("{} event(s)", events.len());
    }
    Ok(())
}

/// Compress a sorted page list: `[1,2,3,7,9,10]` → `"1-3, 7, 9-10"`.
/// What a Ctrl-C does given the cancellation state.
#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    Exit,
}

/// First press requests a cancel at the next page boundary; any later
/// press asks for an immediate exit.
fn on_interrupt(cancel: &CancelHandle) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::Exit
    } else {
        cancel.cancel();
        Interrupt::Cancel
    }
}

fn format_pages(pages: &[usize]) -> String {
    let mut parts = Vec::new();
    let mut iter = pages.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        parts.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    parts.join(", ")
}
