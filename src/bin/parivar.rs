//! CLI binary for parivar-extract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the records.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use parivar_extract::{
    extract, extract_to_file, inspect, AgentTimeouts, EventSink, ExtractionConfig, PageSelection,
    PipelineEvent, RemoteUiSettings, Severity,
};
use std::collections::HashSet;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
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

// ── Event sink rendering a progress bar ──────────────────────────────────────

/// Terminal sink: one log line per event above a live progress bar.
///
/// Every page ends with exactly one page-scoped info event, so those
/// advance the bar. Pages that already reported an error get no tick mark.
struct CliSink {
    bar: ProgressBar,
    failed: Mutex<HashSet<usize>>,
}

impl CliSink {
    fn new(total_pages: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total_pages as u64);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failed: Mutex::new(HashSet::new()),
        })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl EventSink for CliSink {
    fn emit(&self, event: &PipelineEvent) {
        let Some(page) = event.page else {
            if event.severity != Severity::Info {
                self.bar.println(format!("  {} {}", yellow("⚠"), event.message));
            }
            return;
        };
        match event.severity {
            Severity::Info => {
                let failed = self
                    .failed
                    .lock()
                    .map(|set| set.contains(&page))
                    .unwrap_or(false);
                if !failed {
                    self.bar.println(format!(
                        "  {} Page {:>3}  {}",
                        green("✓"),
                        page,
                        dim(&event.message)
                    ));
                }
                self.bar.inc(1);
            }
            Severity::Warning => {
                self.bar
                    .println(format!("  {} Page {:>3}  {}", yellow("⚠"), page, event.message));
            }
            Severity::Error => {
                self.bar
                    .println(format!("  {} Page {:>3}  {}", red("✗"), page, red(&event.message)));
                if let Ok(mut set) = self.failed.lock() {
                    set.insert(page);
                }
            }
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a register, Markdown table on stdout
  parivar register.pdf

  # JSON output to a file
  parivar register.pdf --json -o register.json

  # Only a few pages, without the verification pass
  parivar --pages 3-5 --no-verify register.pdf

  # Inspect the PDF (no agents involved)
  parivar --inspect-only register.pdf

ENVIRONMENT VARIABLES:
  PARIVAR_UI_ENDPOINT     Remote UI gateway base URL (primary agent)
  PARIVAR_UI_EMAIL        Login for the remote chat UI
  PARIVAR_UI_PASSWORD     Password for the remote chat UI
  GEMINI_API_KEY          Google Gemini API key (secondary agent and verifier)
  OPENAI_API_KEY          OpenAI API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (gemini, openai, anthropic, ollama)
  EDGEQUAKE_MODEL         Override model ID

SETUP:
  pdfium must be installed as a system library or placed next to the binary
  (libpdfium.so / libpdfium.dylib / pdfium.dll).
"#;

/// Extract household records from scanned Parivar Register PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "parivar",
    version,
    about = "Extract household records from scanned Parivar Register PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "PARIVAR_OUTPUT")]
    output: Option<PathBuf>,

    /// Output structured JSON (ExtractionOutput) instead of a Markdown table.
    #[arg(long, env = "PARIVAR_JSON")]
    json: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PARIVAR_PAGES", default_value = "all")]
    pages: String,

    /// Base URL of the remote UI gateway used by the primary agent.
    #[arg(long, env = "PARIVAR_UI_ENDPOINT")]
    ui_endpoint: Option<String>,

    /// Login email for the remote chat UI.
    #[arg(long, env = "PARIVAR_UI_EMAIL")]
    ui_email: Option<String>,

    /// Login password for the remote chat UI.
    #[arg(long, env = "PARIVAR_UI_PASSWORD", hide_env_values = true)]
    ui_password: Option<String>,

    /// Hosted model provider: gemini, openai, anthropic, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Hosted model ID for the secondary agent.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Model ID for the verification pass (default: --model).
    #[arg(long, env = "PARIVAR_VERIFY_MODEL")]
    verify_model: Option<String>,

    /// Skip the verification pass.
    #[arg(long, env = "PARIVAR_NO_VERIFY")]
    no_verify: bool,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PARIVAR_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PARIVAR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Retries of the hosted model call on transient failure.
    #[arg(long, env = "PARIVAR_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PARIVAR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Remote UI login timeout in seconds.
    #[arg(long, env = "PARIVAR_LOGIN_TIMEOUT", default_value_t = 15)]
    login_timeout: u64,

    /// Remote UI response wait in seconds.
    #[arg(long, env = "PARIVAR_RESPONSE_TIMEOUT", default_value_t = 45)]
    response_timeout: u64,

    /// Hosted model call timeout in seconds.
    #[arg(long, env = "PARIVAR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Hard cap on any single agent invocation, in seconds. Must cover the
    /// remote UI step timeouts and the hosted model retries.
    #[arg(long, env = "PARIVAR_AGENT_TIMEOUT", default_value_t = 300)]
    agent_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "PARIVAR_NO_PROGRESS")]
    no_progress: bool,

    /// Print PDF metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PARIVAR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PARIVAR_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries page feedback; library INFO logs would
    // interleave with it.
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = meta.title {
                println!("Title:        {}", t);
            }
            println!("Pages:        {}", meta.page_count);
            println!("PDF Version:  {}", meta.pdf_version);
            if let Some(ref p) = meta.producer {
                println!("Producer:     {}", p);
            }
            if let Some(ref c) = meta.creator {
                println!("Creator:      {}", c);
            }
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let pages = parse_pages(&cli.pages)?;
    let sink = if show_progress {
        let meta = inspect(&cli.input, cli.password.as_deref())
            .await
            .context("Failed to open PDF")?;
        Some(CliSink::new(pages.to_indices(meta.page_count).len()))
    } else {
        None
    };

    let config = build_config(&cli, pages, sink.clone())?;

    // ── Run extraction ───────────────────────────────────────────────────
    match cli.output {
        Some(ref output_path) if cli.json => {
            let stats = extract_to_file(&cli.input, output_path, &config).await;
            if let Some(ref s) = sink {
                s.finish();
            }
            let stats = stats.context("Extraction failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {}/{} pages  {} records  {}ms  →  {}",
                    if stats.failed_pages == 0 { green("✔") } else { yellow("⚠") },
                    stats.succeeded_pages(),
                    stats.total_pages,
                    stats.total_records,
                    stats.total_duration_ms,
                    bold(&output_path.display().to_string()),
                );
            }
        }
        _ => {
            let output = extract(&cli.input, &config).await;
            if let Some(ref s) = sink {
                s.finish();
            }
            let output = output.context("Extraction failed")?;

            let rendered = if cli.json {
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?
            } else {
                output.to_markdown_table(&config.schema)
            };

            match cli.output {
                Some(ref path) => tokio::fs::write(path, &rendered)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => {
                    let stdout = io::stdout();
                    let mut handle = stdout.lock();
                    handle
                        .write_all(rendered.as_bytes())
                        .context("Failed to write to stdout")?;
                    if !rendered.ends_with('\n') {
                        handle.write_all(b"\n").ok();
                    }
                }
            }

            if !cli.quiet {
                let stats = &output.stats;
                eprintln!(
                    "{}  {}/{} pages  ({} primary, {} fallback, {} verified)  {} records  {}ms",
                    if stats.failed_pages == 0 { green("✔") } else { yellow("⚠") },
                    stats.succeeded_pages(),
                    stats.total_pages,
                    stats.primary_pages,
                    stats.secondary_pages,
                    stats.verified_pages,
                    stats.total_records,
                    stats.total_duration_ms,
                );
                for page in output.failed_pages() {
                    if let Some(ref e) = page.error {
                        eprintln!("   {} {}", red("✗"), dim(&e.to_string()));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(
    cli: &Cli,
    pages: PageSelection,
    sink: Option<Arc<CliSink>>,
) -> Result<ExtractionConfig> {
    let timeouts = AgentTimeouts {
        login_secs: cli.login_timeout,
        response_secs: cli.response_timeout,
        api_secs: cli.api_timeout,
        pipeline_secs: cli.agent_timeout,
        ..AgentTimeouts::default()
    };

    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .pages(pages)
        .timeouts(timeouts)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .verify(!cli.no_verify);

    match (&cli.ui_endpoint, &cli.ui_email, &cli.ui_password) {
        (Some(endpoint), Some(email), Some(password)) => {
            builder = builder.remote_ui(RemoteUiSettings::new(endpoint, email, password));
        }
        (None, None, None) => {}
        _ => anyhow::bail!("--ui-endpoint, --ui-email and --ui-password must be given together"),
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m);
    }
    if let Some(ref m) = cli.verify_model {
        builder = builder.verify_model(m);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(sink) = sink {
        builder = builder.event_sink(sink as Arc<dyn EventSink>);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
