//! CLI binary for eml2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use eml2pdf::{
    convert_to_file, default_output_path, inspect, ConversionConfig, ConversionOutput,
    ConversionProgressCallback, Eml2PdfError, MergeFailurePolicy, MessageSummary, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live progress bar plus one log line per
/// artifact. Artifacts complete out of order, so timings are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the artifact count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Parsing message…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} artifacts  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total: usize) {
        self.activate_bar(total);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting body + {} attachment(s)…", total.saturating_sub(1)))
        ));
    }

    fn on_artifact_start(&self, index: usize, name: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_artifact_complete(&self, index: usize, name: &str, page_count: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} [{:>3}] {:<14}  {:<10}  {}",
            green("✓"),
            index,
            name,
            dim(&format!("{page_count} page(s)")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_artifact_error(&self, index: usize, name: &str, error: String) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep one line per artifact.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error
        };

        self.bar.println(format!(
            "  {} [{:>3}] {:<14}  {}  {}",
            red("✗"),
            index,
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total: usize, success_count: usize) {
        let failed = total.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} artifacts converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} artifacts converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert next to the input (message.pdf)
  eml2pdf message.eml

  # Choose the output file
  eml2pdf message.eml -o /tmp/out.pdf

  # Keep the per-artifact PDFs for inspection
  eml2pdf --work-dir ./work message.eml

  # Convert only; merge later or elsewhere
  eml2pdf --no-merge --work-dir ./work message.eml

  # Fail the merge on the first unreadable intermediate PDF
  eml2pdf --on-merge-error abort message.eml

  # List attachments and how each would be converted
  eml2pdf --inspect-only message.eml

  # Machine-readable report
  eml2pdf --json message.eml > report.json

CONVERSION PATHS:
  Part                         Converter
  ───────────────────────────  ─────────────────────────────────────
  message body (HTML / text)   wkhtmltopdf, or headless Chromium
  application/pdf              re-saved in canonical form (built in)
  Word / Excel / PowerPoint    LibreOffice (soffice --headless)
  image/*                      one A4 page per image (built in)
  anything else                skipped

ENVIRONMENT VARIABLES:
  EML2PDF_HTML_RENDERER     Path to wkhtmltopdf or a Chromium binary
  EML2PDF_OFFICE_CONVERTER  Path to soffice
  RUST_LOG                  Log filter, e.g. eml2pdf=debug
"#;

/// Convert an email and its attachments into a single PDF.
#[derive(Parser, Debug)]
#[command(
    name = "eml2pdf",
    version,
    about = "Convert an email and its attachments into a single PDF",
    long_about = "Convert an RFC 5322 email (.eml) into one PDF: the message body with its \
from / to / subject header first, followed by every PDF, office document and image \
attachment in order. Unsupported attachments are skipped.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the email file.
    input: PathBuf,

    /// Merged PDF path. Default: the input path with a .pdf extension.
    #[arg(short, long, env = "EML2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for intermediate PDFs. Default: a temporary directory.
    #[arg(long, env = "EML2PDF_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Keep the temporary working area after merging.
    #[arg(long, env = "EML2PDF_KEEP_WORK_DIR")]
    keep_work_dir: bool,

    /// Convert only; leave the artifacts in the working area unmerged.
    #[arg(long, env = "EML2PDF_NO_MERGE")]
    no_merge: bool,

    /// What to do with an unreadable intermediate PDF: skip or abort.
    #[arg(long, env = "EML2PDF_ON_MERGE_ERROR", value_enum, default_value = "skip")]
    on_merge_error: MergePolicyArg,

    /// Number of artifacts converted at once (1–64).
    #[arg(short, long, env = "EML2PDF_CONCURRENCY", default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..=64))]
    concurrency: u16,

    /// Retries per artifact on a backend fault.
    #[arg(long, env = "EML2PDF_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Path to wkhtmltopdf or a Chromium-family browser.
    #[arg(long, env = "EML2PDF_HTML_RENDERER")]
    html_renderer: Option<PathBuf>,

    /// Path to LibreOffice's soffice.
    #[arg(long, env = "EML2PDF_OFFICE_CONVERTER")]
    office_converter: Option<PathBuf>,

    /// Print the report (or inspection) as JSON on stdout.
    #[arg(long, env = "EML2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "EML2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// List the message's attachments without converting anything.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EML2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EML2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum MergePolicyArg {
    Skip,
    Abort,
}

impl From<MergePolicyArg> for MergeFailurePolicy {
    fn from(v: MergePolicyArg) -> Self {
        match v {
            MergePolicyArg::Skip => MergeFailurePolicy::Skip,
            MergePolicyArg::Abort => MergeFailurePolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
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
        let summary = inspect(&cli.input)
            .await
            .context("Failed to inspect email")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
            );
        } else {
            print_summary(&cli, &summary);
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));
    let output = match convert_to_file(&cli.input, &output_path, &config).await {
        Ok(output) => output,
        Err(Eml2PdfError::MergeIncomplete { report, source }) => {
            if cli.json {
                let json = serde_json::to_string_pretty(&report)
                    .context("Failed to serialise report")?;
                println!("{json}");
            }
            for failure in &report.failures {
                eprintln!("  {} {}", red("✗"), failure.error);
            }
            return Err(anyhow::Error::new(*source).context(format!(
                "Merge failed; artifacts kept in {}",
                report.working_area.display()
            )));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Conversion failed")),
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_outcome(&output, show_progress);
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .concurrency(usize::from(cli.concurrency))
        .max_retries(cli.max_retries)
        .merge(!cli.no_merge)
        .merge_failure_policy(cli.on_merge_error.into())
        .keep_working_area(cli.keep_work_dir);

    if let Some(ref dir) = cli.work_dir {
        builder = builder.working_dir(dir);
    }
    if let Some(ref path) = cli.html_renderer {
        builder = builder.html_renderer(path);
    }
    if let Some(ref path) = cli.office_converter {
        builder = builder.office_converter(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(cli: &Cli, summary: &MessageSummary) {
    let mailboxes = |list: &[eml2pdf::Mailbox]| {
        list.iter()
            .map(|m| match (&m.name, &m.address) {
                (Some(n), Some(a)) => format!("{n} <{a}>"),
                (None, Some(a)) => a.clone(),
                (Some(n), None) => n.clone(),
                (None, None) => String::new(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!("File:         {}", cli.input.display());
    if let Some(ref id) = summary.message_id {
        println!("Message-ID:   {}", id);
    }
    println!("From:         {}", mailboxes(&summary.from));
    println!("To:           {}", mailboxes(&summary.to));
    println!("Subject:      {}", summary.subject);
    println!("HTML body:    {}", summary.has_html_body);
    println!("Attachments:  {}", summary.attachments.len());
    for a in &summary.attachments {
        println!(
            "  {:>3}. {:<32} {:<16} {:>9} B  → {}",
            a.position,
            a.filename,
            a.kind.as_str(),
            a.size_bytes,
            a.artifact_name.as_deref().unwrap_or("skipped"),
        );
    }
}

fn print_outcome(output: &ConversionOutput, show_progress: bool) {
    let report = &output.report;
    let stats = &report.stats;

    // The callback already printed per-artifact lines.
    if !show_progress {
        eprintln!(
            "Converted {}/{} artifacts ({} page(s)) in {}ms",
            stats.succeeded, stats.attempted, stats.total_pages, stats.total_duration_ms
        );
        for failure in &report.failures {
            eprintln!("  {} {}", red("✗"), failure.error);
        }
    }
    for skipped in &report.skipped {
        eprintln!(
            "  {} attachment {} ('{}', {}) skipped: unsupported type",
            dim("–"),
            skipped.position,
            skipped.filename,
            skipped.content_type
        );
    }

    match &output.merged {
        Some(merged) => {
            eprintln!(
                "{}  {} page(s)  →  {}",
                if report.failures.is_empty() && merged.skipped.is_empty() {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                merged.page_count,
                bold(&merged.path.display().to_string()),
            );
            for s in &merged.skipped {
                eprintln!("  {} left out {}: {}", cyan("⚠"), s.path.display(), s.reason);
            }
        }
        None => eprintln!(
            "{}  artifacts in {}",
            green("✔"),
            bold(&report.working_area.display().to_string())
        ),
    }
}
