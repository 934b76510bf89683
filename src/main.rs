use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use fb_public_intel::extract::{self, ExtractedSignals, DEFAULT_LINK_LIMIT};
use fb_public_intel::fetch::{
    self, FetchConfig, DEFAULT_CONCURRENCY, DEFAULT_MAX_BYTES, DEFAULT_USER_AGENT,
};
use fb_public_intel::{classify, packet, pipeline};

#[derive(Parser)]
#[command(
    name = "fb_public_intel",
    about = "Facebook public-content lead packets (no auth, no bypass)"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct FetchArgs {
    /// Stop reading the response body after this many bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    max_bytes: usize,
    /// Request timeout in seconds
    #[arg(long, default_value_t = 20)]
    timeout_secs: u64,
    /// Retries on 429 and 5xx responses
    #[arg(long, default_value_t = 3)]
    retries: u32,
    #[arg(long, env = "FB_INTEL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl FetchArgs {
    fn config(&self) -> FetchConfig {
        FetchConfig {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            max_bytes: self.max_bytes,
            max_retries: self.retries,
            ..FetchConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and classify a Facebook URL
    Classify { url: String },
    /// Fetch publicly accessible HTML (no auth, no bypass)
    Fetch {
        url: String,
        #[command(flatten)]
        fetch_args: FetchArgs,
    },
    /// Extract signals from an investigator-provided capture (file or stdin)
    Extract {
        /// HTML file (default: stdin)
        #[arg(long)]
        html: Option<PathBuf>,
        /// Echoed back in the output for correlation
        #[arg(long)]
        base_url: Option<String>,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINK_LIMIT)]
        link_limit: usize,
    },
    /// Build a lead packet from extracted signals (JSON) or a raw HTML capture
    Packet {
        target_url: String,
        /// Signals JSON as printed by `extract` (default: stdin)
        #[arg(long, conflicts_with = "html")]
        signals: Option<PathBuf>,
        /// Raw HTML capture, extracted on the fly
        #[arg(long)]
        html: Option<PathBuf>,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINK_LIMIT)]
        link_limit: usize,
    },
    /// Fetch, extract and assemble a packet for one URL
    Investigate {
        url: String,
        #[command(flatten)]
        fetch_args: FetchArgs,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINK_LIMIT)]
        link_limit: usize,
    },
    /// Investigate every URL in a file (one per line), writing JSON lines
    Batch {
        #[arg(short, long)]
        input: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value_t = DEFAULT_CONCURRENCY)]
        concurrency: usize,
        #[arg(short = 'n', long, default_value_t = DEFAULT_LINK_LIMIT)]
        link_limit: usize,
        #[command(flatten)]
        fetch_args: FetchArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Classify { url } => print_json(&classify::classify(&url)),
        Commands::Fetch { url, fetch_args } => {
            let config = fetch_args.config();
            let client = config.client()?;
            let outcome = fetch::fetch_public_html(&client, &url, &config).await?;
            print_json(&outcome)
        }
        Commands::Extract {
            html,
            base_url,
            link_limit,
        } => {
            let doc = read_input(html.as_deref())?;
            let signals = extract::extract_with_limit(&doc, base_url.as_deref(), link_limit);
            print_json(&signals)
        }
        Commands::Packet {
            target_url,
            signals,
            html,
            link_limit,
        } => {
            let signals = match html {
                Some(path) => {
                    let doc = read_input(Some(path.as_path()))?;
                    extract::extract_with_limit(&doc, None, link_limit)
                }
                None => {
                    let raw = read_input(signals.as_deref())?;
                    serde_json::from_str::<ExtractedSignals>(&raw)
                        .context("Failed to parse extracted signals JSON")?
                }
            };
            print_json(&packet::build_lead_packet(&target_url, &signals))
        }
        Commands::Investigate {
            url,
            fetch_args,
            link_limit,
        } => {
            let config = fetch_args.config();
            let client = config.client()?;
            let investigation = pipeline::investigate(&client, &url, &config, link_limit).await;
            print_json(&investigation)
        }
        Commands::Batch {
            input,
            output,
            concurrency,
            link_limit,
            fetch_args,
        } => {
            let urls = read_urls(&read_input(Some(input.as_path()))?);
            if urls.is_empty() {
                eprintln!("No URLs in {}.", input.display());
                return Ok(());
            }
            let config = fetch_args.config();
            let client = config.client()?;
            let investigations =
                pipeline::run_batch(&client, urls, &config, concurrency, link_limit).await?;

            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(File::create(path).with_context(|| {
                    format!("Failed to create output file {}", path.display())
                })?)),
                None => Box::new(std::io::stdout().lock()),
            };
            for inv in &investigations {
                writeln!(out, "{}", serde_json::to_string(inv)?)?;
            }
            out.flush()?;

            let failed = investigations.iter().filter(|i| i.error.is_some()).count();
            info!(
                "Wrote {} records ({} packets, {} failed)",
                investigations.len(),
                investigations.len() - failed,
                failed
            );
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("Done in {}", format_duration(elapsed));
    }

    result
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read {}", p.display())),
        None => std::io::read_to_string(std::io::stdin()).context("Failed to read stdin"),
    }
}

/// One URL per line; blank lines and `#` comments are skipped.
fn read_urls(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
