use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};

use mail_triage::api::triage_routes;
use mail_triage::channels::{GmailSource, ImapSource};
use mail_triage::config::{MailboxConfig, TriageConfig};
use mail_triage::llm::create_provider;
use mail_triage::pipeline::poller::spawn_poller;
use mail_triage::pipeline::types::MessageSource;
use mail_triage::pipeline::{BatchReport, Classifier, HttpClassifier, LlmClassifier, TriageProcessor};
use mail_triage::store::CsvLedger;

#[derive(Parser)]
#[command(name = "mail-triage", version, about = "Read-only mailbox triage with an LLM classifier")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch recent messages, classify the unseen ones and log them (default)
    Pull {
        /// Maximum messages per cycle (default: TRIAGE_MAX_RESULTS)
        #[arg(long)]
        max: Option<u32>,
        /// Repeat the cycle every SECS seconds until interrupted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },
    /// Serve the classification endpoint over HTTP
    Serve {
        /// Listen address (default: TRIAGE_BIND)
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TriageConfig::from_env().context("Invalid configuration")?;

    match cli.command.unwrap_or(Command::Pull {
        max: None,
        every: None,
    }) {
        Command::Pull { max, every } => pull(&config, max, every).await,
        Command::Serve { bind } => serve(&config, bind).await,
    }
}

fn in_process_classifier(config: &TriageConfig) -> anyhow::Result<Arc<dyn Classifier>> {
    let llm_config = config.llm_config()?;
    let llm = create_provider(&llm_config).context("Failed to create LLM provider")?;
    Ok(Arc::new(LlmClassifier::new(llm, config.policy.clone())))
}

async fn pull(config: &TriageConfig, max: Option<u32>, every: Option<u64>) -> anyhow::Result<()> {
    let classifier: Arc<dyn Classifier> = match &config.api_url {
        Some(url) => Arc::new(HttpClassifier::new(url.clone())),
        None => in_process_classifier(config)?,
    };

    let source: Arc<dyn MessageSource> = match config.mailbox_config()? {
        MailboxConfig::Gmail(gmail) => Arc::new(GmailSource::new(gmail)),
        MailboxConfig::Imap(imap) => Arc::new(ImapSource::new(imap)),
    };

    let ledger = CsvLedger::open(&config.ledger_path)
        .with_context(|| format!("Failed to open ledger at {}", config.ledger_path.display()))?;

    let max = max.unwrap_or(config.max_results);
    let mut processor = TriageProcessor::new(Arc::clone(&source), Arc::clone(&classifier), ledger)
        .with_continue_on_error(config.continue_on_error);

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}", source.name());
    eprintln!("   Classifier: {}", classifier.name());
    eprintln!("   Ledger: {}", config.ledger_path.display());

    match every {
        None => {
            match processor.run_batch(max).await {
                Ok(report) => print_report(&report),
                Err(aborted) => {
                    if aborted.report.fetched > 0 {
                        print_report(&aborted.report);
                    }
                    return Err(anyhow::Error::new(aborted.source).context("Triage cycle failed"));
                }
            }
        }
        Some(secs) => {
            let (handle, shutdown) =
                spawn_poller(processor, max, Duration::from_secs(secs.max(1)), print_report);
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            shutdown.store(true, Ordering::Relaxed);
            handle.abort();
            eprintln!("Stopped.");
        }
    }

    Ok(())
}

async fn serve(config: &TriageConfig, bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let classifier = in_process_classifier(config)?;
    let bind = bind.unwrap_or(config.bind);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} ({:?})", config.model, config.llm_backend);
    eprintln!("   Triage API: http://{bind}/triage-email");
    eprintln!("   Health: http://{bind}/health");

    axum::serve(listener, triage_routes(classifier))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

/// Per-message summary on stdout.
fn print_report(report: &BatchReport) {
    if report.fetched == 0 {
        println!("No messages found.");
        return;
    }

    for processed in &report.processed {
        let message = &processed.message;
        let plan = &processed.plan;
        println!("\n=== EMAIL {} ===", message.message_id);
        println!("From: {}", message.sender);
        println!("Subject: {}", message.subject);
        println!("{}", "-".repeat(40));
        println!(
            "Category: {}",
            plan.category.as_ref().map(|c| c.as_str()).unwrap_or("(inconclusive)")
        );
        println!(
            "Suggested action: {}",
            plan.action.as_ref().map(|a| a.as_str()).unwrap_or("-")
        );
        println!("Labels: {}", plan.labels.join(", "));
        println!("Confidence: {:.2}", plan.confidence);
        println!("Planned action: {}", plan.plan);
        println!("{}", "=".repeat(60));
    }

    println!(
        "\n{} processed, {} already seen, {} failed (of {} fetched)",
        report.processed.len(),
        report.skipped,
        report.failed,
        report.fetched
    );
}
