use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mail_scorer::config::ScorerConfig;
use mail_scorer::error::ConfigError;
use mail_scorer::llm::{LlmConfig, create_provider};
use mail_scorer::mailbox::{GmailImapMailbox, ImapConfig};
use mail_scorer::pipeline::{
    LabelDecisionEngine, RulesEngine, ScoringPolicy, ScoringProcessor, generate_report,
    spawn_continuous,
};
use mail_scorer::store::{LibSqlLedger, ProcessingLedger};

/// Score recent mail with an LLM and label it.
#[derive(Debug, Parser)]
#[command(name = "mail-scorer", version)]
struct Args {
    /// Hours back to process (default from config, normally 1)
    #[arg(long)]
    hours: Option<u32>,

    /// Print the performance report and exit
    #[arg(long)]
    report: bool,

    /// Keep running, one pass per interval
    #[arg(long)]
    continuous: bool,

    /// Rescore messages that were already processed
    #[arg(long)]
    process_all: bool,

    /// Report window in days (default from config, normally 7)
    #[arg(long)]
    days: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_tracing();

    let config = ScorerConfig::load().context("Failed to load configuration")?;

    let ledger = LibSqlLedger::new_local(&config.db_path)
        .await
        .with_context(|| format!("Failed to open ledger at {}", config.db_path.display()))?
        .with_policy_version(config.policy_version.clone());
    let ledger = Arc::new(ledger);

    if args.report {
        let days = args.days.unwrap_or(config.report_days_back);
        let stats = ledger.stats(days).await?;
        println!("{}", generate_report(&stats, days));
        return Ok(());
    }

    let imap_config = ImapConfig::from_env().ok_or_else(|| ConfigError::MissingRequired {
        key: "MAIL_SCORER_IMAP_HOST".into(),
        hint: "Set MAIL_SCORER_IMAP_HOST, MAIL_SCORER_IMAP_USERNAME and MAIL_SCORER_IMAP_PASSWORD."
            .into(),
    })?;
    let mailbox = Arc::new(GmailImapMailbox::new(imap_config));

    let llm = create_provider(&LlmConfig::from_env()?)?;
    let rules = RulesEngine::from_skip_senders(&config.skip_senders)
        .context("Invalid skip sender pattern")?;

    if args.process_all {
        info!("Processing all emails, including already processed ones");
    }

    let processor = ScoringProcessor::new(
        mailbox.clone(),
        ScoringPolicy::new(llm, &config),
        LabelDecisionEngine::new(config.thresholds.clone(), config.labels.clone()),
        rules,
        ledger,
        &config,
    )
    .with_skip_processed(config.skip_processed && !args.process_all);

    let hours_back = args.hours.unwrap_or(config.hours_back);

    if args.continuous {
        let (handle, shutdown) = spawn_continuous(Arc::new(processor), &config, hours_back);
        tokio::signal::ctrl_c().await?;
        info!("Interrupt received, stopping after the current message");
        shutdown.store(true, Ordering::Relaxed);
        handle.await?;
    } else {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, stopping after the current message");
                flag.store(true, Ordering::Relaxed);
            }
        });
        processor.run_once(hours_back, &shutdown).await?;
    }

    mailbox.close().await;
    Ok(())
}

/// Install the tracing subscriber: stderr always, plus a daily rolling file
/// when `MAIL_SCORER_LOG_DIR` is set. The returned guard flushes the file.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("MAIL_SCORER_LOG_LEVEL").unwrap_or_else(|_| "info".into()))
    });
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("MAIL_SCORER_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-scorer.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            None
        }
    }
}
