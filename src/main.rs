use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use unsubscriber::config::Config;
use unsubscriber::email_processor::EmailProcessor;
use unsubscriber::history::OutcomeRecorder;
use unsubscriber::report::HistorySummary;

#[derive(Parser)]
#[command(name = "unsubscriber")]
#[command(about = "Classifies mailbox messages and opts out of newsletters automatically")]
#[command(version)]
struct Args {
    /// Dry-run mode: classify and plan opt-outs without executing, recording or marking anything
    #[arg(short, long)]
    dry_run: bool,

    /// Daemon mode: run at the times listed in SCHEDULER_TIMES
    #[arg(long)]
    daemon: bool,

    /// Directory holding the opt-out history and categorization log
    #[arg(short = 'o', long)]
    data_dir: Option<PathBuf>,

    /// Maximum number of emails to process this run
    #[arg(short = 'l', long)]
    limit: Option<usize>,

    /// Check the configuration without connecting
    #[arg(long)]
    check_config: bool,

    /// Print a summary of the opt-out history and exit
    #[arg(long)]
    report: bool,

    /// Classify only, never attempt an opt-out
    #[arg(long)]
    no_optout: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    env_logger::init();

    if args.report {
        return print_history_report(&args);
    }

    if args.dry_run {
        info!("🧪 Starting newsletter unsubscriber in DRY-RUN mode");
    } else {
        info!("🚀 Starting newsletter unsubscriber");
    }

    let mut config = Config::new()?;
    apply_overrides(&mut config, &args);

    if args.check_config {
        print_config(&config);
        return Ok(());
    }

    if args.daemon {
        info!("🔄 Starting in daemon mode");
        return run_daemon_mode(config, args.dry_run).await;
    }

    let processor = if args.dry_run {
        EmailProcessor::new_dry_run(config)
    } else {
        EmailProcessor::new(config)
    };

    match processor.process_emails().await {
        Ok(stats) => {
            info!("✅ Run finished: {}", stats.summary_line());
            Ok(())
        }
        Err(e) => {
            error!("❌ Error while processing emails: {:#}", e);
            Err(e)
        }
    }
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(limit) = args.limit {
        config.max_emails = limit;
    }
    if args.no_optout {
        config.optout.enabled = false;
    }
}

fn print_config(config: &Config) {
    println!("✅ Configuration is valid!");
    println!("📧 IMAP: {}@{}:{} ({})", config.imap.username, config.imap.server, config.imap.port, config.imap.mailbox);
    println!("   Unread only: {}, category folders: {}", config.imap.unread_only, config.imap.category_folders);
    println!(
        "🤖 LLM: {} at {} (API key: {})",
        config.llm.model,
        config.llm.url,
        if config.llm.api_key.is_some() { "set" } else { "none" }
    );
    println!("✂️  Auto opt-out: {}, timeout {:?}", config.optout.enabled, config.optout.timeout);
    println!(
        "🌐 Browser: {}, headless: {}, executable: {}",
        config.optout.browser_enabled,
        config.optout.headless,
        config.optout.chrome_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "auto-detect".to_string())
    );
    println!("🔢 Max emails per run: {}", config.max_emails);
    println!("📁 Data directory: {}", config.data_dir.display());
    println!("📅 Scheduler: {} {:?}", config.scheduler.enabled, config.scheduler.schedule_times);
    println!("💬 Slack: {}", if config.slack.is_some() { "enabled" } else { "disabled" });
}

/// Needs no credentials: only the data directory is read
fn print_history_report(args: &Args) -> Result<()> {
    let data_dir = args.data_dir
        .clone()
        .or_else(|| std::env::var("DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./data"));

    let recorder = OutcomeRecorder::in_dir(&data_dir)
        .with_context(|| format!("Unable to read opt-out history in {}", data_dir.display()))?;
    HistorySummary::from_records(recorder.records()).print();
    Ok(())
}

async fn run_daemon_mode(config: Config, dry_run: bool) -> Result<()> {
    use chrono::{Local, Timelike};
    use tokio_cron_scheduler::{Job, JobScheduler};

    if !config.scheduler.enabled {
        error!("❌ Daemon mode requires SCHEDULER_ENABLED=true");
        anyhow::bail!("Scheduler not enabled in configuration");
    }

    if config.scheduler.schedule_times.is_empty() {
        error!("❌ No schedule times defined (SCHEDULER_TIMES)");
        anyhow::bail!("No schedule times defined");
    }

    info!("📅 Configured run times: {:?}", config.scheduler.schedule_times);

    let scheduler = JobScheduler::new().await?;

    for schedule_time in &config.scheduler.schedule_times {
        let Some(cron_expr) = cron_expression(schedule_time) else {
            error!("❌ Invalid schedule time: {}. Use the HH:MM format", schedule_time);
            continue;
        };
        info!("📆 Adding scheduled job: {} (cron: {})", schedule_time, cron_expr);

        let config_clone = config.clone();
        let schedule_time_clone = schedule_time.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let config = config_clone.clone();
            let schedule_time = schedule_time_clone.clone();

            Box::pin(async move {
                info!("⏰ Scheduled run at {} - processing mailbox...", schedule_time);

                let processor = if dry_run {
                    EmailProcessor::new_dry_run(config)
                } else {
                    EmailProcessor::new(config)
                };

                match processor.process_emails().await {
                    Ok(stats) => info!("✅ Scheduled run at {} finished: {}", schedule_time, stats.summary_line()),
                    Err(e) => error!("❌ Scheduled run at {} failed: {:#}", schedule_time, e),
                }
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;

    info!("✅ Daemon started. Waiting for scheduled times...");
    info!("⏸️  Press Ctrl+C to stop the daemon");

    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;

        let now = Local::now();
        if now.minute() == 0 {
            info!("💓 Daemon alive - {}", now.format("%Y-%m-%d %H:%M"));
        }
    }
}

/// "HH:MM" -> daily cron expression with seconds
fn cron_expression(schedule_time: &str) -> Option<String> {
    let (hour, minute) = schedule_time.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok().filter(|h| *h < 24)?;
    let minute: u32 = minute.trim().parse().ok().filter(|m| *m < 60)?;
    Some(format!("0 {} {} * * *", minute, hour))
}
