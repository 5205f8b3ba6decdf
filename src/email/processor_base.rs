use std::panic::AssertUnwindSafe;
use std::sync::PoisonError;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{error, info, warn};

use super::common::{EmailInfo, Message};
use crate::classifier::Classifier;
use crate::error::OptOutError;
use crate::history::CategorizationLog;
use crate::memory::SharedMemory;
use crate::optout::{Disposition, OptOutCoordinator};
use crate::report::RunStats;
use crate::slack_notifier::SlackNotifier;

/// Where messages come from, and how a handled message is marked
pub trait MailSource: Send {
    /// At most `limit` messages, newest first
    fn fetch_messages(&mut self, limit: usize) -> BoxFuture<'_, Result<Vec<EmailInfo>>>;

    /// Mark a handled message (read flag, filing). Never edits content.
    fn mark_processed<'a>(&'a mut self, message: &'a Message) -> BoxFuture<'a, Result<()>>;

    /// Flush pending mailbox changes at the end of a run
    fn finish(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Get the name of this source (for logging)
    fn source_name(&self) -> &str;
}

/// Per-run settings of the processor
#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    /// Cap on messages considered per run
    pub max_messages: usize,
    pub dry_run: bool,
}

/// Drives one run: fetch, classify, opt-out, mark
pub struct BaseEmailProcessor<M: MailSource, C: Classifier> {
    mail: M,
    classifier: C,
    coordinator: OptOutCoordinator,
    categorization: CategorizationLog,
    memory: Option<SharedMemory>,
    slack: Option<SlackNotifier>,
    settings: RunSettings,
}

impl<M: MailSource, C: Classifier> BaseEmailProcessor<M, C> {
    pub fn new(
        mail: M,
        classifier: C,
        coordinator: OptOutCoordinator,
        categorization: CategorizationLog,
        settings: RunSettings,
    ) -> Self {
        info!("Initializing email processor for {}", mail.source_name());
        BaseEmailProcessor {
            mail,
            classifier,
            coordinator,
            categorization,
            memory: None,
            slack: None,
            settings,
        }
    }

    pub fn with_slack(mut self, slack: Option<SlackNotifier>) -> Self {
        // No Slack notifications in dry-run mode
        self.slack = if self.settings.dry_run { None } else { slack };
        self
    }

    /// Remember each classification for later prompts; read-only in dry-run mode
    pub fn with_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn coordinator(&self) -> &OptOutCoordinator {
        &self.coordinator
    }

    /// Process up to the per-run cap. Returns `Err` only when the run cannot
    /// continue (mailbox unreachable, browser unavailable).
    pub async fn run(&mut self) -> Result<RunStats> {
        let dry_run = self.settings.dry_run;
        if dry_run {
            println!("\n{}", "=".repeat(80));
            println!("🧪 DRY-RUN MODE - NEWSLETTER OPT-OUT ANALYSIS");
            println!("{}", "=".repeat(80));
        } else {
            info!("Starting newsletter processing");
        }

        let emails = self.mail
            .fetch_messages(self.settings.max_messages)
            .await
            .context("Error fetching emails")?;

        let mut stats = RunStats::default();
        if emails.is_empty() {
            info!("No emails to process in {}", self.mail.source_name());
            self.finish_run(&mut stats).await;
            return Ok(stats);
        }
        info!("📬 {} email(s) to process", emails.len());

        let total = emails.len();
        for (index, email) in emails.into_iter().enumerate() {
            if stats.considered >= self.settings.max_messages {
                stats.untouched = total - index;
                info!(
                    "Per-run cap of {} reached, {} email(s) left for the next run",
                    self.settings.max_messages, stats.untouched
                );
                break;
            }
            stats.considered += 1;

            let message_id = email.id.clone();
            if dry_run {
                println!("📧 Email {}/{} (ID: {})", index + 1, total, message_id);
                println!("{}", "-".repeat(60));
            }

            let result = AssertUnwindSafe(self.process_single_email(email, &mut stats))
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) if is_fatal(&e) => {
                    error!("❌ Aborting run: {:#}", e);
                    self.finish_run(&mut stats).await;
                    return Err(e);
                }
                Ok(Err(e)) => {
                    stats.errored += 1;
                    error!("Error processing email {}: {:#}", message_id, e);
                    if let Some(slack) = &self.slack {
                        let _ = slack.notify_error(&message_id, &format!("{:#}", e)).await;
                    }
                }
                Err(panic) => {
                    stats.errored += 1;
                    error!("Processing of email {} panicked: {}", message_id, panic_message(&panic));
                }
            }
        }

        self.finish_run(&mut stats).await;
        Ok(stats)
    }

    async fn process_single_email(&mut self, email: EmailInfo, stats: &mut RunStats) -> Result<()> {
        let dry_run = self.settings.dry_run;

        let classification = self.classifier.classify(&email).await;
        let message = Message::new(email, classification);
        info!(
            "📧 [{}] '{}' from {} -> {}",
            message.id(),
            message.subject(),
            message.sender(),
            message.category()
        );

        if !dry_run {
            if let Err(e) = self.categorization.append(&message) {
                warn!("Unable to log categorization of {}: {}", message.id(), e);
            }
            if let Some(memory) = &self.memory {
                let remembered = memory
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remember(&message);
                if let Err(e) = remembered {
                    warn!("Unable to remember sender of {}: {}", message.id(), e);
                }
            }
        }

        let disposition = self.coordinator
            .process_message(&message)
            .await
            .with_context(|| format!("Opt-out pipeline failed for {}", message.sender()))?;
        stats.record(&message, &disposition);

        if dry_run {
            print_disposition(&message, &disposition);
            return Ok(());
        }

        if let Err(e) = self.mail.mark_processed(&message).await {
            error!("Failed to mark email {} as processed: {:#}", message.id(), e);
        }
        Ok(())
    }

    async fn finish_run(&mut self, stats: &mut RunStats) {
        stats.storage_warnings = self.coordinator.storage_warnings();
        stats.memory = self.memory
            .as_ref()
            .map(|memory| memory.lock().unwrap_or_else(PoisonError::into_inner).stats());

        if let Err(e) = self.mail.finish().await {
            warn!("Unable to finalize mailbox changes: {:#}", e);
        }

        stats.print(self.settings.dry_run);
        info!("Processing completed: {}", stats.summary_line());

        if let Some(slack) = &self.slack {
            if let Err(e) = slack.notify_run_summary(stats).await {
                warn!("⚠️  {:#}", e);
            }
        }
    }
}

fn is_fatal(e: &anyhow::Error) -> bool {
    e.downcast_ref::<OptOutError>()
        .map(OptOutError::is_fatal)
        .unwrap_or(false)
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn print_disposition(message: &Message, disposition: &Disposition) {
    println!("From:     {}", message.email.sender_display);
    println!("Subject:  {}", message.subject());
    println!(
        "Category: {} (confidence {:.2})",
        message.category(),
        message.classification.confidence
    );
    match disposition {
        Disposition::Planned { signal, method } => {
            println!("✅ Would opt out via {} ({} from {:?})", method, signal.kind.as_str(), signal.source);
            println!("   {}", signal.target);
        }
        Disposition::Skipped(reason) => println!("⏭️  Skipped: {}", reason.as_str()),
        Disposition::Completed(attempt) => println!("Outcome: {}", attempt.outcome),
    }
    println!();
}
