use anyhow::{Context, Result};
use log::{info, warn};

use crate::classifier::LlmClassifier;
use crate::config::Config;
use crate::email::{BaseEmailProcessor, RunSettings};
use crate::history::{CategorizationLog, OutcomeRecorder};
use crate::imap_client::ImapClient;
use crate::memory::SenderMemory;
use crate::optout::{
    ChromeLauncher, LinkExtractor, OptOutCoordinator, OptOutExecutor, OptOutSettings, StrategySelector,
};
use crate::report::RunStats;
use crate::slack_notifier::SlackNotifier;

/// Wires the IMAP mailbox, the LLM classifier and the opt-out core for one run
pub struct EmailProcessor {
    config: Config,
    dry_run: bool,
}

impl EmailProcessor {
    pub fn new(config: Config) -> Self {
        info!("Initializing email processor");
        EmailProcessor { config, dry_run: false }
    }

    pub fn new_dry_run(config: Config) -> Self {
        info!("🧪 Initializing email processor in dry-run mode (nothing executed, recorded or marked)");
        EmailProcessor { config, dry_run: true }
    }

    pub fn build_coordinator(config: &Config, dry_run: bool) -> Result<OptOutCoordinator> {
        let optout = &config.optout;
        let launcher = ChromeLauncher::new(optout.headless, optout.chrome_path.clone(), optout.timeout);
        let executor = OptOutExecutor::new(Box::new(launcher), optout.timeout)
            .context("Unable to initialize opt-out executor")?;
        let recorder = OutcomeRecorder::in_dir(&config.data_dir)
            .with_context(|| format!("Unable to load opt-out history from {}", config.data_dir.display()))?;

        Ok(OptOutCoordinator::new(
            OptOutSettings { enabled: optout.enabled, dry_run },
            LinkExtractor::new().context("Unable to initialize link extractor")?,
            StrategySelector::new(optout.browser_enabled),
            executor,
            recorder,
        ))
    }

    pub async fn process_emails(&self) -> Result<RunStats> {
        let coordinator = Self::build_coordinator(&self.config, self.dry_run)?;
        let memory = match SenderMemory::in_dir(&self.config.data_dir) {
            Ok(memory) => Some(memory.shared()),
            Err(e) => {
                warn!("⚠️  Unable to load sender memory: {} - classifying without it", e);
                None
            }
        };
        let mut classifier = LlmClassifier::new(&self.config.llm)?;
        if let Some(memory) = &memory {
            classifier = classifier.with_memory(memory.clone());
        }
        let imap_client = ImapClient::new(&self.config.imap)
            .await
            .context("Unable to connect to IMAP server")?;

        let slack = match &self.config.slack {
            Some(slack_config) => match SlackNotifier::new(slack_config) {
                Ok(notifier) => {
                    info!("✅ Slack notifications enabled");
                    Some(notifier)
                }
                Err(e) => {
                    warn!("⚠️  Unable to initialize Slack notifier: {} - notifications disabled", e);
                    None
                }
            },
            None => None,
        };

        let settings = RunSettings {
            max_messages: self.config.max_emails,
            dry_run: self.dry_run,
        };
        let mut processor = BaseEmailProcessor::new(
            imap_client,
            classifier,
            coordinator,
            CategorizationLog::in_dir(&self.config.data_dir),
            settings,
        )
        .with_slack(slack);
        if let Some(memory) = memory {
            processor = processor.with_memory(memory);
        }

        processor.run().await
    }
}
