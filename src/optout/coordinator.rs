use log::{debug, info, warn};

use super::executor::{OptOutExecutor, Outcome};
use super::extractor::{LinkExtractor, UnsubscribeSignal};
use super::strategy::{ExecutionMethod, StrategySelector};
use crate::email::Message;
use crate::error::Result;
use crate::history::{OptOutAttempt, OutcomeRecorder};

/// Settings the coordinator needs, taken from the run configuration
#[derive(Debug, Clone, Copy)]
pub struct OptOutSettings {
    pub enabled: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotNewsletter,
    OptOutDisabled,
    NoSender,
    NoSignal,
    AlreadyUnsubscribed,
    AlreadyAttemptedThisRun,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotNewsletter => "not a newsletter",
            SkipReason::OptOutDisabled => "opt-out disabled",
            SkipReason::NoSender => "no sender",
            SkipReason::NoSignal => "no signal",
            SkipReason::AlreadyUnsubscribed => "already unsubscribed",
            SkipReason::AlreadyAttemptedThisRun => "already attempted this run",
        }
    }
}

/// Where a message ended up in the opt-out pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Completed(OptOutAttempt),
    Skipped(SkipReason),
    /// Dry run: what would have been executed
    Planned {
        signal: UnsubscribeSignal,
        method: ExecutionMethod,
    },
}

/// Runs one classified message through extraction, dedup, execution and recording
pub struct OptOutCoordinator {
    settings: OptOutSettings,
    extractor: LinkExtractor,
    selector: StrategySelector,
    executor: OptOutExecutor,
    recorder: OutcomeRecorder,
    storage_warnings: usize,
}

impl OptOutCoordinator {
    pub fn new(
        settings: OptOutSettings,
        extractor: LinkExtractor,
        selector: StrategySelector,
        executor: OptOutExecutor,
        recorder: OutcomeRecorder,
    ) -> Self {
        Self {
            settings,
            extractor,
            selector,
            executor,
            recorder,
            storage_warnings: 0,
        }
    }

    pub fn recorder(&self) -> &OutcomeRecorder {
        &self.recorder
    }

    /// Number of attempts that could not be persisted this run
    pub fn storage_warnings(&self) -> usize {
        self.storage_warnings
    }

    /// Only a fatal executor error is returned as `Err`.
    pub async fn process_message(&mut self, message: &Message) -> Result<Disposition> {
        if !message.is_newsletter() {
            return Ok(Disposition::Skipped(SkipReason::NotNewsletter));
        }
        if !self.settings.enabled {
            debug!("Opt-out disabled, leaving {}", message.sender());
            return Ok(Disposition::Skipped(SkipReason::OptOutDisabled));
        }

        // An empty sender cannot key the dedup index
        if message.sender().is_empty() {
            info!("🔍 No sender address on '{}', leaving it alone", message.subject());
            return Ok(self.skip(message, SkipReason::NoSender, None));
        }

        let signals = self.extractor.extract(message);
        let Some(signal) = signals.into_iter().next() else {
            info!("🔍 No unsubscribe signal in '{}' from {}", message.subject(), message.sender());
            return Ok(self.skip(message, SkipReason::NoSignal, None));
        };

        if self.recorder.has_succeeded(message.sender()) {
            info!("⏭️  Already unsubscribed from {}", message.sender());
            return Ok(self.skip(message, SkipReason::AlreadyUnsubscribed, Some(&signal)));
        }
        if !self.recorder.should_attempt(message.sender()) {
            info!("⏭️  {} already handled in this run", message.sender());
            return Ok(self.skip(message, SkipReason::AlreadyAttemptedThisRun, Some(&signal)));
        }

        let method = self.selector.select(&signal);
        if self.settings.dry_run {
            return Ok(Disposition::Planned { signal, method });
        }

        let report = self.executor.execute(&signal.target, method).await?;
        match report.outcome {
            Outcome::Success => info!("✅ Unsubscribed from {}", message.sender()),
            Outcome::ManualRequired => info!("✋ Manual opt-out needed for {}: {}", message.sender(), signal.target),
            _ => warn!(
                "❌ Opt-out failed for {}: {}",
                message.sender(),
                report.reason.as_deref().unwrap_or("unknown")
            ),
        }

        let attempt = OptOutAttempt::new(message, report.outcome)
            .with_signal(&signal)
            .with_method(method)
            .with_reason(report.reason);
        self.persist(attempt.clone());
        Ok(Disposition::Completed(attempt))
    }

    fn skip(&mut self, message: &Message, reason: SkipReason, signal: Option<&UnsubscribeSignal>) -> Disposition {
        if !self.settings.dry_run {
            let mut attempt = OptOutAttempt::new(message, Outcome::Skipped)
                .with_reason(Some(reason.as_str().to_string()));
            if let Some(signal) = signal {
                attempt = attempt.with_signal(signal);
            }
            self.persist(attempt);
        }
        Disposition::Skipped(reason)
    }

    fn persist(&mut self, attempt: OptOutAttempt) {
        let sender = attempt.sender.clone();
        if let Err(e) = self.recorder.record(attempt) {
            self.storage_warnings += 1;
            warn!("⚠️  Opt-out record for {} was not saved (data loss): {}", sender, e);
        }
    }
}
