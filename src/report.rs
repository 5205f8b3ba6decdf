//! Run statistics and human-readable reports.

use std::collections::{HashMap, HashSet};

use crate::email::Message;
use crate::history::OptOutAttempt;
use crate::memory::MemoryStats;
use crate::optout::{Disposition, ExecutionMethod, Outcome, SkipReason};

const OUTCOME_ORDER: [Outcome; 4] = [
    Outcome::Success,
    Outcome::Failure,
    Outcome::ManualRequired,
    Outcome::Skipped,
];

/// A dry-run plan entry
#[derive(Debug, Clone)]
pub struct PlannedOptOut {
    pub sender: String,
    pub subject: String,
    pub method: ExecutionMethod,
    pub target: String,
}

/// Counters for one run
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    /// Messages that entered the pipeline
    pub considered: usize,
    /// Fetched messages left alone because of the cap
    pub untouched: usize,
    pub errored: usize,
    pub not_newsletter: usize,
    pub opt_out_disabled: usize,
    pub outcomes: HashMap<Outcome, usize>,
    pub planned: Vec<PlannedOptOut>,
    /// Failures and manual opt-outs someone has to look at
    pub follow_ups: Vec<OptOutAttempt>,
    pub storage_warnings: usize,
    /// Sender memory after the run, when one is attached
    pub memory: Option<MemoryStats>,
}

impl RunStats {
    pub fn record(&mut self, message: &Message, disposition: &Disposition) {
        match disposition {
            Disposition::Completed(attempt) => {
                *self.outcomes.entry(attempt.outcome).or_insert(0) += 1;
                if matches!(attempt.outcome, Outcome::Failure | Outcome::ManualRequired) {
                    self.follow_ups.push(attempt.clone());
                }
            }
            Disposition::Skipped(SkipReason::NotNewsletter) => self.not_newsletter += 1,
            Disposition::Skipped(SkipReason::OptOutDisabled) => self.opt_out_disabled += 1,
            Disposition::Skipped(_) => *self.outcomes.entry(Outcome::Skipped).or_insert(0) += 1,
            Disposition::Planned { signal, method } => self.planned.push(PlannedOptOut {
                sender: message.sender().to_string(),
                subject: message.subject().to_string(),
                method: *method,
                target: signal.target.clone(),
            }),
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    /// One-line summary, used for logs and Slack
    pub fn summary_line(&self) -> String {
        format!(
            "{} message(s): {} unsubscribed, {} failed, {} manual, {} skipped, {} errored",
            self.considered,
            self.count(Outcome::Success),
            self.count(Outcome::Failure),
            self.count(Outcome::ManualRequired),
            self.count(Outcome::Skipped),
            self.errored
        )
    }

    pub fn print(&self, dry_run: bool) {
        println!("\n{}", "=".repeat(80));
        if dry_run {
            println!("🧪 DRY-RUN REPORT");
        } else {
            println!("📊 RUN REPORT");
        }
        println!("{}", "=".repeat(80));
        println!("Messages processed:   {}", self.considered);
        if self.untouched > 0 {
            println!("Left for next run:    {}", self.untouched);
        }
        println!("Not newsletters:      {}", self.not_newsletter);
        if self.opt_out_disabled > 0 {
            println!("Opt-out disabled:     {}", self.opt_out_disabled);
        }
        for outcome in OUTCOME_ORDER {
            println!("{:<22}{}", format!("{}:", outcome), self.count(outcome));
        }
        println!("Errored:              {}", self.errored);
        if self.storage_warnings > 0 {
            println!("⚠️  History writes lost: {}", self.storage_warnings);
        }

        if !self.planned.is_empty() {
            println!("\n📝 Planned opt-outs:");
            for plan in &self.planned {
                println!("  • {} [{}] {}", plan.sender, plan.method, plan.target);
                println!("    {}", plan.subject);
            }
        }

        if !self.follow_ups.is_empty() {
            println!("\n✋ Needs follow-up:");
            for attempt in &self.follow_ups {
                print_follow_up(attempt);
            }
        }

        if let Some(memory) = &self.memory {
            print_memory(memory);
        }
        println!("{}", "=".repeat(80));
    }
}

fn print_memory(memory: &MemoryStats) {
    println!("\n🧠 Sender memory:");
    println!("  Emails remembered:    {}", memory.emails);
    println!("  Newsletters:          {}", memory.newsletters);
    println!("  Known senders:        {}", memory.senders);
    if !memory.categories.is_empty() {
        println!("  Categories learned:");
        for (category, count) in &memory.categories {
            println!("    {:<18}{}", format!("{}:", category), count);
        }
    }
}

fn print_follow_up(attempt: &OptOutAttempt) {
    println!(
        "  • {} ({}) {}",
        attempt.sender,
        attempt.outcome,
        attempt.target.as_deref().unwrap_or("-")
    );
    if let Some(reason) = &attempt.reason {
        println!("    reason: {}", reason);
    }
}

/// Aggregate view over the whole History Store
#[derive(Debug, Default)]
pub struct HistorySummary {
    pub total: usize,
    pub outcomes: HashMap<Outcome, usize>,
    pub unsubscribed_senders: usize,
    /// Latest failed or manual attempt per sender that never succeeded
    pub outstanding: Vec<OptOutAttempt>,
}

impl HistorySummary {
    pub fn from_records(records: &[OptOutAttempt]) -> Self {
        let mut outcomes = HashMap::new();
        let mut succeeded = HashSet::new();
        for record in records {
            *outcomes.entry(record.outcome).or_insert(0) += 1;
            if record.outcome == Outcome::Success {
                succeeded.insert(record.sender.as_str());
            }
        }

        let mut latest: HashMap<&str, &OptOutAttempt> = HashMap::new();
        for record in records {
            if matches!(record.outcome, Outcome::Failure | Outcome::ManualRequired)
                && !succeeded.contains(record.sender.as_str())
            {
                latest.insert(record.sender.as_str(), record);
            }
        }
        let mut outstanding: Vec<OptOutAttempt> = latest.into_values().cloned().collect();
        outstanding.sort_by(|a, b| a.attempted_at.cmp(&b.attempted_at));

        Self {
            total: records.len(),
            outcomes,
            unsubscribed_senders: succeeded.len(),
            outstanding,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📚 OPT-OUT HISTORY");
        println!("{}", "=".repeat(80));
        println!("Records:              {}", self.total);
        println!("Senders unsubscribed: {}", self.unsubscribed_senders);
        for outcome in OUTCOME_ORDER {
            println!(
                "{:<22}{}",
                format!("{}:", outcome),
                self.outcomes.get(&outcome).copied().unwrap_or(0)
            );
        }
        if !self.outstanding.is_empty() {
            println!("\n✋ Still subscribed, needs follow-up:");
            for attempt in &self.outstanding {
                print_follow_up(attempt);
            }
        }
        println!("{}", "=".repeat(80));
    }
}
