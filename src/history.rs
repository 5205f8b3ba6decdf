//! Durable opt-out history.
//!
//! Every attempt is one JSON object on its own line in `optout_history.jsonl`.
//! The file is only ever appended to; reading it back rebuilds the set of
//! senders that already have a successful opt-out.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::email::common::{Category, Message};
use crate::error::Result;
use crate::optout::executor::Outcome;
use crate::optout::extractor::{SignalKind, UnsubscribeSignal};
use crate::optout::strategy::ExecutionMethod;

pub const HISTORY_FILE: &str = "optout_history.jsonl";
pub const CATEGORIZATION_FILE: &str = "categorization_results.jsonl";

/// One opt-out attempt, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptOutAttempt {
    pub id: Uuid,
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub signal_kind: Option<SignalKind>,
    pub target: Option<String>,
    pub method: Option<ExecutionMethod>,
    pub outcome: Outcome,
    pub reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl OptOutAttempt {
    pub fn new(message: &Message, outcome: Outcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            message_id: message.id().to_string(),
            sender: message.sender().to_string(),
            subject: message.subject().to_string(),
            signal_kind: None,
            target: None,
            method: None,
            outcome,
            reason: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn with_signal(mut self, signal: &UnsubscribeSignal) -> Self {
        self.signal_kind = Some(signal.kind);
        self.target = Some(signal.target.clone());
        self
    }

    pub fn with_method(mut self, method: ExecutionMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// Owns the History Store and the dedup index built from it
pub struct OutcomeRecorder {
    path: PathBuf,
    records: Vec<OptOutAttempt>,
    succeeded: HashSet<String>,
    handled_this_run: HashSet<String>,
}

impl OutcomeRecorder {
    /// Load the history at `path`. A missing file is an empty history;
    /// unreadable lines (such as a truncated last line) are skipped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records: Vec<OptOutAttempt> = if path.exists() {
            read_json_lines(&path)?
        } else {
            Vec::new()
        };

        let succeeded = records
            .iter()
            .filter(|r| r.outcome == Outcome::Success)
            .map(|r| r.sender.clone())
            .collect::<HashSet<_>>();

        info!(
            "📚 Loaded {} opt-out records ({} senders already unsubscribed)",
            records.len(),
            succeeded.len()
        );

        Ok(Self {
            path,
            records,
            succeeded,
            handled_this_run: HashSet::new(),
        })
    }

    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join(HISTORY_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_succeeded(&self, sender: &str) -> bool {
        self.succeeded.contains(sender)
    }

    pub fn should_attempt(&self, sender: &str) -> bool {
        !self.has_succeeded(sender) && !self.handled_this_run.contains(sender)
    }

    /// Append one attempt. The in-memory index is updated before the write,
    /// so a failed write still blocks repeated attempts for this sender.
    pub fn record(&mut self, attempt: OptOutAttempt) -> Result<()> {
        if attempt.method.is_some() {
            self.handled_this_run.insert(attempt.sender.clone());
        }
        if attempt.outcome == Outcome::Success {
            self.succeeded.insert(attempt.sender.clone());
        }

        let written = append_json_line(&self.path, &attempt);
        debug!("Recorded {} for {}", attempt.outcome, attempt.sender);
        self.records.push(attempt);
        written
    }

    pub fn records(&self) -> &[OptOutAttempt] {
        &self.records
    }
}

/// Read every parseable JSON line of `path`, skipping the rest
pub(crate) fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    // Raw bytes: a line cut inside a multi-byte character must not poison the file
    let content = fs::read(path)?;
    let mut entries = Vec::new();

    for (line_no, line) in content.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<T>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                "Skipping unreadable line {} in {}: {}",
                line_no + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(entries)
}

pub(crate) fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut line = serde_json::to_string(value).map_err(std::io::Error::from)?;
    line.push('\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// One line of the categorization log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizationEntry {
    pub timestamp: DateTime<Utc>,
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub category: Category,
    pub confidence: f64,
    pub is_newsletter: bool,
    pub reason: String,
}

/// Append-only log of every classification
pub struct CategorizationLog {
    path: PathBuf,
}

impl CategorizationLog {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self { path: data_dir.join(CATEGORIZATION_FILE) }
    }

    pub fn append(&self, message: &Message) -> Result<()> {
        let entry = CategorizationEntry {
            timestamp: Utc::now(),
            message_id: message.id().to_string(),
            sender: message.sender().to_string(),
            subject: message.subject().to_string(),
            category: message.category(),
            confidence: message.classification.confidence,
            is_newsletter: message.classification.is_newsletter,
            reason: message.classification.reason.clone(),
        };
        append_json_line(&self.path, &entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::common::{Classification, EmailInfo};
    use tempfile::TempDir;

    fn message(id: &str, sender: &str) -> Message {
        let raw = format!("From: {}\r\nSubject: Issue {}\r\n\r\nbody\r\n", sender, id);
        let email = EmailInfo::parse(id, raw.as_bytes(), true).unwrap();
        Message::new(email, Classification::new(Category::Newsletter))
    }

    #[test]
    fn test_success_blocks_sender_across_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE);

        let mut recorder = OutcomeRecorder::open(&path).unwrap();
        assert!(recorder.should_attempt("news@x.test"));
        let attempt = OptOutAttempt::new(&message("1", "news@x.test"), Outcome::Success)
            .with_method(ExecutionMethod::BrowserAutomation);
        recorder.record(attempt).unwrap();
        assert!(!recorder.should_attempt("news@x.test"));

        let reopened = OutcomeRecorder::open(&path).unwrap();
        assert!(reopened.has_succeeded("news@x.test"));
        assert!(!reopened.should_attempt("news@x.test"));
        assert_eq!(reopened.records().len(), 1);
    }

    #[test]
    fn test_failure_blocks_only_current_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE);

        let mut recorder = OutcomeRecorder::open(&path).unwrap();
        let attempt = OptOutAttempt::new(&message("1", "news@x.test"), Outcome::Failure)
            .with_method(ExecutionMethod::DirectFetch)
            .with_reason(Some("timeout".to_string()));
        recorder.record(attempt).unwrap();
        assert!(!recorder.should_attempt("news@x.test"));

        let next_run = OutcomeRecorder::open(&path).unwrap();
        assert!(next_run.should_attempt("news@x.test"));
        assert_eq!(next_run.records()[0].reason.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_skip_without_method_does_not_block() {
        let dir = TempDir::new().unwrap();
        let mut recorder = OutcomeRecorder::in_dir(dir.path()).unwrap();
        recorder
            .record(OptOutAttempt::new(&message("1", "news@x.test"), Outcome::Skipped)
                .with_reason(Some("no signal".to_string())))
            .unwrap();
        assert!(recorder.should_attempt("news@x.test"));
    }

    #[test]
    fn test_truncated_last_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        {
            let mut recorder = OutcomeRecorder::open(&path).unwrap();
            recorder
                .record(OptOutAttempt::new(&message("1", "a@x.test"), Outcome::Success)
                    .with_method(ExecutionMethod::HeaderMechanism))
                .unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"0b0c").unwrap();

        let recorder = OutcomeRecorder::open(&path).unwrap();
        assert_eq!(recorder.records().len(), 1);
        assert!(recorder.has_succeeded("a@x.test"));
    }

    #[test]
    fn test_truncated_multibyte_line_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(HISTORY_FILE);
        {
            let mut recorder = OutcomeRecorder::open(&path).unwrap();
            recorder
                .record(OptOutAttempt::new(&message("1", "a@x.test"), Outcome::Success)
                    .with_method(ExecutionMethod::HeaderMechanism))
                .unwrap();
        }
        // Cut in the middle of "é"
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"subject\":\"Caf\xc3").unwrap();

        let recorder = OutcomeRecorder::open(&path).unwrap();
        assert_eq!(recorder.records().len(), 1);
        assert!(recorder.has_succeeded("a@x.test"));
    }

    #[test]
    fn test_write_failure_still_updates_index() {
        let dir = TempDir::new().unwrap();
        // A directory where the history file should be makes every append fail
        let path = dir.path().join(HISTORY_FILE);
        fs::create_dir_all(&path).unwrap();

        let mut recorder = OutcomeRecorder {
            path,
            records: Vec::new(),
            succeeded: HashSet::new(),
            handled_this_run: HashSet::new(),
        };
        let attempt = OptOutAttempt::new(&message("1", "a@x.test"), Outcome::Success)
            .with_method(ExecutionMethod::HeaderMechanism);
        assert!(recorder.record(attempt).is_err());
        assert!(!recorder.should_attempt("a@x.test"));
        assert_eq!(recorder.records().len(), 1);
    }

    #[test]
    fn test_categorization_log_appends() {
        let dir = TempDir::new().unwrap();
        let log = CategorizationLog::in_dir(dir.path());
        log.append(&message("1", "a@x.test")).unwrap();
        log.append(&message("2", "b@x.test")).unwrap();

        let content = fs::read_to_string(dir.path().join(CATEGORIZATION_FILE)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: CategorizationEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry.sender, "b@x.test");
        assert_eq!(entry.category, Category::Newsletter);
    }
}
