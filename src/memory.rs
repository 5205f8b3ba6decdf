//! What the classifier has learned about senders across runs.
//!
//! Every classification is one JSON line in `llm_memory.jsonl`. Loading the
//! file folds it into one profile per sender; the profile of the current
//! sender is handed to the LLM as extra context.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::email::{Category, Message};
use crate::error::Result;
use crate::history::{append_json_line, read_json_lines};

pub const MEMORY_FILE: &str = "llm_memory.jsonl";

/// Known newsletter senders listed in the prompt
const KNOWN_NEWSLETTERS_IN_PROMPT: usize = 5;

/// Shared between the classifier (reads) and the run loop (writes)
pub type SharedMemory = Arc<Mutex<SenderMemory>>;

/// One remembered classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub sender: String,
    pub category: Category,
    pub is_newsletter: bool,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderProfile {
    pub last_category: Category,
    pub seen: usize,
    pub is_newsletter: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Aggregate counters printed at the end of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    pub emails: usize,
    pub newsletters: usize,
    pub senders: usize,
    /// Non-zero counts, in `Category::ALL` order
    pub categories: Vec<(Category, usize)>,
}

pub struct SenderMemory {
    path: PathBuf,
    profiles: HashMap<String, SenderProfile>,
    category_counts: HashMap<Category, usize>,
    emails: usize,
    newsletters: usize,
}

impl SenderMemory {
    /// Load the memory at `path`; a missing file is an empty memory
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries: Vec<MemoryEntry> = if path.exists() {
            read_json_lines(&path)?
        } else {
            Vec::new()
        };

        let mut memory = Self {
            path,
            profiles: HashMap::new(),
            category_counts: HashMap::new(),
            emails: 0,
            newsletters: 0,
        };
        for entry in &entries {
            memory.learn(entry);
        }

        info!(
            "🧠 Sender memory: {} email(s) from {} sender(s)",
            memory.emails,
            memory.profiles.len()
        );
        Ok(memory)
    }

    pub fn in_dir(data_dir: &Path) -> Result<Self> {
        Self::open(data_dir.join(MEMORY_FILE))
    }

    pub fn shared(self) -> SharedMemory {
        Arc::new(Mutex::new(self))
    }

    pub fn profile(&self, sender: &str) -> Option<&SenderProfile> {
        self.profiles.get(sender)
    }

    /// Prompt section for `sender`, `None` when there is nothing to tell
    pub fn context_for(&self, sender: &str) -> Option<String> {
        let mut parts = Vec::new();

        if let Some(profile) = self.profile(sender) {
            parts.push(format!(
                "Sender history: previously categorized as '{}'. Seen {} time(s). Is newsletter: {}",
                profile.last_category, profile.seen, profile.is_newsletter
            ));
        }

        let mut newsletters: Vec<(&String, &SenderProfile)> = self.profiles
            .iter()
            .filter(|(_, p)| p.is_newsletter)
            .collect();
        newsletters.sort_by(|a, b| b.1.seen.cmp(&a.1.seen).then_with(|| a.0.cmp(b.0)));
        if !newsletters.is_empty() {
            let names = newsletters
                .iter()
                .take(KNOWN_NEWSLETTERS_IN_PROMPT)
                .map(|(sender, _)| sender.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("Known newsletter senders: {}", names));
        }

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Remember a classified message. Messages without a sender are ignored.
    pub fn remember(&mut self, message: &Message) -> Result<()> {
        if message.sender().is_empty() {
            return Ok(());
        }
        let entry = MemoryEntry {
            sender: message.sender().to_string(),
            category: message.category(),
            is_newsletter: message.is_newsletter(),
            subject: message.subject().chars().take(100).collect(),
            timestamp: Utc::now(),
        };
        self.learn(&entry);
        append_json_line(&self.path, &entry)
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            emails: self.emails,
            newsletters: self.newsletters,
            senders: self.profiles.len(),
            categories: Category::ALL
                .iter()
                .filter_map(|c| self.category_counts.get(c).map(|n| (*c, *n)))
                .filter(|(_, n)| *n > 0)
                .collect(),
        }
    }

    fn learn(&mut self, entry: &MemoryEntry) {
        self.emails += 1;
        if entry.is_newsletter {
            self.newsletters += 1;
        }
        *self.category_counts.entry(entry.category).or_insert(0) += 1;

        self.profiles
            .entry(entry.sender.clone())
            .and_modify(|p| {
                p.last_category = entry.category;
                p.seen += 1;
                p.is_newsletter = entry.is_newsletter;
                p.last_seen = entry.timestamp;
            })
            .or_insert_with(|| SenderProfile {
                last_category: entry.category,
                seen: 1,
                is_newsletter: entry.is_newsletter,
                first_seen: entry.timestamp,
                last_seen: entry.timestamp,
            });
    }
}
