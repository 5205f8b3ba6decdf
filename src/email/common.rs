/// Common structures and utilities for email processing
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

/// Email information retrieved from the mailbox
#[derive(Debug, Clone)]
pub struct EmailInfo {
    /// Mailbox-scoped identifier (IMAP UID)
    pub id: String,
    /// Lowercased sender address, used as the dedup key. Empty when the
    /// message has no usable From address.
    pub sender: String,
    pub sender_display: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub list_unsubscribe: Option<String>,
    pub list_unsubscribe_post: Option<String>,
    pub unread: bool,
}

impl EmailInfo {
    /// Parse a raw RFC 822 message
    pub fn parse(id: impl Into<String>, raw: &[u8], unread: bool) -> Result<Self> {
        let id = id.into();
        let parsed = mail_parser::MessageParser::default()
            .parse(raw)
            .with_context(|| format!("Unable to parse email {}", id))?;

        let email_date = if let Some(date_header) = parsed.date() {
            DateTime::from_timestamp(date_header.to_timestamp(), 0)
                .unwrap_or_else(Utc::now)
        } else {
            warn!("No date in email {}, using current date", id);
            Utc::now()
        };

        let (sender, sender_display) = parsed.from()
            .and_then(|addrs| addrs.first())
            .map(|addr| {
                let address = addr.address.as_deref().unwrap_or("").trim().to_lowercase();
                let display = match (&addr.name, &addr.address) {
                    (Some(name), Some(email)) => format!("{} <{}>", name, email),
                    (None, Some(email)) => email.to_string(),
                    _ => "Unknown sender".to_string(),
                };
                (address, display)
            })
            .unwrap_or_else(|| (String::new(), "Unknown sender".to_string()));

        let subject = parsed.subject()
            .unwrap_or("No subject")
            .to_string();

        let text_body = parsed.body_text(0).map(|b| b.into_owned());
        let html_body = parsed.body_html(0).map(|b| b.into_owned());

        let list_unsubscribe = unfolded_header(&parsed, "List-Unsubscribe");
        let list_unsubscribe_post = unfolded_header(&parsed, "List-Unsubscribe-Post");

        Ok(EmailInfo {
            id,
            sender,
            sender_display,
            subject,
            date: email_date,
            text_body,
            html_body,
            list_unsubscribe,
            list_unsubscribe_post,
            unread,
        })
    }
}

/// Raw header value with folding whitespace collapsed
fn unfolded_header(parsed: &mail_parser::Message<'_>, name: &str) -> Option<String> {
    parsed.header_raw(name)
        .map(|value| value.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|value| !value.is_empty())
}

/// Fixed category set returned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Important,
    Invoice,
    Newsletter,
    Promotional,
    Spam,
    Social,
    Notification,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Important,
        Category::Invoice,
        Category::Newsletter,
        Category::Promotional,
        Category::Spam,
        Category::Social,
        Category::Notification,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Important => "important",
            Category::Invoice => "invoice",
            Category::Newsletter => "newsletter",
            Category::Promotional => "promotional",
            Category::Spam => "spam",
            Category::Social => "social",
            Category::Notification => "notification",
            Category::Other => "other",
        }
    }

    /// Lenient label parsing; unknown labels map to `Other`
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().trim_matches('"').to_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == label || format!("{}s", c.as_str()) == label)
            .unwrap_or(Category::Other)
    }

    /// IMAP folder used when category filing is enabled
    pub fn folder_name(&self) -> &'static str {
        match self {
            Category::Important => "Important",
            Category::Invoice => "Invoices",
            Category::Newsletter => "Newsletters",
            Category::Promotional => "Promotions",
            Category::Spam => "Spam",
            Category::Social => "Social",
            Category::Notification => "Notifications",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict for one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: Category,
    pub confidence: f64,
    pub is_newsletter: bool,
    pub reason: String,
}

impl Classification {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            confidence: 1.0,
            is_newsletter: category == Category::Newsletter,
            reason: String::new(),
        }
    }

    pub fn fallback(reason: impl Into<String>) -> Self {
        Self {
            category: Category::Other,
            confidence: 0.0,
            is_newsletter: false,
            reason: reason.into(),
        }
    }
}

/// A classified message, the input of the opt-out core
#[derive(Debug, Clone)]
pub struct Message {
    pub email: EmailInfo,
    pub classification: Classification,
}

impl Message {
    pub fn new(email: EmailInfo, classification: Classification) -> Self {
        Self { email, classification }
    }

    pub fn id(&self) -> &str {
        &self.email.id
    }

    pub fn sender(&self) -> &str {
        &self.email.sender
    }

    pub fn subject(&self) -> &str {
        &self.email.subject
    }

    pub fn category(&self) -> Category {
        self.classification.category
    }

    pub fn is_newsletter(&self) -> bool {
        self.classification.category == Category::Newsletter || self.classification.is_newsletter
    }
}
