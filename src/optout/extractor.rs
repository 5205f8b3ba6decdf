use std::collections::HashSet;

use log::debug;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::email::Message;
use crate::error::{OptOutError, Result};

/// Tokens that mark a link or form as an unsubscribe mechanism
pub const UNSUBSCRIBE_TOKENS: [&str; 6] = [
    "unsubscribe",
    "opt-out",
    "opt out",
    "remove me",
    "manage preferences",
    "email preferences",
];

const PRIORITY_ONE_CLICK: u8 = 100;
const PRIORITY_LINK_TEXT: u8 = 90;
const PRIORITY_LINK_HREF: u8 = 70;
const PRIORITY_FORM: u8 = 60;
const PRIORITY_HEADER_LINK: u8 = 50;
const PRIORITY_TEXT_URL: u8 = 40;
const PRIORITY_MAILTO: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// RFC 8058 one-click header
    OneClick,
    Link,
    FormAction,
    Mailto,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::OneClick => "one_click",
            SignalKind::Link => "link",
            SignalKind::FormAction => "form_action",
            SignalKind::Mailto => "mailto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalSource {
    Header,
    Html,
    Text,
}

/// A located, not-yet-executed unsubscribe mechanism
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeSignal {
    pub kind: SignalKind,
    pub target: String,
    pub priority: u8,
    pub source: SignalSource,
}

impl UnsubscribeSignal {
    fn new(kind: SignalKind, target: impl Into<String>, priority: u8, source: SignalSource) -> Self {
        Self {
            kind,
            target: target.into(),
            priority,
            source,
        }
    }
}

/// Scans headers and bodies for unsubscribe signals
pub struct LinkExtractor {
    header_entry: Regex,
    text_url: Regex,
    mailto: Regex,
    anchors: Selector,
    forms: Selector,
    form_labels: Selector,
}

impl LinkExtractor {
    pub fn new() -> Result<Self> {
        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| OptOutError::Extraction(e.to_string()))
        };
        let selector = |css: &str| {
            Selector::parse(css).map_err(|e| OptOutError::Extraction(format!("{:?}", e)))
        };

        Ok(Self {
            header_entry: regex(r"<([^>]+)>")?,
            text_url: regex(r#"https?://[^\s<>"'{}|\\^`\[\]]+"#)?,
            mailto: regex(r#"(?i)mailto:[^\s<>"'()]+"#)?,
            anchors: selector("a[href]")?,
            forms: selector("form[action]")?,
            form_labels: selector("button, input[type=submit], input[type=button]")?,
        })
    }

    /// Signals for `message`, highest priority first.
    ///
    /// Deterministic: ties keep the order in which signals were found, and a
    /// target seen twice is only reported once.
    pub fn extract(&self, message: &Message) -> Vec<UnsubscribeSignal> {
        let email = &message.email;
        let mut signals = Vec::new();
        let mut mailtos = Vec::new();

        if let Some(header) = email.list_unsubscribe.as_deref() {
            let one_click = email.list_unsubscribe_post
                .as_deref()
                .map(|v| v.to_lowercase().contains("list-unsubscribe=one-click"))
                .unwrap_or(false);
            self.scan_header(header, one_click, &mut signals, &mut mailtos);
        }

        if let Some(html) = email.html_body.as_deref() {
            self.scan_html(html, &mut signals, &mut mailtos);
        }

        if let Some(text) = email.text_body.as_deref() {
            self.scan_text(text, &mut signals, &mut mailtos);
        }

        // Mail actions are only a fallback
        if signals.is_empty() {
            signals = mailtos;
        }

        // Stable sort: equal priorities stay in extraction order
        signals.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut seen = HashSet::new();
        signals.retain(|s| seen.insert(s.target.clone()));

        debug!("Extracted {} unsubscribe signal(s) from message {}", signals.len(), email.id);
        signals
    }

    fn scan_header(
        &self,
        header: &str,
        one_click: bool,
        signals: &mut Vec<UnsubscribeSignal>,
        mailtos: &mut Vec<UnsubscribeSignal>,
    ) {
        for caps in self.header_entry.captures_iter(header) {
            let entry = caps[1].trim();
            let lower = entry.to_lowercase();
            if lower.starts_with("https://") && one_click {
                signals.push(UnsubscribeSignal::new(SignalKind::OneClick, entry, PRIORITY_ONE_CLICK, SignalSource::Header));
            } else if lower.starts_with("http://") || lower.starts_with("https://") {
                signals.push(UnsubscribeSignal::new(SignalKind::Link, entry, PRIORITY_HEADER_LINK, SignalSource::Header));
            } else if lower.starts_with("mailto:") {
                mailtos.push(UnsubscribeSignal::new(SignalKind::Mailto, entry, PRIORITY_MAILTO, SignalSource::Header));
            }
        }
    }

    fn scan_html(
        &self,
        html: &str,
        signals: &mut Vec<UnsubscribeSignal>,
        mailtos: &mut Vec<UnsubscribeSignal>,
    ) {
        let document = Html::parse_document(html);

        for anchor in document.select(&self.anchors) {
            let Some(href) = anchor.value().attr("href").map(str::trim) else {
                continue;
            };
            let lower_href = href.to_lowercase();
            if lower_href.starts_with("mailto:") {
                mailtos.push(UnsubscribeSignal::new(SignalKind::Mailto, href, PRIORITY_MAILTO, SignalSource::Html));
                continue;
            }
            if !(lower_href.starts_with("http://") || lower_href.starts_with("https://")) {
                continue;
            }

            let text = element_text(&anchor);
            if contains_token(&text) {
                signals.push(UnsubscribeSignal::new(SignalKind::Link, href, PRIORITY_LINK_TEXT, SignalSource::Html));
            } else if contains_token(href) {
                signals.push(UnsubscribeSignal::new(SignalKind::Link, href, PRIORITY_LINK_HREF, SignalSource::Html));
            }
        }

        for form in document.select(&self.forms) {
            let Some(action) = form.value().attr("action").map(str::trim) else {
                continue;
            };
            let lower_action = action.to_lowercase();
            if !(lower_action.starts_with("http://") || lower_action.starts_with("https://")) {
                continue;
            }

            let mut labels = element_text(&form);
            for control in form.select(&self.form_labels) {
                if let Some(value) = control.value().attr("value") {
                    labels.push(' ');
                    labels.push_str(value);
                }
            }
            if contains_token(&labels) || contains_token(action) {
                signals.push(UnsubscribeSignal::new(SignalKind::FormAction, action, PRIORITY_FORM, SignalSource::Html));
            }
        }
    }

    fn scan_text(
        &self,
        text: &str,
        signals: &mut Vec<UnsubscribeSignal>,
        mailtos: &mut Vec<UnsubscribeSignal>,
    ) {
        for line in text.lines() {
            let line_has_token = contains_token(line);
            for url in self.text_url.find_iter(line) {
                let url = url.as_str().trim_end_matches(['.', ',', ';', ')', '>']);
                if line_has_token || contains_token(url) {
                    signals.push(UnsubscribeSignal::new(SignalKind::Link, url, PRIORITY_TEXT_URL, SignalSource::Text));
                }
            }
            for mailto in self.mailto.find_iter(line) {
                let target = mailto.as_str().trim_end_matches(['.', ',', ';']);
                mailtos.push(UnsubscribeSignal::new(SignalKind::Mailto, target, PRIORITY_MAILTO, SignalSource::Text));
            }
        }
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive match against the unsubscribe vocabulary
pub fn contains_token(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNSUBSCRIBE_TOKENS.iter().any(|token| lower.contains(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{Category, Classification, EmailInfo};

    fn message(html: Option<&str>, text: Option<&str>, header: Option<&str>, post: Option<&str>) -> Message {
        let email = EmailInfo {
            id: "1".to_string(),
            sender: "news@example.com".to_string(),
            sender_display: "News <news@example.com>".to_string(),
            subject: "Weekly".to_string(),
            date: chrono::Utc::now(),
            text_body: text.map(String::from),
            html_body: html.map(String::from),
            list_unsubscribe: header.map(String::from),
            list_unsubscribe_post: post.map(String::from),
            unread: true,
        };
        Message::new(email, Classification::new(Category::Newsletter))
    }

    #[test]
    fn test_contains_token() {
        assert!(contains_token("Click here to UNSUBSCRIBE"));
        assert!(contains_token("Manage Preferences"));
        assert!(contains_token("https://x.test/opt-out?id=3"));
        assert!(!contains_token("Read more on our blog"));
    }

    #[test]
    fn test_anchor_with_unsubscribe_text() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(Some(r#"<p>Bye <a href="https://x.test/unsub?u=123">Unsubscribe</a></p>"#), None, None, None);
        let signals = extractor.extract(&msg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Link);
        assert_eq!(signals[0].target, "https://x.test/unsub?u=123");
    }

    #[test]
    fn test_one_click_header_ranks_first() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(
            Some(r#"<a href="https://x.test/prefs">Email preferences</a>"#),
            None,
            Some("<mailto:out@x.test>, <https://x.test/oneclick/9>"),
            Some("List-Unsubscribe=One-Click"),
        );
        let signals = extractor.extract(&msg);
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].kind, SignalKind::OneClick);
        assert_eq!(signals[0].target, "https://x.test/oneclick/9");
        assert_eq!(signals[1].target, "https://x.test/prefs");
    }

    #[test]
    fn test_header_link_without_post_is_plain_link() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(None, None, Some("<https://x.test/leave>"), None);
        let signals = extractor.extract(&msg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Link);
        assert_eq!(signals[0].source, SignalSource::Header);
    }

    #[test]
    fn test_mailto_only_when_no_link() {
        let extractor = LinkExtractor::new().unwrap();
        let only_mail = message(None, Some("To stop these emails write to mailto:leave@x.test."), None, None);
        let signals = extractor.extract(&only_mail);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Mailto);
        assert_eq!(signals[0].target, "mailto:leave@x.test");

        let both = message(
            Some(r#"<a href="mailto:leave@x.test">Unsubscribe by mail</a> <a href="https://x.test/u">unsubscribe</a>"#),
            None,
            None,
            None,
        );
        let signals = extractor.extract(&both);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Link);
    }

    #[test]
    fn test_form_action() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(
            Some(r#"<form action="https://x.test/submit" method="post"><input type="submit" value="Remove me"></form>"#),
            None,
            None,
            None,
        );
        let signals = extractor.extract(&msg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::FormAction);
    }

    #[test]
    fn test_plain_text_line_with_token() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(
            None,
            Some("Read online: https://x.test/issue/4\nTo opt out visit https://x.test/l/abc."),
            None,
            None,
        );
        let signals = extractor.extract(&msg);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].target, "https://x.test/l/abc");
    }

    #[test]
    fn test_no_vocabulary_no_signal() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(
            Some(r#"<p>Hello, see <a href="https://x.test/blog">our blog</a></p>"#),
            Some("Hello, see https://x.test/blog for news. Reply to mailto-free text."),
            None,
            None,
        );
        assert!(extractor.extract(&msg).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = LinkExtractor::new().unwrap();
        let msg = message(
            Some(r#"<a href="https://x.test/a">Unsubscribe</a><a href="https://x.test/b">Opt out</a><a href="https://x.test/opt-out/c">here</a>"#),
            Some("unsubscribe: https://x.test/d"),
            Some("<https://x.test/e>"),
            None,
        );
        let first = extractor.extract(&msg);
        let second = extractor.extract(&msg);
        assert_eq!(first, second);
        let targets: Vec<_> = first.iter().map(|s| s.target.as_str()).collect();
        assert_eq!(
            targets,
            vec!["https://x.test/a", "https://x.test/b", "https://x.test/opt-out/c", "https://x.test/e", "https://x.test/d"]
        );
    }
}
