#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;

use unsubscriber::classifier::Classifier;
use unsubscriber::email::{BaseEmailProcessor, Category, Classification, EmailInfo, MailSource, Message, RunSettings};
use unsubscriber::error::{OptOutError, Result as OptOutResult};
use unsubscriber::history::{CategorizationLog, OutcomeRecorder};
use unsubscriber::optout::{
    BrowserLauncher, BrowserSession, LinkExtractor, OptOutCoordinator, OptOutExecutor, OptOutSettings, PageAction,
    StrategySelector,
};

pub fn newsletter(id: &str, sender: &str, html: &str) -> EmailInfo {
    let raw = format!(
        "From: {sender}\r\nTo: me@example.org\r\nSubject: Issue {id}\r\n\
         Date: Tue, 04 Nov 2025 10:00:00 +0000\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{html}\r\n"
    );
    EmailInfo::parse(id, raw.as_bytes(), true).unwrap()
}

/// In-memory mailbox recording which messages were marked
#[derive(Clone, Default)]
pub struct FakeMailbox {
    pub emails: Vec<EmailInfo>,
    pub marked: Arc<Mutex<Vec<String>>>,
}

impl FakeMailbox {
    pub fn new(emails: Vec<EmailInfo>) -> Self {
        Self { emails, marked: Arc::default() }
    }

    pub fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

impl MailSource for FakeMailbox {
    fn fetch_messages(&mut self, limit: usize) -> BoxFuture<'_, Result<Vec<EmailInfo>>> {
        let emails = self.emails.iter().take(limit).cloned().collect();
        Box::pin(async move { Ok(emails) })
    }

    fn mark_processed<'a>(&'a mut self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
        self.marked.lock().unwrap().push(message.id().to_string());
        Box::pin(async { Ok(()) })
    }

    fn source_name(&self) -> &str {
        "fake"
    }
}

/// Every message is a newsletter; a subject containing "boom" panics
pub struct NewsletterClassifier;

impl Classifier for NewsletterClassifier {
    fn classify<'a>(&'a self, email: &'a EmailInfo) -> BoxFuture<'a, Classification> {
        Box::pin(async move {
            if email.subject.contains("boom") {
                panic!("classifier exploded on {}", email.id);
            }
            Classification::new(Category::Newsletter)
        })
    }
}

#[derive(Clone, Default)]
pub struct FakePage {
    pub labels: Vec<&'static str>,
    pub landing_text: &'static str,
    pub after_click_text: &'static str,
    pub load_delay: Option<Duration>,
}

/// Scripted browser: pages by URL, counters shared with the test
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub pages: Arc<HashMap<String, FakePage>>,
    pub launches: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub visited: Arc<Mutex<Vec<String>>>,
    pub unavailable: bool,
}

impl FakeBrowser {
    pub fn with_pages(pages: Vec<(&str, FakePage)>) -> Self {
        Self {
            pages: Arc::new(pages.into_iter().map(|(url, page)| (url.to_string(), page)).collect()),
            ..Self::default()
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    browser: FakeBrowser,
    page: FakePage,
    clicked: bool,
}

impl BrowserSession for FakeSession {
    fn goto<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, OptOutResult<()>> {
        Box::pin(async move {
            self.browser.visited.lock().unwrap().push(url.to_string());
            self.page = self.browser.pages.get(url).cloned().unwrap_or_default();
            if let Some(delay) = self.page.load_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }

    fn actions(&mut self) -> BoxFuture<'_, OptOutResult<Vec<PageAction>>> {
        let actions = self.page.labels
            .iter()
            .enumerate()
            .map(|(index, label)| PageAction { index, label: label.to_string() })
            .collect();
        Box::pin(async move { Ok(actions) })
    }

    fn click(&mut self, _index: usize) -> BoxFuture<'_, OptOutResult<()>> {
        self.clicked = true;
        Box::pin(async { Ok(()) })
    }

    fn page_text(&mut self) -> BoxFuture<'_, OptOutResult<String>> {
        let text = if self.clicked { self.page.after_click_text } else { self.page.landing_text };
        Box::pin(async move { Ok(text.to_string()) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, OptOutResult<()>> {
        self.browser.closes.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

impl BrowserLauncher for FakeBrowser {
    fn launch(&self) -> BoxFuture<'_, OptOutResult<Box<dyn BrowserSession>>> {
        Box::pin(async move {
            if self.unavailable {
                return Err(OptOutError::BrowserUnavailable("no chrome binary".to_string()));
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                browser: self.clone(),
                page: FakePage::default(),
                clicked: false,
            }) as Box<dyn BrowserSession>)
        })
    }
}

pub struct Harness {
    pub mailbox: FakeMailbox,
    pub browser: FakeBrowser,
    pub processor: BaseEmailProcessor<FakeMailbox, NewsletterClassifier>,
}

pub fn harness(data_dir: &Path, emails: Vec<EmailInfo>, browser: FakeBrowser, max_messages: usize, timeout: Duration) -> Harness {
    let mailbox = FakeMailbox::new(emails);
    let executor = OptOutExecutor::new(Box::new(browser.clone()), timeout).unwrap();
    let coordinator = OptOutCoordinator::new(
        OptOutSettings { enabled: true, dry_run: false },
        LinkExtractor::new().unwrap(),
        StrategySelector::new(true),
        executor,
        OutcomeRecorder::in_dir(data_dir).unwrap(),
    );
    let processor = BaseEmailProcessor::new(
        mailbox.clone(),
        NewsletterClassifier,
        coordinator,
        CategorizationLog::in_dir(data_dir),
        RunSettings { max_messages, dry_run: false },
    );
    Harness { mailbox, browser, processor }
}
