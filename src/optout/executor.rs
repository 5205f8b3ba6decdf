use std::time::Duration;

use log::{debug, info, warn};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use super::browser::{BrowserLauncher, BrowserSession, PageAction};
use super::strategy::ExecutionMethod;
use crate::error::{OptOutError, Result};

/// Labels of buttons/links that confirm an opt-out
pub const AFFIRMATIVE_LABELS: [&str; 4] = ["confirm", "unsubscribe", "submit", "yes"];

/// Phrases that show the opt-out went through
pub const CONFIRMATION_PHRASES: [&str; 5] = [
    "unsubscribed",
    "removed",
    "success",
    "no longer receive",
    "opted out",
];

const USER_AGENT: &str = concat!("unsubscriber/", env!("CARGO_PKG_VERSION"));
const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Skipped,
    ManualRequired,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Skipped => "skipped",
            Outcome::ManualRequired => "manual_required",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub reason: Option<String>,
}

impl ExecutionReport {
    fn manual() -> Self {
        Self {
            outcome: Outcome::ManualRequired,
            reason: Some("cannot be completed automatically".to_string()),
        }
    }

    fn from_attempt(attempt: Result<String>) -> Self {
        match attempt {
            Ok(detail) => {
                debug!("Opt-out confirmed: {}", detail);
                Self { outcome: Outcome::Success, reason: None }
            }
            Err(e) => Self { outcome: Outcome::Failure, reason: Some(e.reason()) },
        }
    }
}

/// Carries out opt-outs. One call, one irreversible attempt: nothing is retried.
pub struct OptOutExecutor {
    http: reqwest::Client,
    launcher: Box<dyn BrowserLauncher>,
    timeout: Duration,
}

impl OptOutExecutor {
    pub fn new(launcher: Box<dyn BrowserLauncher>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { http, launcher, timeout })
    }

    /// Only a browser that cannot be started is returned as `Err`; everything
    /// else becomes a failed report.
    pub async fn execute(&self, target: &str, method: ExecutionMethod) -> Result<ExecutionReport> {
        info!("Executing {} opt-out: {}", method, target);

        let attempt = match method {
            ExecutionMethod::HeaderMechanism => self.one_click(target).await,
            ExecutionMethod::DirectFetch => self.direct_fetch(target).await,
            ExecutionMethod::BrowserAutomation => return self.browse(target).await,
            ExecutionMethod::Manual => return Ok(ExecutionReport::manual()),
        };

        Ok(ExecutionReport::from_attempt(attempt))
    }

    async fn one_click(&self, target: &str) -> Result<String> {
        let response = self.http
            .post(target)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(ONE_CLICK_BODY)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(format!("one-click request accepted ({})", status))
        } else {
            Err(OptOutError::Transport(format!("unexpected status {}", status)))
        }
    }

    async fn direct_fetch(&self, target: &str) -> Result<String> {
        let response = self.http.get(target).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OptOutError::Transport(format!("unexpected status {}", status)));
        }

        let body = response.text().await?;
        confirmation_phrase(&body)
            .map(|phrase| format!("response says '{}'", phrase))
            .ok_or(OptOutError::ConfirmationNotFound)
    }

    async fn browse(&self, target: &str) -> Result<ExecutionReport> {
        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(ExecutionReport::from_attempt(Err(e))),
        };

        let attempt = match tokio::time::timeout(self.timeout, complete_in_page(session.as_mut(), target)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Opt-out page timed out after {:?}: {}", self.timeout, target);
                Err(OptOutError::Timeout)
            }
        };

        if let Err(e) = session.close().await {
            warn!("Failed to release browser session: {}", e);
        }

        Ok(ExecutionReport::from_attempt(attempt))
    }
}

/// Load the page, click the confirmation action once, read the result
async fn complete_in_page(session: &mut dyn BrowserSession, target: &str) -> Result<String> {
    session.goto(target).await?;
    let actions = session.actions().await?;

    match pick_confirmation_action(&actions) {
        Some(action) => {
            debug!("Clicking '{}'", action.label);
            session.click(action.index).await?;
            let text = session.page_text().await?;
            confirmation_phrase(&text)
                .map(|phrase| format!("clicked '{}', page says '{}'", action.label, phrase))
                .ok_or(OptOutError::ConfirmationNotFound)
        }
        None => {
            let text = session.page_text().await?;
            confirmation_phrase(&text)
                .map(|phrase| format!("landing page says '{}'", phrase))
                .ok_or(OptOutError::ConfirmationNotFound)
        }
    }
}

/// First action matching the affirmative vocabulary, by vocabulary rank then document order
pub fn pick_confirmation_action(actions: &[PageAction]) -> Option<&PageAction> {
    AFFIRMATIVE_LABELS.iter().find_map(|word| {
        actions.iter().find(|action| {
            action.label
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| w == *word)
        })
    })
}

pub fn confirmation_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    CONFIRMATION_PHRASES.iter().copied().find(|phrase| lower.contains(phrase))
}
