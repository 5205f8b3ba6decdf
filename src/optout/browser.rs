//! Browser sessions for interactive opt-out pages.
//!
//! Every attempt gets its own browser process with a throwaway profile
//! directory, so no cookie or storage state leaks from one attempt into the
//! next. Sessions are released explicitly with [`BrowserSession::close`]; if an
//! attempt is abandoned (timeout, panic) the drop guard tears the browser down
//! in the background.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::future::BoxFuture;
use futures::StreamExt;
use log::{debug, trace, warn};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use crate::error::{OptOutError, Result};

const CLICKABLE_SELECTOR: &str = "button, a, input[type=submit], input[type=button]";
const BODY_TEXT_SCRIPT: &str = "document.body ? document.body.innerText : ''";

/// A clickable element found on the current page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageAction {
    pub index: usize,
    pub label: String,
}

/// One isolated browsing session
pub trait BrowserSession: Send {
    fn goto<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Clickable elements of the current page, in document order
    fn actions(&mut self) -> BoxFuture<'_, Result<Vec<PageAction>>>;

    /// Click an action returned by the last `actions` call and let the page settle
    fn click(&mut self, index: usize) -> BoxFuture<'_, Result<()>>;

    /// Visible text of the current page
    fn page_text(&mut self) -> BoxFuture<'_, Result<String>>;

    /// Tear the session down
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Acquires fresh sessions
pub trait BrowserLauncher: Send + Sync {
    /// Fails with `BrowserUnavailable` when no browser can be started
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn BrowserSession>>>;
}

/// Chromium over the DevTools protocol
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub request_timeout: Duration,
    pub settle_delay: Duration,
}

impl ChromeLauncher {
    pub fn new(headless: bool, executable: Option<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            headless,
            executable,
            request_timeout,
            settle_delay: Duration::from_secs(2),
        }
    }

    fn browser_config(&self, profile: &TempDir) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .request_timeout(self.request_timeout)
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--incognito");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(OptOutError::BrowserUnavailable)
    }
}

impl BrowserLauncher for ChromeLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn BrowserSession>>> {
        Box::pin(async move {
            let profile = tempfile::Builder::new()
                .prefix("unsubscriber-profile-")
                .tempdir()
                .map_err(|e| OptOutError::BrowserUnavailable(format!("profile directory: {}", e)))?;
            let config = self.browser_config(&profile)?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| OptOutError::BrowserUnavailable(e.to_string()))?;

            let handler_task = tokio::spawn(async move {
                while handler.next().await.is_some() {}
            });

            let mut session = ChromeSession {
                browser: Some(browser),
                page: None,
                handler_task: Some(handler_task),
                profile: Some(profile),
                elements: Vec::new(),
                settle_delay: self.settle_delay,
                runtime_handle: tokio::runtime::Handle::current(),
            };

            let page = session.browser()?
                .new_page("about:blank")
                .await
                .map_err(|e| OptOutError::BrowserUnavailable(e.to_string()))?;
            session.page = Some(page);

            debug!("Browser session started");
            Ok(Box::new(session) as Box<dyn BrowserSession>)
        })
    }
}

/// Session owning its browser process, event handler task and profile directory
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    profile: Option<TempDir>,
    elements: Vec<Element>,
    settle_delay: Duration,
    runtime_handle: tokio::runtime::Handle,
}

impl ChromeSession {
    fn browser(&self) -> Result<&Browser> {
        self.browser
            .as_ref()
            .ok_or_else(|| OptOutError::Transport("browser already closed".to_string()))
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| OptOutError::Transport("no page open".to_string()))
    }

    async fn element_label(element: &Element) -> Result<String> {
        if let Some(text) = element.inner_text().await? {
            if !text.trim().is_empty() {
                return Ok(text.trim().to_string());
            }
        }
        Ok(element.attribute("value").await?.unwrap_or_default().trim().to_string())
    }

    async fn shutdown(
        browser: Option<Browser>,
        page: Option<Page>,
        handler_task: Option<JoinHandle<()>>,
        profile: Option<TempDir>,
    ) -> Result<()> {
        if let Some(page) = page {
            if let Err(e) = page.close().await {
                debug!("Page close failed: {}", e);
            }
        }

        let mut result = Ok(());
        if let Some(mut browser) = browser {
            if let Err(e) = browser.close().await {
                warn!("Browser close failed: {}", e);
                result = Err(OptOutError::from(e));
            }
            if let Err(e) = browser.wait().await {
                warn!("Browser process did not exit cleanly: {}", e);
            }
        }

        if let Some(task) = handler_task {
            task.abort();
        }
        drop(profile);
        result
    }
}

impl BrowserSession for ChromeSession {
    fn goto<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.elements.clear();
            let page = self.page()?;
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            debug!("Loaded {}", url);
            Ok(())
        })
    }

    fn actions(&mut self) -> BoxFuture<'_, Result<Vec<PageAction>>> {
        Box::pin(async move {
            let elements = self.page()?.find_elements(CLICKABLE_SELECTOR).await?;

            let mut actions = Vec::with_capacity(elements.len());
            for (index, element) in elements.iter().enumerate() {
                let label = Self::element_label(element).await.unwrap_or_default();
                actions.push(PageAction { index, label });
            }

            self.elements = elements;
            Ok(actions)
        })
    }

    fn click(&mut self, index: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let element = self.elements
                .get(index)
                .ok_or(OptOutError::ConfirmationNotFound)?;
            element.click().await?;
            tokio::time::sleep(self.settle_delay).await;
            self.elements.clear();
            Ok(())
        })
    }

    fn page_text(&mut self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let result = self.page()?.evaluate(BODY_TEXT_SCRIPT).await?;
            result
                .into_value::<String>()
                .map_err(|e| OptOutError::Transport(format!("unreadable page text: {}", e)))
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        self.elements.clear();
        let browser = self.browser.take();
        let page = self.page.take();
        let handler_task = self.handler_task.take();
        let profile = self.profile.take();
        Box::pin(Self::shutdown(browser, page, handler_task, profile))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if self.browser.is_none() {
            return;
        }
        self.elements.clear();
        let browser = self.browser.take();
        let page = self.page.take();
        let handler_task = self.handler_task.take();
        let profile = self.profile.take();

        self.runtime_handle.spawn(async move {
            if let Err(e) = Self::shutdown(browser, page, handler_task, profile).await {
                warn!("Browser session drop cleanup failed: {}", e);
            } else {
                trace!("Browser session drop cleanup succeeded");
            }
        });
    }
}
