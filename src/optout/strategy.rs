use serde::{Deserialize, Serialize};

use super::extractor::{SignalKind, UnsubscribeSignal};

/// How a signal is acted upon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    /// One-click POST, no rendering
    HeaderMechanism,
    /// Plain GET, confirmation read from the response body
    DirectFetch,
    BrowserAutomation,
    /// Nothing is executed, a human has to follow up
    Manual,
}

impl ExecutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMethod::HeaderMechanism => "header_mechanism",
            ExecutionMethod::DirectFetch => "direct_fetch",
            ExecutionMethod::BrowserAutomation => "browser_automation",
            ExecutionMethod::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ExecutionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks an execution method per signal
#[derive(Debug, Clone, Copy)]
pub struct StrategySelector {
    browser_enabled: bool,
}

impl StrategySelector {
    pub fn new(browser_enabled: bool) -> Self {
        Self { browser_enabled }
    }

    pub fn select(&self, signal: &UnsubscribeSignal) -> ExecutionMethod {
        match signal.kind {
            SignalKind::OneClick => ExecutionMethod::HeaderMechanism,
            SignalKind::Mailto => ExecutionMethod::Manual,
            _ if self.browser_enabled => ExecutionMethod::BrowserAutomation,
            SignalKind::Link => ExecutionMethod::DirectFetch,
            SignalKind::FormAction => ExecutionMethod::Manual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optout::extractor::SignalSource;

    fn signal(kind: SignalKind) -> UnsubscribeSignal {
        UnsubscribeSignal {
            kind,
            target: "https://x.test/u".to_string(),
            priority: 50,
            source: SignalSource::Html,
        }
    }

    #[test]
    fn test_select_with_browser() {
        let selector = StrategySelector::new(true);
        assert_eq!(selector.select(&signal(SignalKind::OneClick)), ExecutionMethod::HeaderMechanism);
        assert_eq!(selector.select(&signal(SignalKind::Mailto)), ExecutionMethod::Manual);
        assert_eq!(selector.select(&signal(SignalKind::Link)), ExecutionMethod::BrowserAutomation);
        assert_eq!(selector.select(&signal(SignalKind::FormAction)), ExecutionMethod::BrowserAutomation);
    }

    #[test]
    fn test_select_without_browser() {
        let selector = StrategySelector::new(false);
        assert_eq!(selector.select(&signal(SignalKind::OneClick)), ExecutionMethod::HeaderMechanism);
        assert_eq!(selector.select(&signal(SignalKind::Link)), ExecutionMethod::DirectFetch);
        assert_eq!(selector.select(&signal(SignalKind::FormAction)), ExecutionMethod::Manual);
        assert_eq!(selector.select(&signal(SignalKind::Mailto)), ExecutionMethod::Manual);
    }
}
