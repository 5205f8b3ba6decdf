//! Opt-out core: extraction, strategy selection, execution and coordination.

pub mod browser;
pub mod coordinator;
pub mod executor;
pub mod extractor;
pub mod strategy;

pub use browser::{BrowserLauncher, BrowserSession, ChromeLauncher, PageAction};
pub use coordinator::{Disposition, OptOutCoordinator, OptOutSettings, SkipReason};
pub use executor::{ExecutionReport, OptOutExecutor, Outcome};
pub use extractor::{LinkExtractor, SignalKind, SignalSource, UnsubscribeSignal};
pub use strategy::{ExecutionMethod, StrategySelector};
