// Library exports for the unsubscriber crate
// This allows tests and the binary to use the modules

pub mod classifier;
pub mod config;
pub mod email;
pub mod email_processor;
pub mod error;
pub mod history;
pub mod imap_client;
pub mod memory;
pub mod report;
pub mod slack_notifier;

// Newsletter opt-out core
pub mod optout;
