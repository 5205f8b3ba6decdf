pub mod common;
pub mod processor_base;

// Re-export commonly used items
pub use common::{Category, Classification, EmailInfo, Message};
pub use processor_base::{BaseEmailProcessor, MailSource, RunSettings};
