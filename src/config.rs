use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub imap: ImapConfig,
    pub llm: LlmConfig,
    pub optout: OptOutConfig,
    pub max_emails: usize,
    pub data_dir: PathBuf,
    pub scheduler: SchedulerConfig,
    pub slack: Option<SlackConfig>,
}

#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub unread_only: bool,
    /// File processed messages into one folder per category
    pub category_folders: bool,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct OptOutConfig {
    pub enabled: bool,
    pub timeout: Duration,
    pub browser_enabled: bool,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub schedule_times: Vec<String>, // "HH:MM"
}

#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    pub channel_id: String,
}

impl Config {
    /// Environment first, then `config.json`, then defaults
    pub fn new() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            info!("Loading configuration from {}", path.display());
            config::Config::builder()
                .add_source(config::File::from(path).format(config::FileFormat::Json))
                .build()
                .with_context(|| format!("Unable to read {}", path.display()))?
        } else {
            info!("No {} found, using environment variables only", path.display());
            config::Config::default()
        };

        Self::from_sources(&file, |key| std::env::var(key).ok())
    }

    pub fn from_sources(file: &config::Config, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |env_key: &str, file_key: &str| -> Option<String> {
            env(env_key)
                .or_else(|| file.get_string(file_key).ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let email_address = get("EMAIL_ADDRESS", "email.email_address");
        let password = get("EMAIL_PASSWORD", "email.password");
        let (username, password) = match (email_address, password) {
            (Some(username), Some(password)) => (username, password),
            (username, password) => {
                let missing: Vec<&str> = [
                    username.is_none().then_some("EMAIL_ADDRESS"),
                    password.is_none().then_some("EMAIL_PASSWORD"),
                ]
                .into_iter()
                .flatten()
                .collect();
                anyhow::bail!(
                    "Missing environment variables: {}\n\
                     \n\
                     💡 Solutions:\n\
                     1. Create a .env file with your credentials:\n\
                        EMAIL_ADDRESS=you@example.com\n\
                        EMAIL_PASSWORD=your-app-password\n\
                     \n\
                     2. Or add them to {} under \"email\"",
                    missing.join(", "),
                    DEFAULT_CONFIG_FILE
                );
            }
        };

        let timeout_secs: u64 = parse_or("OPTOUT_TIMEOUT_SECS", get("OPTOUT_TIMEOUT_SECS", "optout.timeout_secs"), 30)?;
        if timeout_secs == 0 {
            anyhow::bail!("OPTOUT_TIMEOUT_SECS must be greater than 0");
        }

        let slack = match (env("SLACK_BOT_TOKEN"), env("SLACK_CHANNEL_ID")) {
            (Some(bot_token), Some(channel_id)) => Some(SlackConfig { bot_token, channel_id }),
            _ => {
                warn!("SLACK_BOT_TOKEN or SLACK_CHANNEL_ID not set - Slack notifications disabled");
                None
            }
        };

        Ok(Config {
            imap: ImapConfig {
                server: get("IMAP_SERVER", "email.imap_server").unwrap_or_else(|| "imap.gmail.com".to_string()),
                port: parse_or("IMAP_PORT", get("IMAP_PORT", "email.imap_port"), 993)?,
                username,
                password,
                mailbox: get("IMAP_MAILBOX", "email.mailbox").unwrap_or_else(|| "INBOX".to_string()),
                unread_only: flag(get("PROCESS_UNREAD_ONLY", "app.process_unread_only"), true),
                category_folders: flag(get("IMAP_CATEGORY_FOLDERS", "email.category_folders"), false),
            },
            llm: LlmConfig {
                api_key: get("OPENAI_API_KEY", "llm.api_key"),
                model: get("LLM_MODEL", "llm.model").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                url: get("LLM_URL", "llm.url").unwrap_or_else(|| "http://127.0.0.1:1234".to_string()),
            },
            optout: OptOutConfig {
                enabled: flag(get("ENABLE_AUTO_OPTOUT", "app.enable_auto_optout"), true),
                timeout: Duration::from_secs(timeout_secs),
                browser_enabled: flag(get("OPTOUT_BROWSER_ENABLED", "optout.browser_enabled"), true),
                headless: flag(get("OPTOUT_HEADLESS", "optout.headless"), true),
                chrome_path: get("CHROME_PATH", "optout.chrome_path").map(PathBuf::from),
            },
            max_emails: parse_or("MAX_EMAILS_TO_PROCESS", get("MAX_EMAILS_TO_PROCESS", "app.max_emails"), 50)?,
            data_dir: get("DATA_DIR", "app.data_dir")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            scheduler: SchedulerConfig {
                enabled: flag(env("SCHEDULER_ENABLED"), false),
                schedule_times: env("SCHEDULER_TIMES")
                    .unwrap_or_else(|| "02:00".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            slack,
        })
    }
}

/// `true`, `1`, `yes` and `on` are true, any other value is false
fn flag(value: Option<String>, default: bool) -> bool {
    match value {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        None => default,
    }
}

fn parse_or<T: FromStr>(key: &str, value: Option<String>, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, v)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 2] = [
        ("EMAIL_ADDRESS", "me@example.com"),
        ("EMAIL_PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(&config::Config::default(), env_of(&CREDENTIALS)).unwrap();
        assert_eq!(config.imap.server, "imap.gmail.com");
        assert_eq!(config.imap.port, 993);
        assert_eq!(config.imap.mailbox, "INBOX");
        assert!(config.imap.unread_only);
        assert!(!config.imap.category_folders);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.max_emails, 50);
        assert!(config.optout.enabled);
        assert!(config.optout.browser_enabled);
        assert_eq!(config.optout.timeout, Duration::from_secs(30));
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.scheduler.schedule_times, vec!["02:00".to_string()]);
        assert!(config.slack.is_none());
    }

    #[test]
    fn test_missing_credentials() {
        let err = Config::from_sources(&config::Config::default(), env_of(&[("EMAIL_ADDRESS", "me@example.com")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("EMAIL_PASSWORD"));
        assert!(!message.contains("EMAIL_ADDRESS,"));
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "email": {"email_address": "file@example.com", "password": "p", "imap_port": 1993},
                "app": {"max_emails": 10, "enable_auto_optout": false},
                "optout": {"timeout_secs": 5}
            }"#,
        )
        .unwrap();
        let file = config::Config::builder()
            .add_source(config::File::from(path.as_path()).format(config::FileFormat::Json))
            .build()
            .unwrap();

        let config = Config::from_sources(&file, env_of(&[("MAX_EMAILS_TO_PROCESS", "3")])).unwrap();
        assert_eq!(config.imap.username, "file@example.com");
        assert_eq!(config.imap.port, 1993);
        assert_eq!(config.max_emails, 3);
        assert!(!config.optout.enabled);
        assert_eq!(config.optout.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_flags_and_invalid_numbers() {
        let mut vars = CREDENTIALS.to_vec();
        vars.push(("OPTOUT_HEADLESS", "off"));
        vars.push(("IMAP_CATEGORY_FOLDERS", "Yes"));
        let config = Config::from_sources(&config::Config::default(), env_of(&vars)).unwrap();
        assert!(!config.optout.headless);
        assert!(config.imap.category_folders);

        vars.push(("IMAP_PORT", "imap"));
        let err = Config::from_sources(&config::Config::default(), env_of(&vars)).unwrap_err();
        assert!(err.to_string().contains("IMAP_PORT"));
    }
}
