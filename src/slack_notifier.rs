use anyhow::{Context, Result};
use log::{error, info};
use slack_morphism::prelude::*;

use crate::config::SlackConfig;
use crate::report::RunStats;

pub struct SlackNotifier {
    client: SlackClient<SlackClientHyperHttpsConnector>,
    token: SlackApiToken,
    channel_id: SlackChannelId,
}

impl SlackNotifier {
    pub fn new(config: &SlackConfig) -> Result<Self> {
        info!("Initializing Slack notifier");

        let client = SlackClient::new(SlackClientHyperHttpsConnector::new()?);
        let token = SlackApiToken::new(config.bot_token.clone().into());
        let channel_id = SlackChannelId::new(config.channel_id.clone());

        Ok(SlackNotifier {
            client,
            token,
            channel_id,
        })
    }

    pub async fn send_message(&self, text: &str) -> Result<()> {
        let post_chat_req = SlackApiChatPostMessageRequest::new(
            self.channel_id.clone(),
            SlackMessageContent::new().with_text(text.to_string()),
        );

        let session = self.client.open_session(&self.token);

        match session.chat_post_message(&post_chat_req).await {
            Ok(response) => {
                info!("✅ Slack message sent: {:?}", response.ts);
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to send Slack message: {}", e);
                Err(anyhow::anyhow!("Unable to send Slack message: {}", e))
            }
        }
    }

    /// Post the end-of-run summary with the follow-up list
    pub async fn notify_run_summary(&self, stats: &RunStats) -> Result<()> {
        let mut text = format!("📬 *Newsletter opt-out run finished*\n\n• {}\n", stats.summary_line());

        if stats.storage_warnings > 0 {
            text.push_str(&format!("• ⚠️ {} history write(s) lost\n", stats.storage_warnings));
        }

        if !stats.follow_ups.is_empty() {
            text.push_str("• Needs follow-up:\n");
            for attempt in &stats.follow_ups {
                text.push_str(&format!(
                    "  - {} ({}) {}\n",
                    attempt.sender,
                    attempt.outcome,
                    attempt.target.as_deref().unwrap_or("-")
                ));
            }
        }

        self.send_message(&text)
            .await
            .context("Unable to send run summary to Slack")
    }

    pub async fn notify_error(&self, message_id: &str, error_message: &str) -> Result<()> {
        let text = format!(
            "❌ *Error while processing message*\n\n\
             • Message ID: `{}`\n\
             • Error: ```{}```",
            message_id,
            error_message
        );

        self.send_message(&text)
            .await
            .context("Unable to send Slack error notification")
    }
}
