use std::collections::HashSet;

use anyhow::{Context, Result};
use async_imap::types::Flag;
use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::ImapConfig;
use crate::email::{EmailInfo, MailSource, Message};

pub struct ImapClient {
    session: Session<TlsStream<Compat<TcpStream>>>,
    mailbox: String,
    unread_only: bool,
    category_folders: bool,
    known_folders: HashSet<String>,
    /// Messages were flagged `\Deleted` and need a CLOSE to be expunged
    pending_expunge: bool,
    logged_out: bool,
}

impl ImapClient {
    pub async fn new(config: &ImapConfig) -> Result<Self> {
        info!("Connecting to IMAP server {}:{}", config.server, config.port);

        let tcp_stream = TcpStream::connect((config.server.as_str(), config.port))
            .await
            .context("Unable to connect to IMAP server")?;

        let tls = TlsConnector::new();
        let tls_stream = tls.connect(&config.server, tcp_stream.compat())
            .await
            .context("Unable to establish TLS connection")?;

        let client = async_imap::Client::new(tls_stream);

        let mut session = client
            .login(&config.username, &config.password)
            .await
            .map_err(|e| anyhow::anyhow!("IMAP authentication error: {:?}", e.0))?;

        session.select(&config.mailbox)
            .await
            .with_context(|| format!("Unable to select {}", config.mailbox))?;

        info!("IMAP connection established, mailbox {}", config.mailbox);

        Ok(ImapClient {
            session,
            mailbox: config.mailbox.clone(),
            unread_only: config.unread_only,
            category_folders: config.category_folders,
            known_folders: HashSet::new(),
            pending_expunge: false,
            logged_out: false,
        })
    }

    /// Newest `limit` messages, fetched with `BODY.PEEK[]` so reading does not set `\Seen`
    pub async fn fetch_recent(&mut self, limit: usize) -> Result<Vec<EmailInfo>> {
        let criteria = if self.unread_only { "UNSEEN" } else { "ALL" };
        debug!("Search criteria: {}", criteria);

        let uids = self.session
            .uid_search(criteria)
            .await
            .context("Error while searching emails")?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        info!("Found {} email(s) matching {}", uids.len(), criteria);
        let newest: Vec<u32> = uids.into_iter().rev().take(limit).collect();

        if newest.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = newest.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let fetches: Vec<_> = self.session
            .uid_fetch(&uid_set, "(UID FLAGS BODY.PEEK[])")
            .await
            .context("Unable to fetch emails")?
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.map_err(|e| warn!("Skipping unreadable fetch response: {}", e)).ok())
            .collect();

        let mut emails = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                continue;
            };
            let unread = !fetch.flags().any(|f| matches!(f, Flag::Seen));
            match EmailInfo::parse(uid.to_string(), body, unread) {
                Ok(email) => emails.push(email),
                Err(e) => warn!("Skipping email {}: {:#}", uid, e),
            }
        }

        // Newest first
        emails.sort_by_key(|e| std::cmp::Reverse(e.id.parse::<u32>().unwrap_or(0)));
        Ok(emails)
    }

    /// Create the target folder if it does not exist
    pub async fn ensure_folder_exists(&mut self, folder_name: &str) -> Result<()> {
        if self.known_folders.contains(folder_name) {
            return Ok(());
        }

        let mailboxes: Vec<_> = self.session.list(None, Some(folder_name))
            .await
            .context("Unable to list mailboxes")?
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .filter_map(|r| r.ok())
            .collect();

        if mailboxes.is_empty() {
            info!("Creating IMAP folder: {}", folder_name);
            self.session.create(folder_name)
                .await
                .with_context(|| format!("Unable to create folder {}", folder_name))?;
        }

        self.known_folders.insert(folder_name.to_string());
        Ok(())
    }

    /// Copy into `target_folder` and flag the original `\Deleted`; expunged on CLOSE
    pub async fn move_email_to_folder(&mut self, uid: &str, target_folder: &str) -> Result<()> {
        self.ensure_folder_exists(target_folder).await?;

        self.session.uid_copy(uid, target_folder)
            .await
            .with_context(|| format!("Unable to copy email to {}", target_folder))?;

        let _results: Vec<_> = self.session
            .uid_store(uid, "+FLAGS (\\Deleted)")
            .await
            .context("Unable to flag email as deleted")?
            .collect::<Vec<_>>()
            .await;

        self.pending_expunge = true;
        info!("✅ Email {} moved to {}", uid, target_folder);
        Ok(())
    }

    pub async fn mark_email_as_processed(&mut self, message: &Message) -> Result<()> {
        let uid = message.id();

        let _results: Vec<_> = self.session
            .uid_store(uid, "+FLAGS (\\Seen)")
            .await
            .context("Unable to set \\Seen flag")?
            .collect::<Vec<_>>()
            .await;
        debug!("Email {} marked as read", uid);

        if self.category_folders {
            let folder = message.category().folder_name();
            self.move_email_to_folder(uid, folder).await?;
        }
        Ok(())
    }

    /// Expunge moved messages and log out
    pub async fn logout(&mut self) -> Result<()> {
        if self.logged_out {
            return Ok(());
        }
        if self.pending_expunge {
            self.session.close()
                .await
                .with_context(|| format!("Unable to close {}", self.mailbox))?;
            self.pending_expunge = false;
        }

        info!("Disconnecting from IMAP server");
        self.session.logout()
            .await
            .context("Error during IMAP logout")?;
        self.logged_out = true;
        Ok(())
    }
}

impl MailSource for ImapClient {
    fn fetch_messages(&mut self, limit: usize) -> BoxFuture<'_, Result<Vec<EmailInfo>>> {
        Box::pin(self.fetch_recent(limit))
    }

    fn mark_processed<'a>(&'a mut self, message: &'a Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.mark_email_as_processed(message))
    }

    fn finish(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.logout())
    }

    fn source_name(&self) -> &str {
        &self.mailbox
    }
}
