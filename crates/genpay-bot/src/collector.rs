//! Prompt Collector
//!
//! Captures a generation prompt either inline (`/generate a red fox`) or from
//! the user's next plain-text message after a bare `/generate`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use genpay_core::{PromptSession, SessionStore, UserId};

use crate::error::Result;
use crate::messenger::Messenger;

const ENTER_PROMPT: &str = "⌨️ Enter image prompt.";

/// Result of handling the generate command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Collected {
    /// The prompt is ready for invoicing
    Prompt(String),
    /// The user was asked for a prompt; the session now waits for it
    Awaiting,
}

/// Split `/command@bot rest` into the command (without the bot suffix) and the rest
pub fn split_command(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }
    let (head, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let command = head.split_once('@').map_or(head, |(c, _)| c);
    Some((command, rest.trim()))
}

pub struct PromptCollector {
    sessions: Arc<dyn SessionStore>,
    messenger: Arc<dyn Messenger>,
    ttl: chrono::Duration,
}

impl PromptCollector {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messenger: Arc<dyn Messenger>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            sessions,
            messenger,
            ttl,
        }
    }

    /// Handle the generate command with whatever followed it
    pub async fn on_command(&self, user: &UserId, inline: &str) -> Result<Collected> {
        let inline = inline.trim();
        if !inline.is_empty() {
            self.sessions.clear(user)?;
            return Ok(Collected::Prompt(inline.to_string()));
        }

        self.sessions
            .set(&PromptSession::awaiting(user.clone(), Utc::now(), self.ttl))?;
        self.messenger.request_reply(user, ENTER_PROMPT).await?;
        tracing::debug!(user = %user, "Awaiting prompt");

        Ok(Collected::Awaiting)
    }

    /// Consume a plain-text message as the pending prompt, if one is awaited
    ///
    /// The session is taken out of the store in one step, so of two replies
    /// racing for the same capture only one gets the prompt.
    pub fn take_pending(
        &self,
        user: &UserId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let Some(session) = self.sessions.take(user)? else {
            return Ok(None);
        };

        if session.is_awaiting_at(now) {
            return Ok(Some(text.trim().to_string()));
        }

        if session.is_expired_at(now) {
            tracing::debug!(user = %user, "Prompt request expired");
        }
        Ok(None)
    }

    /// Drop any pending capture (the user moved on to another command)
    pub fn cancel(&self, user: &UserId) -> Result<()> {
        self.sessions.clear(user)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::{OutboundKind, OutboxMessenger};
    use genpay_core::MemorySessionStore;

    fn collector() -> (PromptCollector, Arc<OutboxMessenger>) {
        let messenger = Arc::new(OutboxMessenger::new());
        let collector = PromptCollector::new(
            Arc::new(MemorySessionStore::new()),
            messenger.clone(),
            chrono::Duration::minutes(5),
        );
        (collector, messenger)
    }

    #[test]
    fn test_split_command() {
        assert_eq!(split_command("/generate a fox"), Some(("/generate", "a fox")));
        assert_eq!(split_command("/generate@TipBot  a fox "), Some(("/generate", "a fox")));
        assert_eq!(split_command("/generate"), Some(("/generate", "")));
        assert_eq!(split_command("a fox"), None);
    }

    #[tokio::test]
    async fn test_inline_prompt_is_immediate() {
        let (collector, messenger) = collector();
        let user = UserId::new("1");

        let collected = collector.on_command(&user, " a fox ").await.unwrap();
        assert_eq!(collected, Collected::Prompt("a fox".into()));
        assert!(messenger.messages(&user).unwrap().is_empty());
        assert!(collector.take_pending(&user, "later text", Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_two_step_capture_consumes_once() {
        let (collector, messenger) = collector();
        let user = UserId::new("1");

        assert_eq!(collector.on_command(&user, "").await.unwrap(), Collected::Awaiting);
        assert_eq!(
            messenger.messages(&user).unwrap()[0].kind,
            OutboundKind::ForceReply
        );

        let prompt = collector.take_pending(&user, "a fox", Utc::now()).unwrap();
        assert_eq!(prompt.as_deref(), Some("a fox"));
        assert!(collector.take_pending(&user, "a fox", Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_capture_expires() {
        let (collector, _) = collector();
        let user = UserId::new("1");

        collector.on_command(&user, "").await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert!(collector.take_pending(&user, "hello", later).unwrap().is_none());
        assert!(collector.take_pending(&user, "hello", Utc::now()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_capture() {
        let (collector, _) = collector();
        let user = UserId::new("1");

        collector.on_command(&user, "").await.unwrap();
        collector.cancel(&user).unwrap();
        assert!(collector.take_pending(&user, "hello", Utc::now()).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replies_take_prompt_once() {
        let (collector, _) = collector();
        let collector = Arc::new(collector);
        let user = UserId::new("1");
        collector.on_command(&user, "").await.unwrap();

        let replies: Vec<_> = (0..8)
            .map(|n| {
                let collector = collector.clone();
                let user = user.clone();
                tokio::spawn(async move {
                    collector
                        .take_pending(&user, &format!("prompt {n}"), Utc::now())
                        .unwrap()
                })
            })
            .collect();

        let mut taken = 0;
        for reply in replies {
            if reply.await.unwrap().is_some() {
                taken += 1;
            }
        }
        assert_eq!(taken, 1);
    }
}
