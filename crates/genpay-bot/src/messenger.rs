//! Chat Transport Seam
//!
//! The flow only needs a handful of chat primitives. [`OutboxMessenger`] is
//! an in-memory transport that records everything it is asked to send; the
//! HTTP server exposes it as a per-user outbox, capped at
//! [`DEFAULT_OUTBOX_LIMIT`] messages per user with the oldest dropped first.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use genpay_core::{MessageRef, UserId};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{BotError, Result};

/// A file to forward as a photo
pub struct Attachment {
    pub file_name: String,
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Chat primitives used by the generation flow
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, user: &UserId, text: &str) -> Result<MessageRef>;

    /// Ask the user for input, forcing a reply
    async fn request_reply(&self, user: &UserId, text: &str) -> Result<MessageRef>;

    /// Show a payment request; the transport renders it (QR code + caption)
    async fn send_payment_request(&self, user: &UserId, payment_request: &str)
    -> Result<MessageRef>;

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<()>;

    /// Forward a photo; the attachment's reader is dropped when this returns
    async fn send_photo(&self, user: &UserId, photo: Attachment) -> Result<MessageRef>;
}

/// Kind of recorded message
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundKind {
    Text,
    ForceReply,
    PaymentRequest,
    Photo {
        file_name: String,
        #[serde(skip)]
        bytes: Vec<u8>,
        size: usize,
    },
}

/// A message recorded by [`OutboxMessenger`]
#[derive(Clone, Debug, Serialize)]
pub struct OutboundMessage {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub kind: OutboundKind,
    pub sent_at: DateTime<Utc>,
}

/// Messages kept per user before the oldest are dropped
pub const DEFAULT_OUTBOX_LIMIT: usize = 100;

/// In-memory transport that records outbound messages per user
pub struct OutboxMessenger {
    outbox: RwLock<HashMap<UserId, VecDeque<OutboundMessage>>>,
    limit: usize,
}

impl Default for OutboxMessenger {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxMessenger {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_OUTBOX_LIMIT)
    }

    /// Keep at most `limit` messages per user (at least one)
    pub fn with_limit(limit: usize) -> Self {
        Self {
            outbox: RwLock::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Retained messages sent to `user`, oldest first
    pub fn messages(&self, user: &UserId) -> Result<Vec<OutboundMessage>> {
        let outbox = self.outbox.read().map_err(poisoned)?;
        Ok(outbox
            .get(user)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Take and clear everything retained for `user`
    pub fn drain(&self, user: &UserId) -> Result<Vec<OutboundMessage>> {
        let mut outbox = self.outbox.write().map_err(poisoned)?;
        Ok(outbox.remove(user).map(Vec::from).unwrap_or_default())
    }

    fn push(&self, user: &UserId, text: &str, kind: OutboundKind) -> Result<MessageRef> {
        let message = OutboundMessage {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            kind,
            sent_at: Utc::now(),
        };
        let reference = MessageRef {
            chat: user.clone(),
            message_id: message.id.clone(),
        };

        let mut outbox = self.outbox.write().map_err(poisoned)?;
        let messages = outbox.entry(user.clone()).or_default();
        messages.push_back(message);
        while messages.len() > self.limit {
            if let Some(dropped) = messages.pop_front() {
                tracing::debug!(user = %user, message_id = %dropped.id, "Outbox full, dropped oldest message");
            }
        }
        Ok(reference)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> BotError {
    BotError::Chat("outbox lock poisoned".into())
}

#[async_trait]
impl Messenger for OutboxMessenger {
    async fn send_text(&self, user: &UserId, text: &str) -> Result<MessageRef> {
        self.push(user, text, OutboundKind::Text)
    }

    async fn request_reply(&self, user: &UserId, text: &str) -> Result<MessageRef> {
        self.push(user, text, OutboundKind::ForceReply)
    }

    async fn send_payment_request(
        &self,
        user: &UserId,
        payment_request: &str,
    ) -> Result<MessageRef> {
        self.push(user, &format!("`{payment_request}`"), OutboundKind::PaymentRequest)
    }

    async fn edit_text(&self, message: &MessageRef, text: &str) -> Result<()> {
        let mut outbox = self.outbox.write().map_err(poisoned)?;
        let found = outbox
            .get_mut(&message.chat)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message.message_id));

        match found {
            Some(m) => {
                m.text = text.to_string();
                Ok(())
            }
            None => Err(BotError::Chat(format!(
                "message {} not found",
                message.message_id
            ))),
        }
    }

    async fn send_photo(&self, user: &UserId, mut photo: Attachment) -> Result<MessageRef> {
        let mut bytes = Vec::new();
        photo.reader.read_to_end(&mut bytes).await?;
        let size = bytes.len();
        self.push(
            user,
            "",
            OutboundKind::Photo {
                file_name: photo.file_name,
                bytes,
                size,
            },
        )
    }
}
