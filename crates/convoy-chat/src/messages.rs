use std::collections::BTreeSet;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use convoy_db::{ChangeFeed, FieldOp, Filter, Record};
use convoy_types::api::{SendFileRequest, SendImageRequest};
use convoy_types::{Message, MessageBody, UserId};

use crate::error::{Missing, Result, ValidationError};
use crate::feed::{SharedFeed, blocking};
use crate::subscription::Subscription;

pub(crate) const COLLECTION: &str = "messages";

/// Stored body of a message record; id and `created_at` live on the record.
#[derive(Debug, Serialize, Deserialize)]
struct MessageDoc {
    conversation_id: Uuid,
    sender_id: UserId,
    body: MessageBody,
    #[serde(default)]
    read_by: BTreeSet<UserId>,
}

pub(crate) fn decode(record: Record) -> anyhow::Result<Message> {
    let id: Uuid = record
        .id
        .parse()
        .map_err(|e| anyhow!("Corrupt message id '{}': {}", record.id, e))?;
    let doc: MessageDoc = serde_json::from_value(record.body)
        .map_err(|e| anyhow!("Corrupt message '{}': {}", record.id, e))?;

    Ok(Message {
        id,
        conversation_id: doc.conversation_id,
        sender_id: doc.sender_id,
        created_at: record.created_at,
        body: doc.body,
        read_by: doc.read_by,
    })
}

// -- Validation --

pub fn text_body(text: &str) -> std::result::Result<MessageBody, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(MessageBody::Text { text: text.to_string() })
}

pub fn image_body(req: SendImageRequest) -> std::result::Result<MessageBody, ValidationError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    Ok(MessageBody::Image {
        url: url.to_string(),
        caption: req
            .caption
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty()),
    })
}

pub fn file_body(req: SendFileRequest) -> std::result::Result<MessageBody, ValidationError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(ValidationError::EmptyUrl);
    }
    Ok(MessageBody::File {
        url: url.to_string(),
        name: req.name.trim().to_string(),
        size_bytes: req.size_bytes,
    })
}

/// Typed access to a conversation's append-only message log.
#[derive(Clone)]
pub struct MessageStore {
    pub(crate) feed: SharedFeed,
}

impl MessageStore {
    pub fn new(feed: SharedFeed) -> Self {
        Self { feed }
    }

    /// Append a message. Every call mints a fresh id, so a retried append
    /// lands as a second message; nothing is de-duplicated.
    pub async fn append(&self, conversation_id: Uuid, sender_id: &str, body: MessageBody) -> Result<Message> {
        let id = Uuid::new_v4();
        let doc = MessageDoc {
            conversation_id,
            sender_id: sender_id.to_string(),
            body,
            read_by: BTreeSet::from([sender_id.to_string()]),
        };
        let value = serde_json::to_value(&doc).map_err(anyhow::Error::from)?;

        blocking(&self.feed, move |feed| {
            Ok(decode(feed.insert(COLLECTION, &id.to_string(), value)?)?)
        })
        .await
    }

    pub async fn get(&self, message_id: Uuid) -> Result<Message> {
        blocking(&self.feed, move |feed| load_message(feed, message_id)).await
    }

    /// Current ordered log of a conversation.
    pub async fn list(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        blocking(&self.feed, move |feed| load_log(feed, conversation_id)).await
    }

    /// Add `user_id` to the message's read set. Idempotent.
    pub async fn mark_read(&self, conversation_id: Uuid, message_id: Uuid, user_id: &str) -> Result<Message> {
        let user_id = user_id.to_string();
        blocking(&self.feed, move |feed| {
            let message = load_message(feed, message_id)?;
            if message.conversation_id != conversation_id {
                return Err(Missing::Message(message_id).into());
            }

            let updated = feed
                .update(
                    COLLECTION,
                    &message_id.to_string(),
                    &[FieldOp::array_union("/read_by", user_id)],
                )?
                .ok_or(Missing::Message(message_id))?;
            Ok(decode(updated)?)
        })
        .await
    }

    /// Live ordered snapshots of the conversation's log.
    pub fn subscribe(&self, conversation_id: Uuid, cancel: CancellationToken) -> Subscription<Vec<Message>> {
        let filter = in_conversation(conversation_id);
        Subscription::spawn(
            self.feed.clone(),
            cancel,
            format!("messages:{}", conversation_id),
            move |change| change.collection == COLLECTION && filter.matches(&change.body),
            move |feed| load_log(feed, conversation_id),
        )
    }
}

fn in_conversation(conversation_id: Uuid) -> Filter {
    Filter::field_eq("conversation_id", conversation_id.to_string())
}

pub(crate) fn load_message(feed: &dyn ChangeFeed, message_id: Uuid) -> Result<Message> {
    let record = feed
        .get(COLLECTION, &message_id.to_string())?
        .ok_or(Missing::Message(message_id))?;
    Ok(decode(record)?)
}

/// Undecodable records are skipped so one bad row cannot blank the log.
fn load_log(feed: &dyn ChangeFeed, conversation_id: Uuid) -> Result<Vec<Message>> {
    let records = feed.query(COLLECTION, &in_conversation(conversation_id))?;

    Ok(records
        .into_iter()
        .filter_map(|record| {
            decode(record)
                .map_err(|e| warn!("Skipping message in {}: {}", conversation_id, e))
                .ok()
        })
        .collect())
}
