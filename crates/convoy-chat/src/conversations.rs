use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use convoy_db::{ChangeFeed, FieldOp, Filter, Record};
use convoy_types::{Conversation, GroupId, MessagePreview, UserId};

use crate::directory::GroupDirectory;
use crate::error::{ChatError, Missing, Result};
use crate::feed::{SharedFeed, blocking};
use crate::subscription::Subscription;

pub(crate) const COLLECTION: &str = "conversations";

/// Stored body of a conversation record; id and timestamps live on the record.
#[derive(Debug, Serialize, Deserialize)]
struct ConversationDoc {
    group_id: GroupId,
    members: BTreeSet<UserId>,
    #[serde(default)]
    last_message: Option<MessagePreview>,
}

fn decode(record: Record) -> anyhow::Result<Conversation> {
    let id: Uuid = record
        .id
        .parse()
        .map_err(|e| anyhow!("Corrupt conversation id '{}': {}", record.id, e))?;
    let doc: ConversationDoc = serde_json::from_value(record.body)
        .map_err(|e| anyhow!("Corrupt conversation '{}': {}", record.id, e))?;

    Ok(Conversation {
        id,
        group_id: doc.group_id,
        members: doc.members,
        last_message: doc.last_message,
        created_at: record.created_at,
        updated_at: record.updated_at,
    })
}

/// Typed access to conversation records.
#[derive(Clone)]
pub struct ConversationStore {
    feed: SharedFeed,
}

impl ConversationStore {
    pub fn new(feed: SharedFeed) -> Self {
        Self { feed }
    }

    pub async fn get(&self, id: Uuid) -> Result<Conversation> {
        blocking(&self.feed, move |feed| load_conversation(feed, id)).await
    }

    /// The group's conversation. If a create race left several, the first in
    /// store order wins.
    pub async fn find_by_group(&self, group_id: &str) -> Result<Option<Conversation>> {
        let group_id = group_id.to_string();
        blocking(&self.feed, move |feed| {
            let mut records = feed.query(COLLECTION, &Filter::field_eq("group_id", group_id.as_str()))?;
            if records.len() > 1 {
                warn!(
                    "Group {} has {} conversations, using the first",
                    group_id,
                    records.len()
                );
            }
            if records.is_empty() {
                return Ok(None);
            }
            Ok(Some(decode(records.remove(0))?))
        })
        .await
    }

    pub async fn create(&self, group_id: &str, members: BTreeSet<UserId>) -> Result<Conversation> {
        if members.is_empty() {
            return Err(Missing::Group(group_id.to_string()).into());
        }

        let id = Uuid::new_v4();
        let doc = ConversationDoc {
            group_id: group_id.to_string(),
            members,
            last_message: None,
        };
        let body = serde_json::to_value(&doc).map_err(anyhow::Error::from)?;

        let conversation = blocking(&self.feed, move |feed| {
            Ok(decode(feed.insert(COLLECTION, &id.to_string(), body)?)?)
        })
        .await?;

        info!(
            "Created conversation {} for group {} ({} members)",
            conversation.id,
            conversation.group_id,
            conversation.members.len()
        );
        Ok(conversation)
    }

    /// Return the group's conversation, creating it from the group's current
    /// membership if none exists yet.
    ///
    /// There is no uniqueness constraint, so two first-time resolvers can both
    /// create one. After creating, the group is read again and the first record
    /// in store order is returned, so concurrent resolvers converge on the same
    /// id. The losing record is left behind unused.
    pub async fn resolve(
        &self,
        group_id: &str,
        user_id: &str,
        directory: &Arc<dyn GroupDirectory>,
    ) -> Result<Conversation> {
        if let Some(existing) = self.find_by_group(group_id).await? {
            return Ok(existing);
        }

        let members = group_members(directory, group_id).await?;
        if !members.contains(user_id) {
            debug!("User {} resolving group {} is not a member", user_id, group_id);
        }

        let created = self.create(group_id, members).await?;
        let winner = self.find_by_group(group_id).await?.unwrap_or_else(|| created.clone());
        if winner.id != created.id {
            warn!(
                "Lost conversation create race for group {}: using {}, orphaned {}",
                group_id, winner.id, created.id
            );
        }
        Ok(winner)
    }

    /// Best-effort preview bump. With `None` only `updated_at` moves. A
    /// preview older than the stored one is ignored, so a slow writer cannot
    /// roll the preview back.
    pub async fn record_activity(&self, id: Uuid, preview: Option<MessagePreview>) -> Result<()> {
        let ops = match preview {
            Some(preview) => {
                let value = serde_json::to_value(&preview).map_err(anyhow::Error::from)?;
                vec![FieldOp::set_if_newer("/last_message", value, "sent_at")]
            }
            None => Vec::new(),
        };

        blocking(&self.feed, move |feed| {
            feed.update(COLLECTION, &id.to_string(), &ops)?
                .ok_or(Missing::Conversation(id))?;
            Ok(())
        })
        .await
    }

    /// Live conversation metadata (members, preview, timestamps).
    pub fn subscribe(&self, id: Uuid, cancel: CancellationToken) -> Subscription<Conversation> {
        let key = id.to_string();
        Subscription::spawn(
            self.feed.clone(),
            cancel,
            format!("conversation:{}", id),
            move |change| change.collection == COLLECTION && change.id == key,
            move |feed| load_conversation(feed, id),
        )
    }
}

fn load_conversation(feed: &dyn ChangeFeed, id: Uuid) -> Result<Conversation> {
    let record = feed
        .get(COLLECTION, &id.to_string())?
        .ok_or(Missing::Conversation(id))?;
    Ok(decode(record)?)
}

async fn group_members(directory: &Arc<dyn GroupDirectory>, group_id: &str) -> Result<BTreeSet<UserId>> {
    let directory = directory.clone();
    let gid = group_id.to_string();
    let members = tokio::task::spawn_blocking(move || directory.members(&gid))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ChatError::Transport(anyhow!("directory task failed: {}", e))
        })??;

    Ok(members.into_iter().map(|m| m.user_id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_db::Database;

    fn encode_doc(group_id: &str, members: &[&str]) -> serde_json::Value {
        serde_json::to_value(ConversationDoc {
            group_id: group_id.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            last_message: None,
        })
        .unwrap()
    }

    fn store() -> (Arc<Database>, ConversationStore) {
        let db = Arc::new(Database::open_in_memory(16).unwrap());
        (db.clone(), ConversationStore::new(db))
    }

    #[tokio::test]
    async fn duplicate_groups_resolve_to_first_record() {
        let (db, store) = store();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        db.insert(COLLECTION, &first.to_string(), encode_doc("g1", &["u1"])).unwrap();
        db.insert(COLLECTION, &second.to_string(), encode_doc("g1", &["u1", "u2"])).unwrap();

        let found = store.find_by_group("g1").await.unwrap().unwrap();
        assert_eq!(found.id, first);
        assert!(store.find_by_group("g2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_requires_members() {
        let (_db, store) = store();
        let err = store.create("g1", BTreeSet::new()).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(Missing::Group(_))));
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_as_transport_error() {
        let (db, store) = store();
        let id = Uuid::new_v4();
        db.insert(COLLECTION, &id.to_string(), serde_json::json!({ "group_id": 7 })).unwrap();

        assert!(store.get(id).await.unwrap_err().is_transport());
        assert!(store.get(Uuid::new_v4()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn activity_without_preview_only_bumps_updated_at() {
        let (_db, store) = store();
        let created = store
            .create("g1", ["u1".to_string()].into_iter().collect())
            .await
            .unwrap();

        store.record_activity(created.id, None).await.unwrap();
        let after = store.get(created.id).await.unwrap();
        assert!(after.last_message.is_none());
        assert!(after.updated_at >= created.updated_at);

        let missing = store.record_activity(Uuid::new_v4(), None).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn late_preview_does_not_replace_newer_one() {
        let (_db, store) = store();
        let created = store
            .create("g1", ["u1".to_string(), "u2".to_string()].into_iter().collect())
            .await
            .unwrap();

        let earlier = chrono::Utc::now();
        let preview = |sender: &str, summary: &str, sent_at| MessagePreview {
            message_id: Uuid::new_v4(),
            sender_id: sender.to_string(),
            summary: summary.to_string(),
            sent_at,
        };
        let newer = preview("u2", "second", earlier + chrono::Duration::milliseconds(5));

        store.record_activity(created.id, Some(newer.clone())).await.unwrap();
        store
            .record_activity(created.id, Some(preview("u1", "first", earlier)))
            .await
            .unwrap();

        let after = store.get(created.id).await.unwrap();
        assert_eq!(after.last_message.map(|p| p.message_id), Some(newer.message_id));
    }
}
