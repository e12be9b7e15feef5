use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use convoy_types::api::{CreatePollRequest, SendFileRequest, SendImageRequest};
use convoy_types::{Conversation, GroupId, Message, MessageBody, MessagePreview, OptionId, UserId};

use crate::config::ChatConfig;
use crate::conversations::ConversationStore;
use crate::directory::GroupDirectory;
use crate::error::Result;
use crate::feed::SharedFeed;
use crate::messages::{MessageStore, file_body, image_body, text_body};
use crate::polls::build_poll;
use crate::subscription::Subscription;

/// Entry point: shared handles to the change feed and group directory.
#[derive(Clone)]
pub struct Chat {
    directory: Arc<dyn GroupDirectory>,
    config: ChatConfig,
    conversations: ConversationStore,
    messages: MessageStore,
}

impl Chat {
    pub fn new(feed: SharedFeed, directory: Arc<dyn GroupDirectory>, config: ChatConfig) -> Self {
        Self {
            conversations: ConversationStore::new(feed.clone()),
            messages: MessageStore::new(feed),
            directory,
            config,
        }
    }

    /// Open the SQLite feed named by `config`.
    pub fn from_config(config: ChatConfig, directory: Arc<dyn GroupDirectory>) -> anyhow::Result<Self> {
        let feed: SharedFeed = Arc::new(config.open_feed()?);
        Ok(Self::new(feed, directory, config))
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// The group's conversation id, created on first access.
    pub async fn resolve(&self, group_id: &str, user_id: &str) -> Result<Uuid> {
        let conversation = self
            .conversations
            .resolve(group_id, user_id, &self.directory)
            .await?;
        Ok(conversation.id)
    }

    /// Bind a session to `(group_id, user_id)`.
    pub async fn open(&self, group_id: &str, user_id: &str) -> Result<ConversationSession> {
        let conversation = self
            .conversations
            .resolve(group_id, user_id, &self.directory)
            .await?;

        info!(
            "Session opened for {} in group {} (conversation {})",
            user_id, group_id, conversation.id
        );
        Ok(ConversationSession {
            conversations: self.conversations.clone(),
            messages: self.messages.clone(),
            group_id: group_id.to_string(),
            user_id: user_id.to_string(),
            conversation,
            preview_chars: self.config.preview_chars,
            teardown: CancellationToken::new(),
        })
    }

    /// Live message log for a group, without holding a session.
    pub async fn subscribe(&self, group_id: &str, user_id: &str) -> Result<Subscription<Vec<Message>>> {
        let conversation_id = self.resolve(group_id, user_id).await?;
        Ok(self.messages.subscribe(conversation_id, CancellationToken::new()))
    }
}

/// One user's view of one group's conversation.
///
/// Every subscription opened through the session is cancelled when the
/// session is closed or dropped. Mutations already in flight still complete.
pub struct ConversationSession {
    conversations: ConversationStore,
    messages: MessageStore,
    group_id: GroupId,
    user_id: UserId,
    /// As resolved at open time; subscribe for live metadata.
    conversation: Conversation,
    preview_chars: usize,
    teardown: CancellationToken,
}

impl ConversationSession {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation.id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // -- Subscriptions --

    pub fn subscribe(&self) -> Subscription<Vec<Message>> {
        self.messages
            .subscribe(self.conversation.id, self.teardown.child_token())
    }

    pub fn subscribe_conversation(&self) -> Subscription<Conversation> {
        self.conversations
            .subscribe(self.conversation.id, self.teardown.child_token())
    }

    /// Current log, read once.
    pub async fn messages(&self) -> Result<Vec<Message>> {
        self.messages.list(self.conversation.id).await
    }

    // -- Mutations --

    pub async fn send(&self, text: &str) -> Result<Message> {
        let body = text_body(text)?;
        self.append(body).await
    }

    pub async fn send_image(&self, req: SendImageRequest) -> Result<Message> {
        let body = image_body(req)?;
        self.append(body).await
    }

    pub async fn send_file(&self, req: SendFileRequest) -> Result<Message> {
        let body = file_body(req)?;
        self.append(body).await
    }

    pub async fn create_poll(&self, req: CreatePollRequest) -> Result<Message> {
        let poll = build_poll(req)?;
        self.append(MessageBody::Poll { poll }).await
    }

    pub async fn vote(&self, message_id: Uuid, option_id: OptionId) -> Result<Message> {
        let message = self
            .messages
            .vote(self.conversation.id, message_id, option_id, &self.user_id)
            .await?;
        self.touch(None).await;
        Ok(message)
    }

    pub async fn unvote(&self, message_id: Uuid, option_id: OptionId) -> Result<Message> {
        let message = self
            .messages
            .unvote(self.conversation.id, message_id, option_id, &self.user_id)
            .await?;
        self.touch(None).await;
        Ok(message)
    }

    pub async fn mark_read(&self, message_id: Uuid) -> Result<Message> {
        self.messages
            .mark_read(self.conversation.id, message_id, &self.user_id)
            .await
    }

    // -- Lifecycle --

    /// Cancel every subscription opened through this session. Idempotent.
    pub fn close(&self) {
        if !self.teardown.is_cancelled() {
            debug!("Closing session for {} in group {}", self.user_id, self.group_id);
        }
        self.teardown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.teardown.is_cancelled()
    }

    async fn append(&self, body: MessageBody) -> Result<Message> {
        let message = self
            .messages
            .append(self.conversation.id, &self.user_id, body)
            .await?;

        let preview = MessagePreview {
            message_id: message.id,
            sender_id: message.sender_id.clone(),
            summary: message.body.summary(self.preview_chars),
            sent_at: message.created_at,
        };
        self.touch(Some(preview)).await;
        Ok(message)
    }

    /// Preview updates are best-effort; a failure never fails the mutation.
    async fn touch(&self, preview: Option<MessagePreview>) {
        if let Err(e) = self
            .conversations
            .record_activity(self.conversation.id, preview)
            .await
        {
            warn!(
                "Failed to update preview for conversation {}: {}",
                self.conversation.id, e
            );
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.teardown.cancel();
    }
}
