use thiserror::Error;
use uuid::Uuid;

use convoy_types::{GroupId, OptionId};

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected before anything was written.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(#[from] Missing),

    /// The change feed failed or returned data we could not decode.
    #[error("change feed error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message text is empty")]
    EmptyText,
    #[error("poll question is empty")]
    EmptyQuestion,
    #[error("a poll needs at least two non-empty options, got {0}")]
    TooFewOptions(usize),
    #[error("attachment url is empty")]
    EmptyUrl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Missing {
    #[error("group {0} has no members")]
    Group(GroupId),
    #[error("conversation {0}")]
    Conversation(Uuid),
    #[error("message {0}")]
    Message(Uuid),
    #[error("message {0} is not a poll")]
    Poll(Uuid),
    #[error("option {option_id} on poll {message_id}")]
    PollOption { message_id: Uuid, option_id: OptionId },
    #[error("poll {0} has expired")]
    ExpiredPoll(Uuid),
}

impl ChatError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
