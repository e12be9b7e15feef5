use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque user identifier supplied by the identity provider.
pub type UserId = String;

/// Opaque group identifier supplied by the group directory.
pub type GroupId = String;

/// Poll option id. Equal to the option's creation index within its poll.
pub type OptionId = u32;

// -- Groups --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub user_id: UserId,
    pub role: MemberRole,
}

// -- Conversations --

/// The single chat thread bound to one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub group_id: GroupId,
    /// Seeded once from the group's membership at creation, never re-synced.
    pub members: BTreeSet<UserId>,
    pub last_message: Option<MessagePreview>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePreview {
    pub message_id: Uuid,
    pub sender_id: UserId,
    pub summary: String,
    /// Microseconds since the epoch on the wire, so stored previews order numerically.
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub sent_at: DateTime<Utc>,
}

// -- Messages --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    /// Server-assigned; snapshots are ordered by this, then by store order.
    pub created_at: DateTime<Utc>,
    pub body: MessageBody,
    pub read_by: BTreeSet<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Text {
        text: String,
    },
    Image {
        url: String,
        caption: Option<String>,
    },
    File {
        url: String,
        name: String,
        size_bytes: Option<u64>,
    },
    Poll {
        poll: Poll,
    },
}

impl MessageBody {
    /// One-line summary used for the conversation's last-message preview.
    /// Text is cut to at most `max_chars` characters.
    pub fn summary(&self, max_chars: usize) -> String {
        match self {
            Self::Text { text } => {
                let trimmed = text.trim();
                if trimmed.chars().count() <= max_chars {
                    trimmed.to_string()
                } else {
                    let cut: String = trimmed.chars().take(max_chars).collect();
                    format!("{}…", cut.trim_end())
                }
            }
            Self::Image { .. } => "Image".to_string(),
            Self::File { name, .. } => format!("File: {}", name),
            Self::Poll { poll } => format!("Poll: {}", poll.question),
        }
    }
}

impl Message {
    pub fn poll(&self) -> Option<&Poll> {
        match &self.body {
            MessageBody::Poll { poll } => Some(poll),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            _ => None,
        }
    }
}

// -- Polls --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub question: String,
    /// Fixed at creation; an option's position never changes.
    pub options: Vec<PollOption>,
    pub allow_multiple: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub id: OptionId,
    pub text: String,
    #[serde(default)]
    pub votes: BTreeSet<UserId>,
}

impl Poll {
    /// Builds a poll with empty vote sets. Option ids are assigned by position.
    pub fn new(
        question: impl Into<String>,
        options: impl IntoIterator<Item = String>,
        allow_multiple: bool,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        let options = options
            .into_iter()
            .enumerate()
            .map(|(idx, text)| PollOption {
                id: idx as OptionId,
                text,
                votes: BTreeSet::new(),
            })
            .collect();

        Self {
            question: question.into(),
            options,
            allow_multiple,
            expires_at,
        }
    }

    pub fn option_index(&self, id: OptionId) -> Option<usize> {
        self.options.iter().position(|o| o.id == id)
    }

    pub fn option(&self, id: OptionId) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// Option ids the user currently has a vote on, in creation order.
    pub fn choices_of(&self, user_id: &str) -> Vec<OptionId> {
        self.options
            .iter()
            .filter(|o| o.votes.contains(user_id))
            .map(|o| o.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_is_tagged_by_type() {
        let body = MessageBody::Poll {
            poll: Poll::new("Where to eat?", ["Pizza".to_string(), "Sushi".to_string()], false, None),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "poll");
        assert_eq!(json["poll"]["options"][1]["id"], 1);
        assert_eq!(json["poll"]["options"][1]["votes"], serde_json::json!([]));

        let text: MessageBody = serde_json::from_value(serde_json::json!({
            "type": "text",
            "text": "hello"
        }))
        .unwrap();
        assert_eq!(text, MessageBody::Text { text: "hello".into() });
    }

    #[test]
    fn summary_truncates_long_text() {
        let body = MessageBody::Text {
            text: "  abcdefghij  ".to_string(),
        };
        assert_eq!(body.summary(20), "abcdefghij");
        assert_eq!(body.summary(4), "abcd…");

        let file = MessageBody::File {
            url: "https://files/1".into(),
            name: "itinerary.pdf".into(),
            size_bytes: Some(1024),
        };
        assert_eq!(file.summary(10), "File: itinerary.pdf");
    }

    #[test]
    fn choices_of_lists_voted_options() {
        let mut poll = Poll::new("q", ["a".to_string(), "b".to_string(), "c".to_string()], true, None);
        poll.options[0].votes.insert("u1".into());
        poll.options[2].votes.insert("u1".into());
        poll.options[1].votes.insert("u2".into());

        assert_eq!(poll.choices_of("u1"), vec![0, 2]);
        assert_eq!(poll.choices_of("u3"), Vec::<OptionId>::new());
        assert_eq!(poll.option_index(2), Some(2));
        assert!(poll.option(7).is_none());
    }
}
