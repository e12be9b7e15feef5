//! Convoy shared types.
//!
//! Domain records (conversations, messages, polls) and request payloads used
//! by every other crate in the workspace. No I/O lives here.

pub mod api;
pub mod models;

pub use models::{
    Conversation, GroupId, GroupMember, MemberRole, Message, MessageBody,
    MessagePreview, OptionId, Poll, PollOption, UserId,
};
