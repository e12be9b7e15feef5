//! Convoy group chat.
//!
//! Each travel group has one conversation: an append-only log of text,
//! attachment and poll messages, kept live through [`Subscription`]s over a
//! [`ChangeFeed`](convoy_db::ChangeFeed). Start with [`Chat`].

pub mod config;
pub mod conversations;
pub mod directory;
pub mod error;
pub mod feed;
pub mod messages;
pub mod polls;
pub mod session;
pub mod subscription;

pub use config::ChatConfig;
pub use conversations::ConversationStore;
pub use directory::{GroupDirectory, StaticDirectory};
pub use error::{ChatError, Missing, Result, ValidationError};
pub use feed::SharedFeed;
pub use messages::MessageStore;
pub use polls::build_poll;
pub use session::{Chat, ConversationSession};
pub use subscription::Subscription;
