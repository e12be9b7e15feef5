//! Convoy poll engine.
//!
//! Pure functions over a [`Poll`](convoy_types::Poll) and the current time:
//! - lifecycle classification (OPEN / EXPIRED), never stored
//! - vote totals and percentages
//! - display order, visible rank and winner/tie classification
//! - vote/unvote validation, planned as atomic add/remove sets
//!
//! Nothing here touches storage, so a tally can be recomputed on every render.

pub mod tally;
pub mod vote;

pub use tally::{
    OptionTally, Outcome, PollState, PollTally, Verdict, is_expired, percentage, state, tally,
    total_votes,
};
pub use vote::{VoteChange, VoteError, plan_unvote, plan_vote};
