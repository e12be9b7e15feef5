use chrono::{DateTime, Utc};
use convoy_types::{OptionId, Poll};
use thiserror::Error;

use crate::tally::is_expired;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoteError {
    #[error("poll has expired")]
    Expired,
    #[error("unknown poll option {0}")]
    UnknownOption(OptionId),
}

/// Options a user is added to and removed from, applied as one atomic batch.
///
/// Removals are not filtered against the current vote sets: the snapshot the
/// plan was built from may be stale, and removing an absent vote is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoteChange {
    pub add: Option<OptionId>,
    pub remove: Vec<OptionId>,
}

impl VoteChange {
    /// Apply to an in-memory poll with the same semantics as the store.
    pub fn apply_to(&self, poll: &mut Poll, user_id: &str) {
        for option in poll.options.iter_mut() {
            if self.remove.contains(&option.id) {
                option.votes.remove(user_id);
            }
            if self.add == Some(option.id) {
                option.votes.insert(user_id.to_string());
            }
        }
    }
}

/// Plan a vote for `option_id`. On single-choice polls every other option is
/// retracted in the same batch.
pub fn plan_vote(poll: &Poll, option_id: OptionId, now: DateTime<Utc>) -> Result<VoteChange, VoteError> {
    check_votable(poll, option_id, now)?;

    let remove = if poll.allow_multiple {
        Vec::new()
    } else {
        poll.options
            .iter()
            .map(|o| o.id)
            .filter(|id| *id != option_id)
            .collect()
    };

    Ok(VoteChange {
        add: Some(option_id),
        remove,
    })
}

/// Plan removal of a vote. Removing a vote never cast is a no-op, not an error.
pub fn plan_unvote(poll: &Poll, option_id: OptionId, now: DateTime<Utc>) -> Result<VoteChange, VoteError> {
    check_votable(poll, option_id, now)?;

    Ok(VoteChange {
        add: None,
        remove: vec![option_id],
    })
}

fn check_votable(poll: &Poll, option_id: OptionId, now: DateTime<Utc>) -> Result<(), VoteError> {
    if is_expired(poll, now) {
        return Err(VoteError::Expired);
    }
    if poll.option(option_id).is_none() {
        return Err(VoteError::UnknownOption(option_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tally::{percentage, total_votes};
    use chrono::Duration;

    fn poll(allow_multiple: bool) -> Poll {
        Poll::new(
            "Where to eat?",
            ["Pizza".to_string(), "Sushi".to_string(), "Tacos".to_string()],
            allow_multiple,
            None,
        )
    }

    fn vote(poll: &mut Poll, user: &str, option: OptionId) {
        plan_vote(poll, option, Utc::now()).unwrap().apply_to(poll, user);
    }

    fn unvote(poll: &mut Poll, user: &str, option: OptionId) {
        plan_unvote(poll, option, Utc::now()).unwrap().apply_to(poll, user);
    }

    #[test]
    fn single_choice_vote_moves_the_vote() {
        let mut p = poll(false);
        vote(&mut p, "u1", 0);
        vote(&mut p, "u1", 1);

        assert!(!p.options[0].votes.contains("u1"));
        assert!(p.options[1].votes.contains("u1"));
        assert_eq!(p.choices_of("u1"), vec![1]);
    }

    #[test]
    fn multi_choice_vote_keeps_earlier_votes() {
        let mut p = poll(true);
        vote(&mut p, "u1", 0);
        vote(&mut p, "u1", 1);

        assert!(p.options[0].votes.contains("u1"));
        assert!(p.options[1].votes.contains("u1"));
        assert_eq!(total_votes(&p), 2);
    }

    #[test]
    fn repeated_vote_is_idempotent() {
        let mut p = poll(false);
        vote(&mut p, "u1", 2);
        vote(&mut p, "u1", 2);
        assert_eq!(p.options[2].votes.len(), 1);
    }

    #[test]
    fn unvote_is_idempotent() {
        let mut p = poll(true);
        vote(&mut p, "u1", 0);
        vote(&mut p, "u2", 0);

        unvote(&mut p, "u1", 0);
        let once = p.clone();
        unvote(&mut p, "u1", 0);
        assert_eq!(p, once);

        // never cast
        unvote(&mut p, "u3", 1);
        assert_eq!(p, once);
        assert_eq!(p.options[0].votes.len(), 1);
    }

    #[test]
    fn where_to_eat_scenario() {
        let mut p = Poll::new("Where to eat?", ["Pizza".to_string(), "Sushi".to_string()], false, None);
        vote(&mut p, "u1", 0);
        vote(&mut p, "u2", 1);
        vote(&mut p, "u1", 1);

        let sushi: Vec<_> = p.options[1].votes.iter().cloned().collect();
        assert!(p.options[0].votes.is_empty());
        assert_eq!(sushi, vec!["u1".to_string(), "u2".to_string()]);

        let total = total_votes(&p);
        assert_eq!(total, 2);
        assert_eq!(percentage(p.options[0].votes.len(), total), 0.0);
        assert_eq!(percentage(p.options[1].votes.len(), total), 100.0);
    }

    #[test]
    fn unknown_option_is_rejected() {
        let p = poll(false);
        assert_eq!(plan_vote(&p, 9, Utc::now()), Err(VoteError::UnknownOption(9)));
        assert_eq!(plan_unvote(&p, 9, Utc::now()), Err(VoteError::UnknownOption(9)));
    }

    #[test]
    fn expired_poll_rejects_votes_but_not_at_the_boundary() {
        let at = Utc::now();
        let mut p = poll(false);
        p.expires_at = Some(at);

        assert!(plan_vote(&p, 0, at).is_ok());
        assert_eq!(plan_vote(&p, 0, at + Duration::seconds(1)), Err(VoteError::Expired));
        assert_eq!(plan_unvote(&p, 0, at + Duration::seconds(1)), Err(VoteError::Expired));
    }

    #[test]
    fn single_choice_plan_retracts_every_other_option() {
        let p = poll(false);
        let change = plan_vote(&p, 1, Utc::now()).unwrap();
        assert_eq!(change.add, Some(1));
        assert_eq!(change.remove, vec![0, 2]);

        let multi = plan_vote(&poll(true), 1, Utc::now()).unwrap();
        assert!(multi.remove.is_empty());
    }
}
