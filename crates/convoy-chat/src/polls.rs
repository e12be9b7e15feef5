use chrono::{DateTime, Utc};
use uuid::Uuid;

use convoy_db::FieldOp;
use convoy_poll::{VoteChange, VoteError, plan_unvote, plan_vote};
use convoy_types::api::CreatePollRequest;
use convoy_types::{Message, OptionId, Poll};

use crate::error::{Missing, Result, ValidationError};
use crate::feed::blocking;
use crate::messages::{COLLECTION, MessageStore, decode, load_message};

type Planner = fn(&Poll, OptionId, DateTime<Utc>) -> std::result::Result<VoteChange, VoteError>;

/// Validate a poll request. Options are trimmed and blank ones dropped.
pub fn build_poll(req: CreatePollRequest) -> std::result::Result<Poll, ValidationError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ValidationError::EmptyQuestion);
    }

    let options: Vec<String> = req
        .options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < 2 {
        return Err(ValidationError::TooFewOptions(options.len()));
    }

    Ok(Poll::new(question, options, req.allow_multiple, req.expires_at))
}

impl MessageStore {
    /// Cast a vote. On single-choice polls any earlier vote by the same user
    /// is retracted in the same atomic update.
    pub async fn vote(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        option_id: OptionId,
        user_id: &str,
    ) -> Result<Message> {
        self.change_vote(conversation_id, message_id, option_id, user_id, plan_vote)
            .await
    }

    /// Withdraw a vote. Withdrawing a vote never cast is a no-op.
    pub async fn unvote(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        option_id: OptionId,
        user_id: &str,
    ) -> Result<Message> {
        self.change_vote(conversation_id, message_id, option_id, user_id, plan_unvote)
            .await
    }

    async fn change_vote(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        option_id: OptionId,
        user_id: &str,
        plan: Planner,
    ) -> Result<Message> {
        let user_id = user_id.to_string();
        blocking(&self.feed, move |feed| {
            let message = load_message(feed, message_id)?;
            if message.conversation_id != conversation_id {
                return Err(Missing::Message(message_id).into());
            }
            let poll = message.poll().ok_or(Missing::Poll(message_id))?;

            // Expiry is checked against the clock at call time, not at render time.
            let change = plan(poll, option_id, Utc::now()).map_err(|e| match e {
                VoteError::Expired => Missing::ExpiredPoll(message_id),
                VoteError::UnknownOption(option_id) => Missing::PollOption { message_id, option_id },
            })?;

            let ops = vote_ops(poll, &change, &user_id);
            let updated = feed
                .update(COLLECTION, &message_id.to_string(), &ops)?
                .ok_or(Missing::Message(message_id))?;
            Ok(decode(updated)?)
        })
        .await
    }
}

/// Element-level edits on each option's vote array; the whole array is never
/// rewritten, so concurrent voters cannot overwrite each other.
fn vote_ops(poll: &Poll, change: &VoteChange, user_id: &str) -> Vec<FieldOp> {
    let votes_path = |id: OptionId| {
        poll.option_index(id)
            .map(|idx| format!("/body/poll/options/{}/votes", idx))
    };

    let removals = change
        .remove
        .iter()
        .filter_map(|id| votes_path(*id))
        .map(|path| FieldOp::array_remove(path, user_id));
    let addition = change
        .add
        .and_then(votes_path)
        .map(|path| FieldOp::array_union(path, user_id));

    removals.chain(addition).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_needs_two_non_blank_options() {
        let err = build_poll(CreatePollRequest::new("Where to eat?", ["Pizza", "  ", ""])).unwrap_err();
        assert_eq!(err, ValidationError::TooFewOptions(1));

        let err = build_poll(CreatePollRequest::new("   ", ["Pizza", "Sushi"])).unwrap_err();
        assert_eq!(err, ValidationError::EmptyQuestion);

        let poll = build_poll(CreatePollRequest::new(" Where to eat? ", [" Pizza", "", "Sushi "])).unwrap();
        assert_eq!(poll.question, "Where to eat?");
        let texts: Vec<_> = poll.options.iter().map(|o| (o.id, o.text.as_str())).collect();
        assert_eq!(texts, vec![(0, "Pizza"), (1, "Sushi")]);
    }

    #[test]
    fn single_choice_ops_remove_before_adding() {
        let poll = Poll::new("q", ["a".to_string(), "b".to_string(), "c".to_string()], false, None);
        let change = plan_vote(&poll, 2, Utc::now()).unwrap();

        let ops = vote_ops(&poll, &change, "u1");
        assert_eq!(
            ops,
            vec![
                FieldOp::array_remove("/body/poll/options/0/votes", "u1"),
                FieldOp::array_remove("/body/poll/options/1/votes", "u1"),
                FieldOp::array_union("/body/poll/options/2/votes", "u1"),
            ]
        );
    }
}
