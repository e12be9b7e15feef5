use chrono::{DateTime, Utc};
use convoy_types::{OptionId, Poll};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Open,
    Expired,
}

/// Per-option classification, only ever set on an expired poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Winner,
    Tie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Still accepting votes; no winner is computed.
    Open,
    /// Expired with zero votes cast.
    NoVotes,
    Winner(OptionId),
    /// Several options share the top count, in creation order.
    Tie(Vec<OptionId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionTally {
    pub option_id: OptionId,
    pub text: String,
    pub votes: usize,
    /// 0.0 ..= 100.0; 0 when nobody has voted.
    pub percentage: f64,
    /// Visible 1-based position, assigned once the poll has expired.
    pub rank: Option<usize>,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollTally {
    pub state: PollState,
    pub total_votes: usize,
    /// Creation order while open, ranked order once expired.
    pub options: Vec<OptionTally>,
    pub outcome: Outcome,
}

/// Strictly after `expires_at`: a poll is still open at the exact instant.
pub fn is_expired(poll: &Poll, now: DateTime<Utc>) -> bool {
    poll.expires_at.is_some_and(|at| now > at)
}

pub fn state(poll: &Poll, now: DateTime<Utc>) -> PollState {
    if is_expired(poll, now) {
        PollState::Expired
    } else {
        PollState::Open
    }
}

pub fn total_votes(poll: &Poll) -> usize {
    poll.options.iter().map(|o| o.votes.len()).sum()
}

pub fn percentage(votes: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        votes as f64 / total as f64 * 100.0
    }
}

pub fn tally(poll: &Poll, now: DateTime<Utc>) -> PollTally {
    let state = state(poll, now);
    let total = total_votes(poll);

    let mut options: Vec<OptionTally> = poll
        .options
        .iter()
        .map(|o| OptionTally {
            option_id: o.id,
            text: o.text.clone(),
            votes: o.votes.len(),
            percentage: percentage(o.votes.len(), total),
            rank: None,
            verdict: None,
        })
        .collect();

    if state == PollState::Open {
        return PollTally {
            state,
            total_votes: total,
            options,
            outcome: Outcome::Open,
        };
    }

    // sort_by is stable, so equal counts keep creation order
    options.sort_by(|a, b| b.votes.cmp(&a.votes));
    for (idx, row) in options.iter_mut().enumerate() {
        row.rank = Some(idx + 1);
    }

    let max_votes = options.first().map_or(0, |o| o.votes);
    let outcome = if max_votes == 0 {
        Outcome::NoVotes
    } else {
        let leaders: Vec<OptionId> = options
            .iter()
            .filter(|o| o.votes == max_votes)
            .map(|o| o.option_id)
            .collect();

        let verdict = if leaders.len() > 1 { Verdict::Tie } else { Verdict::Winner };
        for row in options.iter_mut().filter(|o| o.votes == max_votes) {
            row.verdict = Some(verdict);
        }

        if leaders.len() > 1 {
            Outcome::Tie(leaders)
        } else {
            Outcome::Winner(leaders[0])
        }
    };

    PollTally {
        state,
        total_votes: total,
        options,
        outcome,
    }
}
