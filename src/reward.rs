//! Reward policy table.
//!
//! | Difficulty | On-time | Late |
//! |---|---|---|
//! | Easy | 5 | 2.5 |
//! | Medium | 15 | 7.5 |
//! | Hard | 20 | 10 |

use chrono::{DateTime, Utc};

use crate::amount::Amount;
use crate::fields::Difficulty;

/// Payout for a tier and timeliness outcome.
pub fn payout(difficulty: Difficulty, on_time: bool) -> Amount {
    let full = match difficulty {
        Difficulty::Easy => Amount::from_units(5),
        Difficulty::Medium => Amount::from_units(15),
        Difficulty::Hard => Amount::from_units(20),
    };
    if on_time { full } else { full.half() }
}

/// Completion at exactly the deadline instant is on time.
pub fn is_on_time(completed_at: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
    completed_at <= deadline
}

/// The share forfeited by finishing late. Zero when on time.
pub fn penalty(difficulty: Difficulty, on_time: bool) -> Amount {
    payout(difficulty, true).saturating_sub(payout(difficulty, on_time))
}
