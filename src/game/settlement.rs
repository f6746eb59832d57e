//! Outcome and payout rules for a resolved round

use crate::{
    errors::StorageError,
    game::{
        store::GameStore,
        streak::WinStreakCalculator,
        types::{Round, Settlement, Wager, WagerOutcome},
    },
};
use chrono::{DateTime, Utc};

/// Decides outcome, payout and streak for wagers of a resolved round
#[derive(Debug, Clone, Copy)]
pub struct WagerResolver {
    jackpot_multiplier: u64,
}

impl WagerResolver {
    pub fn new(jackpot_multiplier: u64) -> Self {
        Self { jackpot_multiplier }
    }

    /// A wager wins iff its side matches the round's jackpot flag.
    ///
    /// Jackpot wins pay `multiplier × amount`, non-jackpot wins return the
    /// stake, losses pay nothing.
    pub fn outcome(&self, wager: &Wager, round: &Round) -> (WagerOutcome, u64) {
        if wager.side.is_jackpot() != round.is_jackpot {
            return (WagerOutcome::Lost, 0);
        }
        let payout = if round.is_jackpot {
            wager.amount.saturating_mul(self.jackpot_multiplier)
        } else {
            wager.amount
        };
        (WagerOutcome::Won, payout)
    }

    /// Full settlement record for one Pending wager
    pub async fn settle(
        &self,
        store: &dyn GameStore,
        wager: &Wager,
        round: &Round,
        settled_at: DateTime<Utc>,
    ) -> Result<Settlement, StorageError> {
        let (outcome, payout) = self.outcome(wager, round);
        let win_streak = WinStreakCalculator::new(store)
            .streak_for(wager, outcome == WagerOutcome::Won)
            .await?;

        Ok(Settlement {
            wager_id: wager.id,
            user_id: wager.user_id.clone(),
            outcome,
            win_streak,
            payout,
            settled_at,
        })
    }
}
