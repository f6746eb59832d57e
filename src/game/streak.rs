use crate::{
    errors::StorageError,
    game::{store::GameStore, types::Wager},
};

/// Streak for a freshly settled wager.
///
/// A win extends the streak of the user's previous settled wager when that
/// wager was itself a win, otherwise starts at 1. A loss resets to 0.
pub fn next_streak(won: bool, previous: Option<&Wager>) -> u32 {
    if !won {
        return 0;
    }
    match previous {
        Some(prev) if prev.is_win() => prev.win_streak.saturating_add(1),
        _ => 1,
    }
}

/// Looks up the previous settled wager and applies [`next_streak`]
pub struct WinStreakCalculator<'a> {
    store: &'a dyn GameStore,
}

impl<'a> WinStreakCalculator<'a> {
    pub fn new(store: &'a dyn GameStore) -> Self {
        Self { store }
    }

    pub async fn streak_for(&self, wager: &Wager, won: bool) -> Result<u32, StorageError> {
        if !won {
            return Ok(0);
        }
        let previous = self
            .store
            .last_settled_before(&wager.user_id, wager.id)
            .await?;
        Ok(next_streak(won, previous.as_ref()))
    }
}
