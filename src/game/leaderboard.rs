use crate::{
    errors::StorageError,
    game::{store::GameStore, types::LeaderboardEntry},
};
use std::collections::HashMap;

/// Top `limit` wagers holding a positive streak, each tagged with its owner's display name
pub async fn top_streaks(
    store: &dyn GameStore,
    limit: usize,
) -> Result<Vec<LeaderboardEntry>, StorageError> {
    let wagers = store.top_streaks(limit).await?;

    let mut names: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::with_capacity(wagers.len());
    for wager in wagers {
        if !names.contains_key(&wager.user_id) {
            let name = store
                .get_account(&wager.user_id)
                .await?
                .map(|account| account.display_name)
                .unwrap_or_else(|| wager.user_id.clone());
            names.insert(wager.user_id.clone(), name);
        }
        let username = names.get(&wager.user_id).cloned().unwrap_or_default();

        entries.push(LeaderboardEntry {
            wager_id: wager.id,
            username,
            win_streak: wager.win_streak,
            amount: wager.amount,
            is_lucky7_wager: wager.side.is_jackpot(),
            user_id: wager.user_id,
        });
    }
    Ok(entries)
}
