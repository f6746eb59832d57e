//! Best-effort push delivery to connected sessions
//!
//! The round engine only sees the [`Notifier`] capability. [`SessionRegistry`]
//! implements it over per-session channels, keyed by the user each session
//! authenticated as.

use crate::{
    game::types::{LeaderboardEntry, RecentRoll, UserId},
    metrics::GameMetrics,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Events pushed to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// New absolute balance after any ledger mutation
    TokenUpdate { tokens: u64 },

    /// Outcome of one settled wager
    RollResult {
        won: bool,
        winnings: u64,
        #[serde(rename = "diceSum")]
        dice_sum: u8,
    },

    /// Last settled wagers of one user, newest first
    RecentRolls { rolls: Vec<RecentRoll> },

    /// Full leaderboard snapshot
    WinStreaks { entries: Vec<LeaderboardEntry> },

    AuthenticationSuccessful {
        #[serde(rename = "userId")]
        user_id: UserId,
    },

    Heartbeat { timestamp: i64 },

    Error { message: String },
}

/// Deliver to one user or to everyone. Never blocks and never fails.
pub trait Notifier: Send + Sync {
    fn send_to_user(&self, user_id: &str, event: GameEvent);

    fn broadcast(&self, event: GameEvent);
}

/// Notifier that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send_to_user(&self, _user_id: &str, _event: GameEvent) {}

    fn broadcast(&self, _event: GameEvent) {}
}

pub type SessionId = u64;

struct Session {
    user_id: Option<UserId>,
    tx: mpsc::UnboundedSender<GameEvent>,
}

/// Live sessions and the user each one is subscribed as
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
    by_user: DashMap<UserId, HashSet<SessionId>>,
    next_id: AtomicU64,
    metrics: Option<Arc<GameMetrics>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            by_user: DashMap::new(),
            next_id: AtomicU64::new(1),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GameMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register an anonymous session. It receives broadcasts until it disconnects.
    pub fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<GameEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(session_id, Session { user_id: None, tx });
        if let Some(metrics) = &self.metrics {
            metrics.websocket_connected();
        }
        debug!(session_id, "Session connected");
        (session_id, rx)
    }

    /// Bind a session to `user_id`, leaving any previous user's room.
    ///
    /// Returns false if the session is unknown.
    pub fn authenticate(&self, session_id: SessionId, user_id: &str) -> bool {
        let previous = match self.sessions.get_mut(&session_id) {
            Some(mut session) => session.user_id.replace(user_id.to_string()),
            None => return false,
        };

        if let Some(previous) = previous {
            self.leave_room(&previous, session_id);
        }
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id);

        info!(session_id, user_id, "🔐 Session authenticated");
        self.send_to_session(session_id, GameEvent::AuthenticationSuccessful {
            user_id: user_id.to_string(),
        });
        true
    }

    pub fn disconnect(&self, session_id: SessionId) {
        if let Some((_, session)) = self.sessions.remove(&session_id) {
            if let Some(user_id) = session.user_id {
                self.leave_room(&user_id, session_id);
            }
            if let Some(metrics) = &self.metrics {
                metrics.websocket_disconnected();
            }
            debug!(session_id, "Session disconnected");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions currently authenticated as `user_id`
    pub fn user_session_count(&self, user_id: &str) -> usize {
        self.by_user.get(user_id).map(|s| s.len()).unwrap_or(0)
    }

    fn leave_room(&self, user_id: &str, session_id: SessionId) {
        let now_empty = match self.by_user.get_mut(user_id) {
            Some(mut sessions) => {
                sessions.remove(&session_id);
                sessions.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_user.remove_if(user_id, |_, sessions| sessions.is_empty());
        }
    }

    /// Push one event to one session, pruning it if its receiver is gone
    pub fn send_to_session(&self, session_id: SessionId, event: GameEvent) {
        let sent = match self.sessions.get(&session_id) {
            Some(session) => session.tx.send(event).is_ok(),
            None => return,
        };
        if sent {
            if let Some(metrics) = &self.metrics {
                metrics.record_event_sent();
            }
        } else {
            debug!(session_id, "Dropping event for closed session");
            self.disconnect(session_id);
        }
    }
}

impl Notifier for SessionRegistry {
    fn send_to_user(&self, user_id: &str, event: GameEvent) {
        let targets: Vec<SessionId> = match self.by_user.get(user_id) {
            Some(sessions) => sessions.iter().copied().collect(),
            None => return,
        };
        for session_id in targets {
            self.send_to_session(session_id, event.clone());
        }
    }

    fn broadcast(&self, event: GameEvent) {
        let targets: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for session_id in targets {
            self.send_to_session(session_id, event.clone());
        }
    }
}
