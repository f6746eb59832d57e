//! Game counters exported in Prometheus text format

use std::{
    fmt::Write,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Instant,
};

/// Process-wide counters. Shared behind an `Arc`; every update is a relaxed atomic.
pub struct GameMetrics {
    start_time: Instant,
    rounds_opened: AtomicU64,
    rounds_resolved: AtomicU64,
    wagers_placed: AtomicU64,
    wagers_rejected: AtomicU64,
    wagers_won: AtomicU64,
    wagers_lost: AtomicU64,
    tokens_wagered: AtomicU64,
    tokens_paid_out: AtomicU64,
    settlement_failures: AtomicU64,
    cycle_failures: AtomicU64,
    /// Failed cycles since the last successful one
    consecutive_cycle_failures: AtomicU64,
    http_requests: AtomicU64,
    websocket_connections: AtomicI64,
    events_sent: AtomicU64,
}

impl Default for GameMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GameMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            rounds_opened: AtomicU64::new(0),
            rounds_resolved: AtomicU64::new(0),
            wagers_placed: AtomicU64::new(0),
            wagers_rejected: AtomicU64::new(0),
            wagers_won: AtomicU64::new(0),
            wagers_lost: AtomicU64::new(0),
            tokens_wagered: AtomicU64::new(0),
            tokens_paid_out: AtomicU64::new(0),
            settlement_failures: AtomicU64::new(0),
            cycle_failures: AtomicU64::new(0),
            consecutive_cycle_failures: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            websocket_connections: AtomicI64::new(0),
            events_sent: AtomicU64::new(0),
        }
    }

    pub fn record_round_opened(&self) {
        self.rounds_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round_resolved(&self) {
        self.rounds_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wager_placed(&self, amount: u64) {
        self.wagers_placed.fetch_add(1, Ordering::Relaxed);
        self.tokens_wagered.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn record_wager_rejected(&self) {
        self.wagers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_settlement(&self, won: bool, payout: u64) {
        if won {
            self.wagers_won.fetch_add(1, Ordering::Relaxed);
            self.tokens_paid_out.fetch_add(payout, Ordering::Relaxed);
        } else {
            self.wagers_lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_settlement_failure(&self) {
        self.settlement_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of consecutive failures including this one
    pub fn record_cycle_failure(&self) -> u64 {
        self.cycle_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_cycle_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_cycle_success(&self) {
        self.consecutive_cycle_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_connected(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_disconnected(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds_resolved(&self) -> u64 {
        self.rounds_resolved.load(Ordering::Relaxed)
    }

    pub fn wagers_placed(&self) -> u64 {
        self.wagers_placed.load(Ordering::Relaxed)
    }

    pub fn settlement_failures(&self) -> u64 {
        self.settlement_failures.load(Ordering::Relaxed)
    }

    pub fn cycle_failures(&self) -> u64 {
        self.cycle_failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_cycle_failures(&self) -> u64 {
        self.consecutive_cycle_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Render all counters in Prometheus exposition format
    pub fn to_prometheus_format(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 11] = [
            ("lucky7_rounds_opened_total", "Rounds opened", &self.rounds_opened),
            ("lucky7_rounds_resolved_total", "Rounds fully settled", &self.rounds_resolved),
            ("lucky7_wagers_placed_total", "Wagers accepted", &self.wagers_placed),
            ("lucky7_wagers_rejected_total", "Wagers rejected", &self.wagers_rejected),
            ("lucky7_wagers_won_total", "Wagers settled as wins", &self.wagers_won),
            ("lucky7_wagers_lost_total", "Wagers settled as losses", &self.wagers_lost),
            ("lucky7_tokens_wagered_total", "Tokens debited for wagers", &self.tokens_wagered),
            ("lucky7_tokens_paid_out_total", "Tokens credited as payouts", &self.tokens_paid_out),
            ("lucky7_settlement_failures_total", "Wager settlements that failed", &self.settlement_failures),
            ("lucky7_cycle_failures_total", "Round cycles that failed to open or resolve", &self.cycle_failures),
            ("lucky7_http_requests_total", "HTTP requests served", &self.http_requests),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n\n",
                value.load(Ordering::Relaxed)
            );
        }

        let _ = write!(
            output,
            "# HELP lucky7_websocket_connections_active Open WebSocket sessions\n\
             # TYPE lucky7_websocket_connections_active gauge\n\
             lucky7_websocket_connections_active {}\n\n",
            self.websocket_connections.load(Ordering::Relaxed)
        );
        let _ = write!(
            output,
            "# HELP lucky7_consecutive_cycle_failures Failed round cycles since the last success\n\
             # TYPE lucky7_consecutive_cycle_failures gauge\n\
             lucky7_consecutive_cycle_failures {}\n\n",
            self.consecutive_cycle_failures.load(Ordering::Relaxed)
        );
        let _ = write!(
            output,
            "# HELP lucky7_events_sent_total Events queued to sessions\n\
             # TYPE lucky7_events_sent_total counter\n\
             lucky7_events_sent_total {}\n\n",
            self.events_sent.load(Ordering::Relaxed)
        );
        let _ = write!(
            output,
            "# HELP lucky7_uptime_seconds Process uptime\n\
             # TYPE lucky7_uptime_seconds gauge\n\
             lucky7_uptime_seconds {}\n",
            self.uptime_secs()
        );

        output
    }
}
