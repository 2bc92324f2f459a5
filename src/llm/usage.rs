//! Per-user usage counters
//!
//! Holds the daily request/token/cost totals and the trailing one-minute
//! request window for every user seen by this process. Entries are created
//! lazily on first access and reset lazily when the UTC calendar day changes,
//! so a stale record is never observed by a read. Nothing here is persisted.
//!
//! The store is the only component that mutates usage state. Each operation
//! takes the per-user entry lock once, which makes [`UsageStore::admit`]
//! (check + timestamp) atomic with respect to concurrent requests from the
//! same user.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;

use super::policy::{self, RequestDecision};
use crate::config::LimitsConfig;

/// Length of the rate window in seconds
pub const RATE_WINDOW_SECONDS: i64 = 60;

/// Daily totals for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageRecord {
    pub user_id: String,
    pub date: NaiveDate,
    pub request_count: u64,
    pub token_count: u64,
    pub cost: f64,
}

impl UsageRecord {
    fn new(user_id: &str, today: NaiveDate) -> Self {
        Self {
            user_id: user_id.to_string(),
            date: today,
            request_count: 0,
            token_count: 0,
            cost: 0.0,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if self.date != today {
            self.date = today;
            self.request_count = 0;
            self.token_count = 0;
            self.cost = 0.0;
        }
    }
}

/// Recent request instants for one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateWindow {
    pub user_id: String,
    pub timestamps: Vec<DateTime<Utc>>,
}

impl RateWindow {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            timestamps: Vec::new(),
        }
    }

    /// Drop every instant at least 60 seconds older than `now`
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = Duration::seconds(RATE_WINDOW_SECONDS);
        self.timestamps
            .retain(|instant| now.signed_duration_since(*instant) < window);
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[derive(Debug)]
struct UserUsage {
    record: UsageRecord,
    window: RateWindow,
}

impl UserUsage {
    fn new(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            record: UsageRecord::new(user_id, now.date_naive()),
            window: RateWindow::new(user_id),
        }
    }

    /// Bring both records up to `now`: reset a stale day, prune the window
    fn refresh(&mut self, now: DateTime<Utc>) {
        self.record.roll_over(now.date_naive());
        self.window.prune(now);
    }

    fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            record: self.record.clone(),
            window: self.window.clone(),
        }
    }
}

/// Read-only copy of one user's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub record: UsageRecord,
    pub window: RateWindow,
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub decision: RequestDecision,
    /// State after the attempt (includes the new timestamp when admitted)
    pub snapshot: UsageSnapshot,
}

/// In-memory usage store shared by all requests
#[derive(Debug, Default)]
pub struct UsageStore {
    users: DashMap<String, UserUsage>,
}

impl UsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the user's records if absent and reset a stale day
    pub fn ensure_user(&self, user_id: &str, now: DateTime<Utc>) {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(user_id, now));
        entry.record.roll_over(now.date_naive());
    }

    /// Remove window entries older than 60 seconds
    pub fn prune_window(&self, user_id: &str, now: DateTime<Utc>) {
        if let Some(mut entry) = self.users.get_mut(user_id) {
            entry.window.prune(now);
        }
    }

    /// Prune, then append `now` to the user's window
    pub fn record_request_timestamp(&self, user_id: &str, now: DateTime<Utc>) {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(user_id, now));
        entry.refresh(now);
        entry.window.timestamps.push(now);
    }

    /// Count one served request and add its tokens and cost to today's totals
    pub fn accumulate(
        &self,
        user_id: &str,
        tokens_in: u64,
        tokens_out: u64,
        cost: f64,
        now: DateTime<Utc>,
    ) {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(user_id, now));
        entry.record.roll_over(now.date_naive());

        let record = &mut entry.record;
        record.request_count += 1;
        record.token_count += tokens_in.saturating_add(tokens_out);
        // NaN and negatives contribute nothing
        record.cost += cost.max(0.0);
    }

    /// Current state for reporting. Creates the user like any other read.
    pub fn snapshot(&self, user_id: &str, now: DateTime<Utc>) -> UsageSnapshot {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(user_id, now));
        entry.refresh(now);
        entry.snapshot()
    }

    /// Decide on a new request and, when allowed, record its timestamp.
    ///
    /// Both steps happen under the same entry lock, so two concurrent
    /// requests from one user can never both take the last window slot.
    pub fn admit(&self, user_id: &str, now: DateTime<Utc>, limits: &LimitsConfig) -> Admission {
        let mut entry = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| UserUsage::new(user_id, now));
        entry.refresh(now);

        let decision = policy::decide(
            &entry.window,
            &entry.record,
            limits.rate_limit_per_minute,
            limits.free_daily_request_limit,
            limits.allow_paid_overflow,
        );

        if decision.allowed {
            entry.window.timestamps.push(now);
        }

        Admission {
            decision,
            snapshot: entry.snapshot(),
        }
    }

    /// Drop users with nothing left worth keeping: a record from a previous
    /// day and no requests in the current window. Returns how many were dropped.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let today = now.date_naive();
        let before = self.users.len();
        self.users.retain(|_, usage| {
            usage.window.prune(now);
            usage.record.date == today || !usage.window.is_empty()
        });
        before.saturating_sub(self.users.len())
    }

    /// Administrative reset of all counters. Returns how many users were dropped.
    pub fn clear(&self) -> usize {
        let count = self.users.len();
        self.users.clear();
        count
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, hour, min, sec).unwrap()
    }

    fn limits(per_minute: u32, per_day: u64, paid: bool) -> LimitsConfig {
        LimitsConfig {
            free_daily_request_limit: per_day,
            rate_limit_per_minute: per_minute,
            allow_paid_overflow: paid,
            ..LimitsConfig::default()
        }
    }

    #[test]
    fn test_ensure_user_is_idempotent() {
        let store = UsageStore::new();
        let now = at(9, 0, 0);

        store.ensure_user("u1", now);
        store.accumulate("u1", 10, 5, 0.5, now);
        store.ensure_user("u1", now);

        let snapshot = store.snapshot("u1", now);
        assert_eq!(snapshot.record.request_count, 1);
        assert_eq!(snapshot.record.token_count, 15);
        assert_eq!(store.user_count(), 1);
    }

    #[test]
    fn test_new_day_resets_counters_on_read() {
        let store = UsageStore::new();
        let evening = at(23, 59, 0);
        store.accumulate("u1", 100, 100, 2.0, evening);

        let next_morning = evening + Duration::hours(8);
        let snapshot = store.snapshot("u1", next_morning);

        assert_eq!(snapshot.record.date, next_morning.date_naive());
        assert_eq!(snapshot.record.request_count, 0);
        assert_eq!(snapshot.record.token_count, 0);
        assert_eq!(snapshot.record.cost, 0.0);
    }

    #[test]
    fn test_prune_window_is_exact() {
        let store = UsageStore::new();
        let start = at(10, 0, 0);

        store.record_request_timestamp("u1", start);
        store.record_request_timestamp("u1", start + Duration::seconds(30));
        store.record_request_timestamp("u1", start + Duration::seconds(59));

        let now = start + Duration::seconds(60);
        store.prune_window("u1", now);
        let snapshot = store.snapshot("u1", now);

        assert_eq!(snapshot.window.len(), 2);
        assert!(snapshot
            .window
            .timestamps
            .iter()
            .all(|ts| now.signed_duration_since(*ts) < Duration::seconds(RATE_WINDOW_SECONDS)));
    }

    #[test]
    fn test_accumulate_sums_match_manual_totals() {
        let store = UsageStore::new();
        let now = at(12, 0, 0);
        let calls: [(u64, u64, f64); 4] = [
            (12, 40, 0.0001),
            (7, 3, 0.00002),
            (250, 900, 0.0123),
            (1, 1, 0.0),
        ];

        for (tokens_in, tokens_out, cost) in calls {
            store.accumulate("u1", tokens_in, tokens_out, cost, now);
        }

        let expected_tokens: u64 = calls.iter().map(|(i, o, _)| i + o).sum();
        let expected_cost: f64 = calls.iter().map(|(_, _, c)| c).sum();
        let snapshot = store.snapshot("u1", now);

        assert_eq!(snapshot.record.request_count, calls.len() as u64);
        assert_eq!(snapshot.record.token_count, expected_tokens);
        assert!((snapshot.record.cost - expected_cost).abs() < 1e-12);
    }

    #[test]
    fn test_accumulate_ignores_negative_cost() {
        let store = UsageStore::new();
        let now = at(12, 0, 0);
        store.accumulate("u1", 1, 1, -4.0, now);
        store.accumulate("u1", 1, 1, f64::NAN, now);
        assert_eq!(store.snapshot("u1", now).record.cost, 0.0);
    }

    #[test]
    fn test_admit_records_timestamp_only_when_allowed() {
        let store = UsageStore::new();
        let limits = limits(2, 100, false);
        let now = at(8, 0, 0);

        assert!(store.admit("u1", now, &limits).decision.allowed);
        assert!(store.admit("u1", now, &limits).decision.allowed);

        let third = store.admit("u1", now, &limits);
        assert!(!third.decision.allowed);
        assert!(!third.decision.rate_limit_ok);
        assert_eq!(third.snapshot.window.len(), 2);

        // Window slides open again after a minute
        let later = now + Duration::seconds(60);
        assert!(store.admit("u1", later, &limits).decision.allowed);
    }

    #[test]
    fn test_admit_is_per_user() {
        let store = UsageStore::new();
        let limits = limits(1, 100, false);
        let now = at(8, 0, 0);

        assert!(store.admit("alice", now, &limits).decision.allowed);
        assert!(!store.admit("alice", now, &limits).decision.allowed);
        assert!(store.admit("bob", now, &limits).decision.allowed);
    }

    #[test]
    fn test_sweep_drops_only_stale_idle_users() {
        let store = UsageStore::new();
        let yesterday = at(23, 0, 0);
        store.accumulate("stale", 1, 1, 0.0, yesterday);

        let now = yesterday + Duration::hours(2);
        store.accumulate("fresh", 1, 1, 0.0, now);

        // Yesterday's record, but a request in the current window
        store.accumulate("active", 1, 1, 0.0, yesterday);
        store.record_request_timestamp("active", now - Duration::seconds(5));
        // record_request_timestamp rolled "active" into today; force the stale day back
        if let Some(mut usage) = store.users.get_mut("active") {
            usage.record.date = yesterday.date_naive();
        }

        let dropped = store.sweep(now);

        assert_eq!(dropped, 1);
        assert!(store.users.get("stale").is_none());
        assert!(store.users.get("fresh").is_some());
        assert!(store.users.get("active").is_some());
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = UsageStore::new();
        let now = at(8, 0, 0);
        store.ensure_user("a", now);
        store.ensure_user("b", now);

        assert_eq!(store.clear(), 2);
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_admissions_never_exceed_rate_limit() {
        use std::sync::Arc;

        let store = Arc::new(UsageStore::new());
        let limits = limits(20, 1000, false);
        let now = at(14, 0, 0);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let limits = limits.clone();
            handles.push(tokio::spawn(async move {
                store.admit("burst", now, &limits).decision.allowed
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 20);
        assert_eq!(store.snapshot("burst", now).window.len(), 20);
    }
}
