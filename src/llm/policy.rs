//! Limit policy
//!
//! Pure decisions over a user's usage state: is the per-minute cap free, is
//! the free daily quota left, should an over-quota request be waved through
//! as paid overflow, and which alerts to attach to a reply. Nothing here
//! mutates state or does I/O.
//!
//! Paid overflow only ever waives the daily quota. The per-minute cap is an
//! anti-abuse floor and is enforced regardless of billing.

use serde::Serialize;

use super::usage::{RateWindow, UsageRecord, UsageSnapshot};
use crate::config::LimitsConfig;

/// Fraction of a limit above which a warning is attached
pub const ALERT_USAGE_RATIO: f64 = 0.8;

/// Outcome of the admission check for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestDecision {
    pub allowed: bool,
    pub rate_limit_ok: bool,
    pub daily_limit_ok: bool,
    pub will_use_paid: bool,
}

impl RequestDecision {
    /// Which limit blocked the request. The rate limit is reported first.
    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        if self.allowed {
            None
        } else if !self.rate_limit_ok {
            Some(RejectionReason::RateLimit)
        } else {
            Some(RejectionReason::DailyLimit)
        }
    }
}

/// The specific limit that rejected a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    RateLimit,
    DailyLimit,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::RateLimit => write!(f, "rate_limit"),
            RejectionReason::DailyLimit => write!(f, "daily_limit"),
        }
    }
}

/// True iff the (already pruned) window has room for one more request
pub fn check_rate_limit(window: &RateWindow, max_per_minute: u32) -> bool {
    (window.len() as u64) < u64::from(max_per_minute)
}

/// True iff the free daily quota is not yet used up
pub fn check_daily_limit(record: &UsageRecord, max_per_day: u64) -> bool {
    record.request_count < max_per_day
}

pub fn decide(
    window: &RateWindow,
    record: &UsageRecord,
    max_per_minute: u32,
    max_per_day: u64,
    allow_paid_overflow: bool,
) -> RequestDecision {
    let rate_limit_ok = check_rate_limit(window, max_per_minute);
    let daily_limit_ok = check_daily_limit(record, max_per_day);

    RequestDecision {
        allowed: rate_limit_ok && (daily_limit_ok || allow_paid_overflow),
        rate_limit_ok,
        daily_limit_ok,
        will_use_paid: !daily_limit_ok && allow_paid_overflow,
    }
}

/// Alert severities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Info,
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    DailyQuota,
    RateLimit,
    DailyCost,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
}

/// Alerts for a snapshot, always in the order daily, rate, cost
pub fn alerts(snapshot: &UsageSnapshot, limits: &LimitsConfig) -> Vec<Alert> {
    let mut alerts = Vec::new();

    let requests = snapshot.record.request_count;
    let daily_limit = limits.free_daily_request_limit;
    if requests as f64 > daily_limit as f64 * ALERT_USAGE_RATIO {
        alerts.push(Alert {
            kind: AlertKind::DailyQuota,
            severity: AlertSeverity::Warning,
            message: format!(
                "Daily AI usage at {:.0}% of the free quota ({}/{} requests)",
                percentage(requests as f64, daily_limit as f64),
                requests,
                daily_limit
            ),
        });
    }

    let recent = snapshot.window.len();
    let rate_limit = limits.rate_limit_per_minute;
    if recent as f64 > f64::from(rate_limit) * ALERT_USAGE_RATIO {
        alerts.push(Alert {
            kind: AlertKind::RateLimit,
            severity: AlertSeverity::Warning,
            message: format!(
                "Approaching the rate limit: {}/{} requests in the last minute",
                recent, rate_limit
            ),
        });
    }

    let cost = snapshot.record.cost;
    if cost > limits.daily_cost_alert_threshold {
        alerts.push(Alert {
            kind: AlertKind::DailyCost,
            severity: AlertSeverity::Info,
            message: format!(
                "Daily AI cost ${:.4} is above the ${:.2} alert threshold",
                cost, limits.daily_cost_alert_threshold
            ),
        });
    }

    alerts
}

fn percentage(used: f64, limit: f64) -> f64 {
    if limit > 0.0 {
        used / limit * 100.0
    } else {
        100.0
    }
}

/// Daily totals as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    pub requests: u64,
    pub tokens: u64,
    pub cost: f64,
    pub limit: u64,
    pub remaining: u64,
}

/// Rate window usage as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitUsage {
    pub requests: u64,
    pub limit: u32,
    pub remaining: u64,
}

/// The `usage` block of every response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub daily: DailyUsage,
    pub rate_limit: RateLimitUsage,
}

impl UsageReport {
    pub fn new(snapshot: &UsageSnapshot, limits: &LimitsConfig) -> Self {
        let record = &snapshot.record;
        let recent = snapshot.window.len() as u64;

        Self {
            daily: DailyUsage {
                requests: record.request_count,
                tokens: record.token_count,
                cost: record.cost,
                limit: limits.free_daily_request_limit,
                remaining: limits
                    .free_daily_request_limit
                    .saturating_sub(record.request_count),
            },
            rate_limit: RateLimitUsage {
                requests: recent,
                limit: limits.rate_limit_per_minute,
                remaining: u64::from(limits.rate_limit_per_minute).saturating_sub(recent),
            },
        }
    }
}
