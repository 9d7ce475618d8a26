//! Clamping for integers derived from time arithmetic.
//!
//! Values such as "hours remaining" are computed from two timestamps and can come out
//! negative (deadline already passed) or absurdly large (bad input). They are clamped
//! into a bounded non-negative range before they reach a payload or storage.

use chrono::{DateTime, Utc};

/// One year.
pub const MAX_HOURS: u32 = 24 * 365;
/// Ten years.
pub const MAX_DAYS: u32 = 3650;

/// Clamp an arbitrary signed count into `0..=max`.
pub fn clamp_count(value: i64, max: u32) -> u32 {
    u32::try_from(value.clamp(0, i64::from(max))).unwrap_or(0)
}

/// Whole hours from `now` until `deadline`, clamped to `0..=MAX_HOURS`.
pub fn hours_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> u32 {
    clamp_count((deadline - now).num_hours(), MAX_HOURS)
}

/// Whole days from `since` until `now`, clamped to `0..=MAX_DAYS`.
pub fn days_since(since: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    clamp_count((now - since).num_days(), MAX_DAYS)
}
