//! Care state machine
//!
//! A bloblet is `ready`, on `cooldown`, or `covered` by a booster window.
//! Charging moves it to `covered` and starts a new cooldown; time does the
//! rest. Status derivation is pure so it can be recomputed on every read.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Highest booster level the rules will ever grant.
pub const MAX_BOOSTER_LEVEL: u8 = 6;

/// Tunables for upkeep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CareRules {
    pub cooldown_secs: i64,
    pub booster_window_secs: i64,
    /// How long past the cooldown end before a bloblet counts as neglected.
    pub overdue_grace_secs: i64,
    pub booster_cap: u8,
    pub fast_forward_enabled: bool,
    pub fast_forward_bursts_per_day: u32,
    /// Points debited per charge. Zero makes charging free.
    pub charge_cost: rust_decimal::Decimal,
}

impl Default for CareRules {
    fn default() -> Self {
        Self {
            cooldown_secs: 4 * 60 * 60,
            booster_window_secs: 60 * 60,
            overdue_grace_secs: 24 * 60 * 60,
            booster_cap: 3,
            fast_forward_enabled: true,
            fast_forward_bursts_per_day: 3,
            charge_cost: rust_decimal::Decimal::ZERO,
        }
    }
}

impl CareRules {
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs)
    }

    pub fn booster_window(&self) -> Duration {
        Duration::seconds(self.booster_window_secs)
    }

    pub fn overdue_grace(&self) -> Duration {
        Duration::seconds(self.overdue_grace_secs)
    }

    /// Level granted while covered.
    pub fn booster_level(&self) -> u8 {
        self.booster_cap.min(MAX_BOOSTER_LEVEL)
    }
}

/// Per-wallet upkeep record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CareState {
    pub last_charged_at: Option<DateTime<Utc>>,
    pub cooldown_ends_at: Option<DateTime<Utc>>,
    pub boosters_active_until: Option<DateTime<Utc>>,
    /// Luck accumulator in `0..=1`, reset by every charge.
    pub drop_acc: f64,
    pub fast_forward_debt_until: Option<DateTime<Utc>>,
    /// UTC day key (`YYYY-MM-DD`) the burst counter belongs to.
    pub fast_forward_burst_day: Option<String>,
    pub fast_forward_bursts_used: u32,
    pub fast_forward_last_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CarePhase {
    Ready,
    Cooldown,
    Covered,
}

/// Derived view of a [`CareState`] at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeStatus {
    pub state: CarePhase,
    pub booster_active: bool,
    pub booster_level: u8,
    pub boosters_active_until: Option<DateTime<Utc>>,
    pub cooldown_active: bool,
    /// Later of the cooldown end and any fast-forward debt.
    pub cooldown_ends_at: Option<DateTime<Utc>>,
    pub overdue: bool,
    pub last_charged_at: Option<DateTime<Utc>>,
    pub drop_acc: f64,
    pub fast_forward_eligible: bool,
    pub fast_forward_bursts_remaining: u32,
}

/// UTC day key used to reset the daily burst counter.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

impl CareState {
    /// Later of `cooldown_ends_at` and `fast_forward_debt_until`.
    pub fn effective_cooldown_end(&self) -> Option<DateTime<Utc>> {
        match (self.cooldown_ends_at, self.fast_forward_debt_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn debt_active(&self, now: DateTime<Utc>) -> bool {
        self.fast_forward_debt_until.is_some_and(|until| until > now)
    }

    /// Bursts left today. A stale day key means the counter has reset.
    pub fn bursts_remaining(&self, now: DateTime<Utc>, rules: &CareRules) -> u32 {
        let used = match &self.fast_forward_burst_day {
            Some(day) if *day == day_key(now) => self.fast_forward_bursts_used,
            _ => 0,
        };
        rules.fast_forward_bursts_per_day.saturating_sub(used)
    }

    pub fn fast_forward_eligible(&self, now: DateTime<Utc>, rules: &CareRules, is_newcomer: bool) -> bool {
        rules.fast_forward_enabled
            && is_newcomer
            && self.bursts_remaining(now, rules) > 0
            && !self.debt_active(now)
    }

    /// Record a successful charge.
    pub fn apply_charge(&mut self, now: DateTime<Utc>, rules: &CareRules) {
        self.last_charged_at = Some(now);
        self.cooldown_ends_at = Some(now + rules.cooldown());
        self.boosters_active_until = Some(now + rules.booster_window());
        self.drop_acc = 0.0;
        if !self.debt_active(now) {
            self.fast_forward_debt_until = None;
        }
    }

    /// Skip the remaining cooldown, consuming one of today's bursts.
    ///
    /// Callers check [`CareState::fast_forward_eligible`] first.
    pub fn apply_fast_forward(&mut self, now: DateTime<Utc>, rules: &CareRules) {
        let today = day_key(now);
        let used = rules.fast_forward_bursts_per_day - self.bursts_remaining(now, rules);
        self.fast_forward_burst_day = Some(today);
        self.fast_forward_bursts_used = used + 1;
        self.fast_forward_last_run_at = Some(now);
        if self.cooldown_ends_at.is_some_and(|end| end > now) {
            self.cooldown_ends_at = Some(now);
        }
    }

    /// Add fractional luck, saturating at 1.
    pub fn accumulate_drop(&mut self, amount: f64) {
        if amount.is_finite() && amount > 0.0 {
            self.drop_acc = (self.drop_acc + amount).min(1.0);
        }
    }
}

/// Derive the charge status of `state` at `now`. Never mutates `state`.
pub fn build_status(
    state: &CareState,
    now: DateTime<Utc>,
    rules: &CareRules,
    is_newcomer: bool,
) -> ChargeStatus {
    let booster_active = state.boosters_active_until.is_some_and(|until| until > now);
    let cooldown_ends_at = state.effective_cooldown_end();
    let cooldown_active = cooldown_ends_at.is_some_and(|end| end > now);

    let phase = if booster_active {
        CarePhase::Covered
    } else if cooldown_active {
        CarePhase::Cooldown
    } else {
        CarePhase::Ready
    };

    let overdue = cooldown_ends_at.is_some_and(|end| end + rules.overdue_grace() < now);

    ChargeStatus {
        state: phase,
        booster_active,
        booster_level: if booster_active { rules.booster_level() } else { 0 },
        boosters_active_until: state.boosters_active_until,
        cooldown_active,
        cooldown_ends_at,
        overdue,
        last_charged_at: state.last_charged_at,
        drop_acc: state.drop_acc,
        fast_forward_eligible: state.fast_forward_eligible(now, rules, is_newcomer),
        fast_forward_bursts_remaining: state.bursts_remaining(now, rules),
    }
}
