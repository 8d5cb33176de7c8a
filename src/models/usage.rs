use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which of the two usage-counter tables an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CounterKind {
    User,
    Device,
}

/// Owner key of a usage counter; the two variants map onto the two
/// counter tables, which are otherwise schema-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOwner {
    User { user_id: Uuid },
    Device { user_id: Uuid, device_id: String },
}

impl CounterOwner {
    pub fn kind(&self) -> CounterKind {
        match self {
            CounterOwner::User { .. } => CounterKind::User,
            CounterOwner::Device { .. } => CounterKind::Device,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            CounterOwner::User { user_id } | CounterOwner::Device { user_id, .. } => *user_id,
        }
    }
}

/// Snapshot of a counter row after `ensure` or an increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageCounter {
    pub period_start: NaiveDate,
    pub offers_generated: i32,
}

/// Result of an atomic check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// False when the limit check rejected the increment; the count
    /// was not mutated in that case.
    pub allowed: bool,
    pub offers_generated: i32,
    pub period_start: NaiveDate,
}
