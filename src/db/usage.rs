//! Usage counter store.
//!
//! Two schema-identical tables back the monthly quota accounting: one keyed
//! by user, one keyed by (user, device). All operations are parameterized by
//! [`CounterOwner`] so the logic exists once.
//!
//! The atomic check-and-increment prefers a database-side procedure that
//! performs rollover, limit check, and increment under a single row lock.
//! When the procedure is missing from the schema (SQLSTATE 42883) the store
//! drops to a weaker ensure + conditional-update path and keeps using it;
//! that degraded mode is logged and counted, never silent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::models::usage::{CounterKind, CounterOwner, IncrementOutcome, UsageCounter};
use crate::services::retry::{with_retry, RetryPolicy};

/// SQLSTATE for "function does not exist".
const UNDEFINED_FUNCTION: &str = "42883";

const ROLLBACK_RETRY: RetryPolicy = RetryPolicy {
    attempts: 3,
    base_delay: Duration::from_millis(100),
};

struct CounterTable {
    table: &'static str,
    procedure: &'static str,
}

const USER_COUNTERS: CounterTable = CounterTable {
    table: "user_usage_counters",
    procedure: "user_usage_check_and_increment",
};

const DEVICE_COUNTERS: CounterTable = CounterTable {
    table: "device_usage_counters",
    procedure: "device_usage_check_and_increment",
};

fn table_for(kind: CounterKind) -> &'static CounterTable {
    match kind {
        CounterKind::User => &USER_COUNTERS,
        CounterKind::Device => &DEVICE_COUNTERS,
    }
}

pub struct UsageStore {
    pool: PgPool,
    user_procedure_missing: AtomicBool,
    device_procedure_missing: AtomicBool,
}

impl UsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            user_procedure_missing: AtomicBool::new(false),
            device_procedure_missing: AtomicBool::new(false),
        }
    }

    fn procedure_missing_flag(&self, kind: CounterKind) -> &AtomicBool {
        match kind {
            CounterKind::User => &self.user_procedure_missing,
            CounterKind::Device => &self.device_procedure_missing,
        }
    }

    /// Whether the degraded non-procedure increment path is active for `kind`.
    /// Exposed so tests can assert on the capability rather than on logs.
    pub fn fallback_active(&self, kind: CounterKind) -> bool {
        self.procedure_missing_flag(kind).load(Ordering::Relaxed)
    }

    /// Load the counter row for `owner`, lazily creating it at `period_start`
    /// and resetting it in place when the stored period is stale (rollover).
    ///
    /// Concurrent calls for the same owner are safe: creation goes through
    /// `ON CONFLICT DO NOTHING` against the owner-key uniqueness constraint,
    /// and an insert that lost the race falls through to loading the winner.
    pub async fn ensure(
        &self,
        owner: &CounterOwner,
        period_start: NaiveDate,
    ) -> Result<UsageCounter, sqlx::Error> {
        self.insert_if_absent(owner, period_start).await?;

        let counter = match self.fetch(owner).await? {
            Some(c) => c,
            // Row deleted between insert and read; recreate via the same path.
            None => {
                self.insert_if_absent(owner, period_start).await?;
                self.fetch(owner).await?.ok_or(sqlx::Error::RowNotFound)?
            }
        };

        if counter.period_start != period_start {
            tracing::info!(
                kind = %owner.kind(),
                user_id = %owner.user_id(),
                stored_period = %counter.period_start,
                current_period = %period_start,
                "Billing period rolled over, resetting usage counter"
            );
            self.reset(owner, period_start).await?;
            return Ok(UsageCounter {
                period_start,
                offers_generated: 0,
            });
        }

        Ok(counter)
    }

    /// Atomic check-and-increment.
    ///
    /// `limit = None` means unlimited and never rejects. The comparison is
    /// strict `>=` against the pre-increment count, so a limit of N permits
    /// exactly N increments per period.
    pub async fn check_and_increment(
        &self,
        owner: &CounterOwner,
        limit: Option<i32>,
        period_start: NaiveDate,
    ) -> Result<IncrementOutcome, sqlx::Error> {
        let kind = owner.kind();

        if !self.fallback_active(kind) {
            match self.increment_via_procedure(owner, limit, period_start).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if is_undefined_function(&e) => {
                    tracing::warn!(
                        kind = %kind,
                        procedure = table_for(kind).procedure,
                        "Usage increment procedure missing, switching to non-atomic fallback"
                    );
                    self.procedure_missing_flag(kind).store(true, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!("usage_increment_fallback_total").increment(1);
        tracing::warn!(
            kind = %kind,
            user_id = %owner.user_id(),
            "Using degraded non-atomic usage increment path"
        );
        self.increment_via_fallback(owner, limit, period_start).await
    }

    /// Compensating decrement, used when a step after a successful increment
    /// fails. Retries transient store errors with exponential backoff and
    /// gives up quietly after that: this runs inside an error-handling path
    /// and must never replace the original failure with its own.
    pub async fn rollback(&self, owner: &CounterOwner, expected_period: NaiveDate) {
        let result = with_retry(ROLLBACK_RETRY, "usage rollback", || {
            self.try_rollback(owner, expected_period)
        })
        .await;

        if let Err(e) = result {
            tracing::error!(
                kind = %owner.kind(),
                user_id = %owner.user_id(),
                expected_period = %expected_period,
                error = %e,
                "Usage rollback exhausted retries, counter left over-charged by 1"
            );
        }
    }

    async fn try_rollback(
        &self,
        owner: &CounterOwner,
        expected_period: NaiveDate,
    ) -> Result<(), sqlx::Error> {
        let table = table_for(owner.kind()).table;

        let result = match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET offers_generated = offers_generated - 1 \
                     WHERE user_id = $1 AND period_start = $2 AND offers_generated > 0"
                ))
                .bind(user_id)
                .bind(expected_period)
                .execute(&self.pool)
                .await?
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET offers_generated = offers_generated - 1 \
                     WHERE user_id = $1 AND device_id = $2 AND period_start = $3 AND offers_generated > 0"
                ))
                .bind(user_id)
                .bind(device_id)
                .bind(expected_period)
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            // No row at the expected period, or already at zero. A rollover
            // may have raced the original increment; nothing left to undo.
            let stored = self.fetch(owner).await?;
            tracing::warn!(
                kind = %owner.kind(),
                user_id = %owner.user_id(),
                expected_period = %expected_period,
                stored_period = ?stored.as_ref().map(|c| c.period_start),
                stored_count = ?stored.as_ref().map(|c| c.offers_generated),
                "Usage rollback found nothing to decrement, skipping"
            );
        }

        Ok(())
    }

    async fn increment_via_procedure(
        &self,
        owner: &CounterOwner,
        limit: Option<i32>,
        period_start: NaiveDate,
    ) -> Result<IncrementOutcome, sqlx::Error> {
        let procedure = table_for(owner.kind()).procedure;

        let row = match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(&format!(
                    "SELECT allowed, offers_generated, period_start FROM {procedure}($1, $2, $3)"
                ))
                .bind(user_id)
                .bind(period_start)
                .bind(limit)
                .fetch_one(&self.pool)
                .await?
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(&format!(
                    "SELECT allowed, offers_generated, period_start FROM {procedure}($1, $2, $3, $4)"
                ))
                .bind(user_id)
                .bind(device_id)
                .bind(period_start)
                .bind(limit)
                .fetch_one(&self.pool)
                .await?
            }
        };

        Ok(IncrementOutcome {
            allowed: row.try_get("allowed")?,
            offers_generated: row.try_get("offers_generated")?,
            period_start: row.try_get("period_start")?,
        })
    }

    /// Non-atomic fallback: ensure + conditional update. The update is
    /// guarded by an optimistic comparison on the period just read, plus the
    /// limit predicate, so it cannot overshoot a limit on its own row write;
    /// it remains weaker than the procedure under concurrent rollovers.
    async fn increment_via_fallback(
        &self,
        owner: &CounterOwner,
        limit: Option<i32>,
        period_start: NaiveDate,
    ) -> Result<IncrementOutcome, sqlx::Error> {
        let current = self.ensure(owner, period_start).await?;

        if let Some(limit) = limit {
            if current.offers_generated >= limit {
                return Ok(IncrementOutcome {
                    allowed: false,
                    offers_generated: current.offers_generated,
                    period_start: current.period_start,
                });
            }
        }

        let table = table_for(owner.kind()).table;
        let row = match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET offers_generated = offers_generated + 1 \
                     WHERE user_id = $1 AND period_start = $2 \
                       AND ($3::int IS NULL OR offers_generated < $3) \
                     RETURNING offers_generated"
                ))
                .bind(user_id)
                .bind(period_start)
                .bind(limit)
                .fetch_optional(&self.pool)
                .await?
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET offers_generated = offers_generated + 1 \
                     WHERE user_id = $1 AND device_id = $2 AND period_start = $3 \
                       AND ($4::int IS NULL OR offers_generated < $4) \
                     RETURNING offers_generated"
                ))
                .bind(user_id)
                .bind(device_id)
                .bind(period_start)
                .bind(limit)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        match row {
            Some(row) => Ok(IncrementOutcome {
                allowed: true,
                offers_generated: row.try_get("offers_generated")?,
                period_start,
            }),
            // Lost an optimistic race (concurrent rollover or a concurrent
            // increment that consumed the last slot).
            None => {
                tracing::warn!(
                    kind = %owner.kind(),
                    user_id = %owner.user_id(),
                    "Fallback increment lost optimistic race, treating as rejected"
                );
                Ok(IncrementOutcome {
                    allowed: false,
                    offers_generated: current.offers_generated,
                    period_start: current.period_start,
                })
            }
        }
    }

    async fn fetch(&self, owner: &CounterOwner) -> Result<Option<UsageCounter>, sqlx::Error> {
        let table = table_for(owner.kind()).table;

        let row = match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(&format!(
                    "SELECT period_start, offers_generated FROM {table} WHERE user_id = $1"
                ))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(&format!(
                    "SELECT period_start, offers_generated FROM {table} \
                     WHERE user_id = $1 AND device_id = $2"
                ))
                .bind(user_id)
                .bind(device_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.as_ref().map(counter_from_row).transpose()
    }

    async fn insert_if_absent(
        &self,
        owner: &CounterOwner,
        period_start: NaiveDate,
    ) -> Result<(), sqlx::Error> {
        match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(
                    "INSERT INTO user_usage_counters (user_id, period_start, offers_generated) \
                     VALUES ($1, $2, 0) ON CONFLICT (user_id) DO NOTHING",
                )
                .bind(user_id)
                .bind(period_start)
                .execute(&self.pool)
                .await?;
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(
                    "INSERT INTO device_usage_counters (user_id, device_id, period_start, offers_generated) \
                     VALUES ($1, $2, $3, 0) ON CONFLICT (user_id, device_id) DO NOTHING",
                )
                .bind(user_id)
                .bind(device_id)
                .bind(period_start)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn reset(&self, owner: &CounterOwner, period_start: NaiveDate) -> Result<(), sqlx::Error> {
        let table = table_for(owner.kind()).table;

        match owner {
            CounterOwner::User { user_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET period_start = $2, offers_generated = 0 WHERE user_id = $1"
                ))
                .bind(user_id)
                .bind(period_start)
                .execute(&self.pool)
                .await?;
            }
            CounterOwner::Device { user_id, device_id } => {
                sqlx::query(&format!(
                    "UPDATE {table} SET period_start = $3, offers_generated = 0 \
                     WHERE user_id = $1 AND device_id = $2"
                ))
                .bind(user_id)
                .bind(device_id)
                .bind(period_start)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }
}

fn counter_from_row(row: &PgRow) -> Result<UsageCounter, sqlx::Error> {
    Ok(UsageCounter {
        period_start: row.try_get("period_start")?,
        offers_generated: row.try_get("offers_generated")?,
    })
}

fn is_undefined_function(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_FUNCTION)
    )
}
