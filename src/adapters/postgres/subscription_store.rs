//! PostgreSQL implementation of SubscriptionStore.
//!
//! Conditional updates are `UPDATE .. WHERE id = $1 AND version = $2`. The
//! create path runs in one transaction that locks the user's row, cancels
//! the user's active-like records, and inserts the new one. Reactivating an
//! existing record takes the same lock and cancels the others before the
//! conditional update. The partial
//! unique index on active rows rejects any writer that bypasses that path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::{PlanKey, Subscription, SubscriptionStatus, User};
use crate::ports::{InsertOutcome, SubscriptionStore};

/// Statements `ensure_schema` runs, in order. Each is idempotent.
pub const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id                  TEXT PRIMARY KEY,
        email               TEXT NOT NULL,
        name                TEXT NOT NULL,
        stripe_customer_id  TEXT UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id                      UUID PRIMARY KEY,
        user_id                 TEXT NOT NULL REFERENCES users (id),
        stripe_subscription_id  TEXT NOT NULL UNIQUE,
        stripe_price_id         TEXT,
        plan_key                TEXT,
        status                  TEXT NOT NULL,
        current_period_start    TIMESTAMPTZ NOT NULL,
        current_period_end      TIMESTAMPTZ NOT NULL,
        canceled_at             TIMESTAMPTZ,
        created_at              TIMESTAMPTZ NOT NULL,
        updated_at              TIMESTAMPTZ NOT NULL,
        version                 BIGINT NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS subscriptions_one_active_per_user
        ON subscriptions (user_id) WHERE status = 'active'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS subscriptions_active_period_end
        ON subscriptions (current_period_end) WHERE status = 'active'
    "#,
];

const COLUMNS: &str = "id, user_id, stripe_subscription_id, stripe_price_id, plan_key, status, \
     current_period_start, current_period_end, canceled_at, created_at, updated_at, version";

const UNIQUE_VIOLATION: &str = "23505";

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), DomainError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("apply schema", e))?;
        }
        Ok(())
    }

    /// Distinguishes a lost compare-and-set from a missing record.
    async fn ensure_exists(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM subscriptions WHERE id = $1")
            .bind(subscription.id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("read subscription version", e))?;

        match exists {
            Some(_) => Ok(()),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                "Subscription not found",
            )
            .with_detail("id", subscription.id.to_string())),
        }
    }
}

fn update_query(
    subscription: &Subscription,
    expected_version: i64,
) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    sqlx::query(
        r#"
        UPDATE subscriptions SET
            stripe_price_id = $3,
            plan_key = $4,
            status = $5,
            current_period_start = $6,
            current_period_end = $7,
            canceled_at = $8,
            updated_at = $9,
            version = version + 1
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(subscription.id.as_uuid())
    .bind(expected_version)
    .bind(&subscription.external_price_id)
    .bind(subscription.plan_key.as_ref().map(PlanKey::as_str))
    .bind(subscription.status.as_str())
    .bind(subscription.current_period_start.as_datetime())
    .bind(subscription.current_period_end.as_datetime())
    .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
    .bind(subscription.updated_at.as_datetime())
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    stripe_subscription_id: String,
    stripe_price_id: Option<String>,
    plan_key: Option<String>,
    status: String,
    current_period_start: DateTime<Utc>,
    current_period_end: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status: SubscriptionStatus = row.status.parse().map_err(|_| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid status value: {}", row.status),
            )
        })?;
        let plan_key = row
            .plan_key
            .map(PlanKey::new)
            .transpose()
            .map_err(|e| DomainError::new(ErrorCode::DatabaseError, e.to_string()))?;

        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id)?,
            external_subscription_id: row.stripe_subscription_id,
            external_price_id: row.stripe_price_id,
            plan_key,
            status,
            current_period_start: Timestamp::from_datetime(row.current_period_start),
            current_period_end: Timestamp::from_datetime(row.current_period_end),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
            version: row.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: String,
    stripe_customer_id: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = DomainError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let user = User::new(UserId::new(row.id)?, row.email, row.name);
        Ok(match row.stripe_customer_id {
            Some(customer_id) => user.with_customer_id(customer_id),
            None => user,
        })
    }
}

fn into_subscriptions(rows: Vec<SubscriptionRow>) -> Result<Vec<Subscription>, DomainError> {
    rows.into_iter().map(Subscription::try_from).collect()
}

fn db_error(action: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("Failed to {}: {}", action, err))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == UNIQUE_VIOLATION)
        .unwrap_or(false)
}

fn active_like_statuses() -> Vec<&'static str> {
    SubscriptionStatus::ALL
        .into_iter()
        .filter(SubscriptionStatus::is_active_like)
        .map(|s| s.as_str())
        .collect()
}

async fn find_by_external_id_in(
    tx: &mut Transaction<'_, Postgres>,
    external_subscription_id: &str,
) -> Result<Option<Subscription>, DomainError> {
    let sql = format!("SELECT {} FROM subscriptions WHERE stripe_subscription_id = $1", COLUMNS);
    let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
        .bind(external_subscription_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| db_error("find subscription", e))?;
    row.map(Subscription::try_from).transpose()
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_by_external_id(
        &self,
        external_subscription_id: &str,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!("SELECT {} FROM subscriptions WHERE stripe_subscription_id = $1", COLUMNS);
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(external_subscription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'active' \
             ORDER BY created_at DESC LIMIT 1",
            COLUMNS
        );
        let row: Option<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("find active subscription", e))?;
        row.map(Subscription::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC",
            COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list subscriptions", e))?;
        into_subscriptions(rows)
    }

    async fn find_user_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<User>, DomainError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, name, stripe_customer_id FROM users WHERE stripe_customer_id = $1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find user", e))?;
        row.map(User::try_from).transpose()
    }

    async fn insert_replacing_active(
        &self,
        subscription: &Subscription,
        canceled_at: Timestamp,
    ) -> Result<InsertOutcome, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        // Serializes create paths for the same user.
        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(subscription.user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("lock user", e))?;

        if let Some(existing) =
            find_by_external_id_in(&mut tx, &subscription.external_subscription_id).await?
        {
            return Ok(InsertOutcome::AlreadyExists(existing));
        }

        let cancel_sql = format!(
            "UPDATE subscriptions SET status = 'canceled', canceled_at = $2, updated_at = $2, \
             version = version + 1 \
             WHERE user_id = $1 AND status = ANY($3) RETURNING {}",
            COLUMNS
        );
        let replaced: Vec<SubscriptionRow> = sqlx::query_as(&cancel_sql)
            .bind(subscription.user_id.as_str())
            .bind(canceled_at.as_datetime())
            .bind(active_like_statuses())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("cancel prior subscriptions", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, stripe_subscription_id, stripe_price_id, plan_key, status,
                current_period_start, current_period_end, canceled_at, created_at, updated_at, version
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_str())
        .bind(&subscription.external_subscription_id)
        .bind(&subscription.external_price_id)
        .bind(subscription.plan_key.as_ref().map(PlanKey::as_str))
        .bind(subscription.status.as_str())
        .bind(subscription.current_period_start.as_datetime())
        .bind(subscription.current_period_end.as_datetime())
        .bind(subscription.canceled_at.map(|t| *t.as_datetime()))
        .bind(subscription.created_at.as_datetime())
        .bind(subscription.updated_at.as_datetime())
        .bind(subscription.version)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    external_id = %subscription.external_subscription_id,
                    "Concurrent insert won, reading existing record"
                );
                drop(tx);
                return match self
                    .find_by_external_id(&subscription.external_subscription_id)
                    .await?
                {
                    Some(existing) => Ok(InsertOutcome::AlreadyExists(existing)),
                    None => Err(DomainError::new(
                        ErrorCode::DuplicateActiveSubscription,
                        "User already holds an active subscription",
                    )
                    .with_detail("user_id", subscription.user_id.to_string())),
                };
            }
            Err(e) => return Err(db_error("insert subscription", e)),
        }

        tx.commit().await.map_err(|e| db_error("commit", e))?;

        Ok(InsertOutcome::Inserted {
            replaced: into_subscriptions(replaced)?,
        })
    }

    async fn compare_and_update(
        &self,
        subscription: &Subscription,
        expected_version: i64,
    ) -> Result<bool, DomainError> {
        let result = update_query(subscription, expected_version)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("update subscription", e))?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_exists(subscription).await?;
        Ok(false)
    }

    async fn compare_and_update_replacing_active(
        &self,
        subscription: &Subscription,
        expected_version: i64,
        canceled_at: Timestamp,
    ) -> Result<Option<Vec<Subscription>>, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(subscription.user_id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("lock user", e))?;

        // Others first: the partial unique index is checked per statement.
        let cancel_sql = format!(
            "UPDATE subscriptions SET status = 'canceled', canceled_at = $2, updated_at = $2, \
             version = version + 1 \
             WHERE user_id = $1 AND id <> $4 AND status = ANY($3) RETURNING {}",
            COLUMNS
        );
        let replaced: Vec<SubscriptionRow> = sqlx::query_as(&cancel_sql)
            .bind(subscription.user_id.as_str())
            .bind(canceled_at.as_datetime())
            .bind(active_like_statuses())
            .bind(subscription.id.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| db_error("cancel other subscriptions", e))?;

        let result = update_query(subscription, expected_version)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("update subscription", e))?;

        if result.rows_affected() != 1 {
            drop(tx);
            self.ensure_exists(subscription).await?;
            return Ok(None);
        }

        tx.commit().await.map_err(|e| db_error("commit", e))?;
        Ok(Some(into_subscriptions(replaced)?))
    }

    async fn find_active_ending_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE status = 'active' AND current_period_end < $1 \
             ORDER BY current_period_end",
            COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(cutoff.as_datetime())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("select due subscriptions", e))?;
        into_subscriptions(rows)
    }

    async fn find_active_ending_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<Subscription>, DomainError> {
        let sql = format!(
            "SELECT {} FROM subscriptions WHERE status = 'active' \
             AND current_period_end >= $1 AND current_period_end <= $2 \
             ORDER BY current_period_end",
            COLUMNS
        );
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&sql)
            .bind(from.as_datetime())
            .bind(to.as_datetime())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("select upcoming subscriptions", e))?;
        into_subscriptions(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, plan_key: Option<&str>) -> SubscriptionRow {
        let now = Utc::now();
        SubscriptionRow {
            id: Uuid::new_v4(),
            user_id: "user-1".to_string(),
            stripe_subscription_id: "sub_1".to_string(),
            stripe_price_id: Some("price_month".to_string()),
            plan_key: plan_key.map(str::to_string),
            status: status.to_string(),
            current_period_start: now,
            current_period_end: now,
            canceled_at: None,
            created_at: now,
            updated_at: now,
            version: 3,
        }
    }

    #[test]
    fn row_converts_to_subscription() {
        let sub = Subscription::try_from(row("past_due", Some("monthly"))).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::PastDue);
        assert_eq!(sub.plan_key.unwrap().as_str(), "monthly");
        assert_eq!(sub.version, 3);
    }

    #[test]
    fn row_with_unknown_status_is_rejected() {
        let err = Subscription::try_from(row("paused", None)).unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn active_like_statuses_match_domain() {
        assert_eq!(active_like_statuses(), vec!["trialing", "active", "past_due"]);
    }

    #[test]
    fn schema_has_partial_unique_index_on_active() {
        assert!(SCHEMA
            .iter()
            .any(|s| s.contains("UNIQUE INDEX") && s.contains("WHERE status = 'active'")));
    }
}
