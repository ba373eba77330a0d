//! PostgreSQL store backed by sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgExecutor, PgPool};
use uuid::Uuid;

use super::{ClaimOutcome, RefreshTokenStore, RegistryStore, StoreError};
use crate::models::{RefreshTokenRecord, RegistryData, Resource, Role, Service, SuccessorToken};

const REFRESH_TOKEN_COLUMNS: &str = "token_id, token_hash, subject_id, roles, family_id, \
     issued_utc, expiry_utc, consumed_utc, revoked_utc";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_refresh_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM refresh_tokens WHERE token_hash = $1",
            REFRESH_TOKEN_COLUMNS
        );
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&sql)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}

#[async_trait]
impl RegistryStore for PgStore {
    async fn fetch_registry(&self) -> Result<RegistryData, StoreError> {
        // One read-only snapshot transaction so the three reads agree.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let services = sqlx::query_as::<_, Service>(
            "SELECT service_id, service_name, base_address FROM services ORDER BY service_name",
        )
        .fetch_all(&mut *tx)
        .await?;

        let resources = sqlx::query_as::<_, Resource>(
            r#"
            SELECT resource_id, service_id, path_pattern, method_pattern, required_roles
            FROM resources
            ORDER BY service_id, resource_id
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let roles = sqlx::query_as::<_, Role>("SELECT role_name FROM roles ORDER BY role_name")
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(RegistryData {
            services,
            resources,
            roles,
        })
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        insert_record(&self.pool, record).await
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        successor: SuccessorToken,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, StoreError> {
        // The WHERE clause is the claim: PostgreSQL serialises the row
        // update, so only one transaction can see consumed_utc IS NULL. A
        // racing claim blocks on the row lock until this transaction ends,
        // by which time the successor is committed too.
        let sql = format!(
            r#"
            UPDATE refresh_tokens
            SET consumed_utc = $2
            WHERE token_hash = $1
              AND consumed_utc IS NULL
              AND revoked_utc IS NULL
              AND expiry_utc > $2
            RETURNING {}
            "#,
            REFRESH_TOKEN_COLUMNS
        );

        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_as::<_, RefreshTokenRecord>(&sql)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(claimed) = claimed else {
            tx.rollback().await?;
            return Ok(match self.find_refresh_token_by_hash(token_hash).await? {
                Some(record) => ClaimOutcome::classify_unclaimed(record, now),
                None => ClaimOutcome::NotFound,
            });
        };

        // Dropping the transaction on a failed insert rolls the claim back.
        let successor = successor.replacing(&claimed, now);
        insert_record(&mut *tx, &successor).await?;
        tx.commit().await?;

        Ok(ClaimOutcome::Rotated { claimed, successor })
    }

    async fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = NOW() WHERE token_hash = $1 AND revoked_utc IS NULL",
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_subject(&self, subject_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = NOW() WHERE subject_id = $1 AND revoked_utc IS NULL",
        )
        .bind(subject_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_family(&self, family_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_utc = NOW() WHERE family_id = $1 AND revoked_utc IS NULL",
        )
        .bind(family_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_record<'e, E>(executor: E, record: &RefreshTokenRecord) -> Result<(), StoreError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (token_id, token_hash, subject_id, roles, family_id, issued_utc, expiry_utc, consumed_utc, revoked_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(record.token_id)
    .bind(&record.token_hash)
    .bind(&record.subject_id)
    .bind(&record.roles)
    .bind(record.family_id)
    .bind(record.issued_utc)
    .bind(record.expiry_utc)
    .bind(record.consumed_utc)
    .bind(record.revoked_utc)
    .execute(executor)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(record.token_id.to_string())
        }
        e => StoreError::Database(e),
    })?;
    Ok(())
}
