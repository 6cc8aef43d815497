use async_trait::async_trait;
use jiff::Timestamp;
use snip_core::repository::Result;
use snip_core::{
    ConstraintViolation, Metadata, NewUrl, ShortCode, StorageError, UrlEntity, UrlRepository,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, trace};

/// Unique constraint on `urls.short_code`.
pub const SHORT_CODE_CONSTRAINT: &str = "urls_short_code_key";
/// Partial unique index on live `(owner_id, original_url)` rows.
pub const DEDUP_KEY_CONSTRAINT: &str = "urls_owner_url_live_key";

const COLUMNS: &str = "id, short_code, original_url, owner_id, created_at, updated_at, \
                       expires_at, deleted_at, click_count, active, metadata";

/// PostgreSQL implementation of the repository contract.
///
/// Soft delete sets `active = false` and `deleted_at`. Inserts never reuse an
/// existing short code, including soft-deleted rows. Timestamps are stored as
/// microseconds since the Unix epoch.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Operation(format!("migration failed: {e}")))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_micros(ts: Timestamp) -> i64 {
    ts.as_microsecond()
}

fn from_micros(column: &str, value: i64) -> Result<Timestamp> {
    Timestamp::from_microsecond(value).map_err(|e| {
        StorageError::InvalidData(format!("invalid {column} timestamp '{value}': {e}"))
    })
}

/// Classifies a unique violation by the name of the violated constraint.
fn constraint_violation(err: &sqlx::Error) -> Option<ConstraintViolation> {
    let db_err = err.as_database_error()?;
    if !db_err.is_unique_violation() {
        return None;
    }
    match db_err.constraint()? {
        SHORT_CODE_CONSTRAINT => Some(ConstraintViolation::short_code(SHORT_CODE_CONSTRAINT)),
        DEDUP_KEY_CONSTRAINT => Some(ConstraintViolation::dedup_key(DEDUP_KEY_CONSTRAINT)),
        _ => None,
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    if let Some(violation) = constraint_violation(&err) {
        return StorageError::UniqueViolation(violation);
    }

    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn entity_from_row(row: &PgRow) -> Result<UrlEntity> {
    let short_code: String = row.try_get("short_code").map_err(map_sqlx_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(map_sqlx_error)?;
    let updated_at: i64 = row.try_get("updated_at").map_err(map_sqlx_error)?;
    let expires_at: Option<i64> = row.try_get("expires_at").map_err(map_sqlx_error)?;
    let deleted_at: Option<i64> = row.try_get("deleted_at").map_err(map_sqlx_error)?;
    let metadata: Option<Json<Metadata>> = row.try_get("metadata").map_err(map_sqlx_error)?;

    Ok(UrlEntity {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        short_code: ShortCode::new_unchecked(short_code),
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: row.try_get("owner_id").map_err(map_sqlx_error)?,
        created_at: from_micros("created_at", created_at)?,
        expires_at: expires_at
            .map(|v| from_micros("expires_at", v))
            .transpose()?,
        click_count: row.try_get("click_count").map_err(map_sqlx_error)?,
        active: row.try_get("active").map_err(map_sqlx_error)?,
        metadata: metadata.map(|Json(m)| m),
        updated_at: from_micros("updated_at", updated_at)?,
        deleted_at: deleted_at
            .map(|v| from_micros("deleted_at", v))
            .transpose()?,
    })
}

/// Tombstones active rows for the pair whose expiry has passed, freeing the
/// partial unique index for a new live row.
async fn tombstone_expired<'e, E>(
    executor: E,
    original_url: &str,
    owner_id: i64,
    now: i64,
) -> Result<u64>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE urls
        SET active = FALSE, deleted_at = $1, updated_at = $1
        WHERE owner_id = $2
          AND original_url = $3
          AND active
          AND deleted_at IS NULL
          AND expires_at IS NOT NULL
          AND expires_at <= $1
        "#,
    )
    .bind(now)
    .bind(owner_id)
    .bind(original_url)
    .execute(executor)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected())
}

#[async_trait]
impl UrlRepository for PostgresRepository {
    async fn create(&self, url: NewUrl) -> Result<UrlEntity> {
        let now_us = to_micros(Timestamp::now());
        let expires_us = url.expires_at.map(to_micros);

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let expired =
            tombstone_expired(&mut *tx, &url.original_url, url.owner_id, now_us).await?;
        if expired > 0 {
            debug!(owner_id = url.owner_id, expired, "Tombstoned expired rows before insert");
        }

        let row = sqlx::query(
            r#"
            INSERT INTO urls
                (short_code, original_url, owner_id, created_at, updated_at,
                 expires_at, deleted_at, click_count, active, metadata)
            VALUES ($1, $2, $3, $4, $4, $5, NULL, 0, TRUE, $6)
            RETURNING id
            "#,
        )
        .bind(url.short_code.as_str())
        .bind(&url.original_url)
        .bind(url.owner_id)
        .bind(now_us)
        .bind(expires_us)
        .bind(url.metadata.as_ref().map(Json))
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let id: i64 = row.try_get("id").map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;

        // Truncate to stored precision so the returned entity matches what a
        // later read produces.
        let mut entity = url.into_entity(id, from_micros("created_at", now_us)?);
        entity.expires_at = expires_us
            .map(|v| from_micros("expires_at", v))
            .transpose()?;
        trace!(code = %entity.short_code, id, "Inserted entity");
        Ok(entity)
    }

    async fn get_by_short_code(&self, code: &ShortCode) -> Result<Option<UrlEntity>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM urls WHERE short_code = $1"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn get_by_owner_and_url(
        &self,
        original_url: &str,
        owner_id: i64,
    ) -> Result<Option<UrlEntity>> {
        let now = to_micros(Timestamp::now());

        let expired = tombstone_expired(&self.pool, original_url, owner_id, now).await?;
        if expired > 0 {
            debug!(owner_id, expired, "Tombstoned expired rows during dedup lookup");
        }

        let row = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM urls
            WHERE owner_id = $1
              AND original_url = $2
              AND active
              AND deleted_at IS NULL
              AND (expires_at IS NULL OR expires_at > $3)
            LIMIT 1
            "#
        ))
        .bind(owner_id)
        .bind(original_url)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(entity_from_row).transpose()
    }

    async fn update(&self, entity: &UrlEntity) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET expires_at = $1, metadata = $2, updated_at = $3
            WHERE short_code = $4
              AND active
              AND deleted_at IS NULL
            "#,
        )
        .bind(entity.expires_at.map(to_micros))
        .bind(entity.metadata.as_ref().map(Json))
        .bind(to_micros(Timestamp::now()))
        .bind(entity.short_code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete(&self, code: &ShortCode) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET active = FALSE, deleted_at = $1, updated_at = $1
            WHERE short_code = $2
              AND active
              AND deleted_at IS NULL
            "#,
        )
        .bind(to_micros(Timestamp::now()))
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn increment_click_count(&self, code: &ShortCode) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE urls
            SET click_count = click_count + 1
            WHERE short_code = $1
              AND active
              AND deleted_at IS NULL
            "#,
        )
        .bind(code.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UrlEntity>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM urls
            WHERE owner_id = $1
              AND active
              AND deleted_at IS NULL
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(owner_id)
        .bind(to_micros(Timestamp::now()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(entity_from_row).collect()
    }
}
