//! Postgres-backed document store.
//!
//! All collections share one JSONB table:
//!
//! ```sql
//! CREATE TABLE documents (
//!     collection  TEXT        NOT NULL,
//!     id          TEXT        NOT NULL,
//!     revision    BIGINT      NOT NULL CHECK (revision > 0),
//!     body        JSONB       NOT NULL,
//!     updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     PRIMARY KEY (collection, id)
//! );
//! CREATE INDEX documents_body_gin ON documents USING GIN (body jsonb_path_ops);
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Concurrent create of the same id |
//! | Database (other) | Any other | `Unavailable` | Constraint or server failure |
//! | PoolClosed / Io / Other | N/A | `Unavailable` | Connection failures |
//!
//! A conditional write that matches zero rows is reported as `Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::{PgPool, Row};
use tracing::instrument;

use courier_core::ExpectedVersion;

use super::query::{DocumentQuery, SortOrder};
use super::r#trait::{DocumentStore, StoreError, StoredDocument};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT        NOT NULL,
    id          TEXT        NOT NULL,
    revision    BIGINT      NOT NULL CHECK (revision > 0),
    body        JSONB       NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (collection, id)
);
CREATE INDEX IF NOT EXISTS documents_body_gin ON documents USING GIN (body jsonb_path_ops);
"#;

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `documents` table and index if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), err)]
    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, revision, body
            FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        row.map(|r| row_to_document(&r)).transpose()
    }

    #[instrument(skip(self, body), err)]
    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, revision, body)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (collection, id) DO NOTHING
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_if_absent", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, body), err)]
    async fn compare_and_put(
        &self,
        collection: &str,
        id: &str,
        body: JsonValue,
        expected: ExpectedVersion,
    ) -> Result<u64, StoreError> {
        let revision: Option<i64> = match expected {
            ExpectedVersion::Any => sqlx::query_scalar(
                r#"
                INSERT INTO documents (collection, id, revision, body)
                VALUES ($1, $2, 1, $3)
                ON CONFLICT (collection, id)
                DO UPDATE SET
                    body = EXCLUDED.body,
                    revision = documents.revision + 1,
                    updated_at = NOW()
                RETURNING revision
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(&body)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("put", e))?,
            ExpectedVersion::Absent => sqlx::query_scalar(
                r#"
                INSERT INTO documents (collection, id, revision, body)
                VALUES ($1, $2, 1, $3)
                ON CONFLICT (collection, id) DO NOTHING
                RETURNING revision
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(&body)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert", e))?,
            ExpectedVersion::Exact(current) => sqlx::query_scalar(
                r#"
                UPDATE documents
                SET body = $4, revision = revision + 1, updated_at = NOW()
                WHERE collection = $1 AND id = $2 AND revision = $3
                RETURNING revision
                "#,
            )
            .bind(collection)
            .bind(id)
            .bind(i64::try_from(current).unwrap_or(i64::MAX))
            .bind(&body)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update", e))?,
        };

        match revision {
            Some(rev) => Ok(u64::try_from(rev).unwrap_or(0)),
            None => Err(StoreError::Conflict(format!(
                "{collection}/{id}: expected {expected:?}"
            ))),
        }
    }

    #[instrument(skip(self), err)]
    async fn query(
        &self,
        collection: &str,
        query: &DocumentQuery,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let containment = containment_filter(&query.filters);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = match &query.order_by {
            Some((field, order)) => {
                let path: Vec<String> = field.split('.').map(str::to_string).collect();
                let sql = match order {
                    SortOrder::Asc => {
                        r#"
                        SELECT id, revision, body FROM documents
                        WHERE collection = $1 AND body @> $2
                        ORDER BY body #>> $3 ASC NULLS FIRST, id ASC
                        LIMIT $4
                        "#
                    }
                    SortOrder::Desc => {
                        r#"
                        SELECT id, revision, body FROM documents
                        WHERE collection = $1 AND body @> $2
                        ORDER BY body #>> $3 DESC NULLS LAST, id DESC
                        LIMIT $4
                        "#
                    }
                };
                sqlx::query(sql)
                    .bind(collection)
                    .bind(&containment)
                    .bind(path)
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, revision, body FROM documents
                    WHERE collection = $1 AND body @> $2
                    ORDER BY id ASC
                    LIMIT $3
                    "#,
                )
                .bind(collection)
                .bind(&containment)
                .bind(limit)
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("query", e))?;

        rows.iter().map(row_to_document).collect()
    }
}

/// Fold dotted equality filters into one nested object for `@>`.
fn containment_filter(filters: &[(String, JsonValue)]) -> JsonValue {
    let mut root = Map::new();
    for (path, value) in filters {
        let segments: Vec<&str> = path.split('.').collect();
        insert_path(&mut root, &segments, value.clone());
    }
    JsonValue::Object(root)
}

fn insert_path(map: &mut Map<String, JsonValue>, segments: &[&str], value: JsonValue) {
    match segments {
        [] => {}
        [last] => {
            map.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = map
                .entry((*head).to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if !child.is_object() {
                *child = JsonValue::Object(Map::new());
            }
            if let JsonValue::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}

fn row_to_document(row: &sqlx::postgres::PgRow) -> Result<StoredDocument, StoreError> {
    let id: String = row.try_get("id").map_err(|e| map_sqlx_error("decode_row", e))?;
    let revision: i64 = row
        .try_get("revision")
        .map_err(|e| map_sqlx_error("decode_row", e))?;
    let body: JsonValue = row.try_get("body").map_err(|e| map_sqlx_error("decode_row", e))?;
    Ok(StoredDocument {
        id,
        revision: u64::try_from(revision).unwrap_or(0),
        body,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Unavailable(format!("{} failed: {}", operation, other)),
    }
}
