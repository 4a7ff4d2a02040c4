//! PgStore: object store backed by Postgres.
//!
//! Every write that must be atomic is a single statement or a single
//! transaction. Sink writes are guarded by a revision column so concurrent
//! workers never lose each other's updates.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::id::IdRef;
use crate::traits::ObjectStore;
use crate::types::{AppliedRecord, SinkCommit, SinkState, SourceMarker};

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

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

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for PgStore {
    async fn get(&self, id: &IdRef) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT body FROM pipe_objects WHERE id = $1",
        )
        .bind(id.uri())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn put(&self, id: &IdRef, body: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipe_objects (id, kind, body, revision)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (id) DO UPDATE
            SET body = EXCLUDED.body,
                revision = pipe_objects.revision + 1,
                updated_at = now()
            "#,
        )
        .bind(id.uri())
        .bind(id.kind())
        .bind(&body)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &IdRef) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pipe_objects WHERE id = $1")
            .bind(id.uri())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn advance_marker(&self, marker_id: &IdRef, parent_id: &IdRef) -> Result<SourceMarker> {
        // Single-statement upsert: concurrent first calls collapse onto one
        // row and every call contributes exactly one increment.
        let row = sqlx::query_as::<_, (String, String, i64)>(
            r#"
            INSERT INTO pipe_source_markers (id, parent_id, version)
            VALUES ($1, $2, 1)
            ON CONFLICT (id) DO UPDATE
            SET version = pipe_source_markers.version + 1,
                updated_at = now()
            RETURNING id, parent_id, version
            "#,
        )
        .bind(marker_id.uri())
        .bind(parent_id.uri())
        .fetch_one(&self.pool)
        .await?;

        marker_from_row(row)
    }

    async fn read_marker(&self, marker_id: &IdRef) -> Result<Option<SourceMarker>> {
        let row = sqlx::query_as::<_, (String, String, i64)>(
            "SELECT id, parent_id, version FROM pipe_source_markers WHERE id = $1",
        )
        .bind(marker_id.uri())
        .fetch_optional(&self.pool)
        .await?;

        row.map(marker_from_row).transpose()
    }

    async fn load_sink(&self, sink_id: &IdRef, source_id: &IdRef) -> Result<SinkState> {
        // One statement so body, revision and ledger come from one snapshot.
        let (body, revision, version, contribution) = sqlx::query_as::<
            _,
            (
                Option<serde_json::Value>,
                Option<i64>,
                Option<i64>,
                Option<serde_json::Value>,
            ),
        >(
            r#"
            SELECT o.body, o.revision, a.version, a.contribution
            FROM (SELECT $1::text AS sink_id) k
            LEFT JOIN pipe_objects o ON o.id = k.sink_id
            LEFT JOIN pipe_applied_versions a
                ON a.sink_id = k.sink_id AND a.source_id = $2
            "#,
        )
        .bind(sink_id.uri())
        .bind(source_id.uri())
        .fetch_one(&self.pool)
        .await?;

        let applied = version.map(|version| AppliedRecord {
            sink_id: sink_id.clone(),
            source_id: source_id.clone(),
            version,
            contribution,
        });

        Ok(SinkState {
            sink_id: sink_id.clone(),
            body,
            revision: revision.unwrap_or(0),
            applied,
        })
    }

    async fn commit_sink(&self, commit: SinkCommit) -> Result<()> {
        let sink_uri = commit.sink_id.uri();
        let mut tx = self.pool.begin().await?;

        let written = if commit.expected_revision == 0 {
            sqlx::query(
                r#"
                INSERT INTO pipe_objects (id, kind, body, revision)
                VALUES ($1, $2, $3, 1)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&sink_uri)
            .bind(commit.sink_id.kind())
            .bind(&commit.body)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE pipe_objects
                SET body = $2, revision = revision + 1, updated_at = now()
                WHERE id = $1 AND revision = $3
                "#,
            )
            .bind(&sink_uri)
            .bind(&commit.body)
            .bind(commit.expected_revision)
            .execute(&mut *tx)
            .await?
        };

        if written.rows_affected() == 0 {
            debug!(sink = %sink_uri, expected = commit.expected_revision, "Sink revision moved");
            return Err(StoreError::Conflict(sink_uri));
        }

        let recorded = sqlx::query(
            r#"
            INSERT INTO pipe_applied_versions (sink_id, source_id, version, contribution)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (sink_id, source_id) DO UPDATE
            SET version = EXCLUDED.version,
                contribution = EXCLUDED.contribution,
                applied_at = now()
            WHERE pipe_applied_versions.version < EXCLUDED.version
            "#,
        )
        .bind(&sink_uri)
        .bind(commit.applied.source_id.uri())
        .bind(commit.applied.version)
        .bind(&commit.applied.contribution)
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            // A newer version landed first; dropping tx rolls back the body.
            return Err(StoreError::Conflict(sink_uri));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn replace_sink(
        &self,
        sink_id: &IdRef,
        body: serde_json::Value,
        ledger: Vec<AppliedRecord>,
    ) -> Result<()> {
        let sink_uri = sink_id.uri();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipe_objects (id, kind, body, revision)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (id) DO UPDATE
            SET body = EXCLUDED.body,
                revision = pipe_objects.revision + 1,
                updated_at = now()
            "#,
        )
        .bind(&sink_uri)
        .bind(sink_id.kind())
        .bind(&body)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pipe_applied_versions WHERE sink_id = $1")
            .bind(&sink_uri)
            .execute(&mut *tx)
            .await?;

        for record in &ledger {
            sqlx::query(
                r#"
                INSERT INTO pipe_applied_versions (sink_id, source_id, version, contribution)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&sink_uri)
            .bind(record.source_id.uri())
            .bind(record.version)
            .bind(&record.contribution)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn marker_from_row((id, parent_id, version): (String, String, i64)) -> Result<SourceMarker> {
    Ok(SourceMarker {
        id: id.parse()?,
        parent_id: parent_id.parse()?,
        version,
    })
}
