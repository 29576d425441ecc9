use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Event, EventId, EventQuery, EventStoreError, ObjectHistory, ObjectId, Result, Version,
    store::{EventStore, HistoryStore, HistoryStream},
};

const EVENT_COLUMNS: &str = "id, object_id, version, message_group, state, input_payload, \
     transformed_payload, created, last_updated";

/// Runs the database migrations shared by both PostgreSQL stores.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// PostgreSQL-backed event store.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_event(row: PgRow) -> Result<Event> {
        let group: String = row.try_get("message_group")?;
        let state: String = row.try_get("state")?;

        Ok(Event {
            id: Some(EventId::from_uuid(row.try_get::<Uuid, _>("id")?)),
            object_id: ObjectId::new(row.try_get::<String, _>("object_id")?),
            version: Version::new(row.try_get("version")?),
            group: group.parse()?,
            state: state.parse()?,
            input_payload: row.try_get("input_payload")?,
            transformed_payload: row.try_get("transformed_payload")?,
            created: row.try_get("created")?,
            last_updated: row.try_get("last_updated")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, event), fields(object_id = %event.object_id, version = %event.version))]
    async fn persist(&self, mut event: Event) -> Result<Event> {
        let id = *event.id.get_or_insert_with(EventId::new);

        sqlx::query(
            r#"
            INSERT INTO pipeline_events
                (id, object_id, version, message_group, state, input_payload, transformed_payload, created, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id.as_uuid())
        .bind(event.object_id.as_str())
        .bind(event.version.as_i64())
        .bind(event.group.as_str())
        .bind(event.state.as_str())
        .bind(&event.input_payload)
        .bind(&event.transformed_payload)
        .bind(event.created)
        .bind(event.last_updated)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_object_version")
            {
                metrics::counter!("event_store_duplicate_versions_total").increment(1);
                tracing::warn!("version already stored");
                return EventStoreError::DuplicateVersion {
                    object_id: event.object_id.clone(),
                    version: event.version,
                };
            }
            EventStoreError::Database(e)
        })?;

        Ok(event)
    }

    #[tracing::instrument(skip(self, event), fields(object_id = %event.object_id, version = %event.version, state = %event.state))]
    async fn find_and_merge(&self, event: &Event) -> Result<Event> {
        let id = event.id.ok_or_else(|| EventStoreError::Unpersisted {
            object_id: event.object_id.clone(),
            version: event.version,
        })?;

        let row: Option<PgRow> = sqlx::query(&format!(
            r#"
            UPDATE pipeline_events
            SET state = $2, transformed_payload = $3, last_updated = $4
            WHERE id = $1
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(event.state.as_str())
        .bind(&event.transformed_payload)
        .bind(event.last_updated)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_event(row),
            None => Err(EventStoreError::EventNotFound(id)),
        }
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>> {
        let row: Option<PgRow> = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn get_events_for_object(&self, object_id: &ObjectId) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE object_id = $1 ORDER BY version ASC"
        ))
        .bind(object_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<Event>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM pipeline_events WHERE 1=1");
        let mut param_count = 0;

        if query.object_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND object_id = ${param_count}"));
        }
        if query.states.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND state = ANY(${param_count})"));
        }
        if query.group.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND message_group = ${param_count}"));
        }
        if query.from_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version >= ${param_count}"));
        }
        if query.to_version.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND version <= ${param_count}"));
        }

        sql.push_str(" ORDER BY object_id ASC, version ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(object_id) = query.object_id {
            sqlx_query = sqlx_query.bind(String::from(object_id));
        }
        if let Some(states) = query.states {
            let states: Vec<&'static str> = states.iter().map(|s| s.as_str()).collect();
            sqlx_query = sqlx_query.bind(states);
        }
        if let Some(group) = query.group {
            sqlx_query = sqlx_query.bind(group.as_str());
        }
        if let Some(from_version) = query.from_version {
            sqlx_query = sqlx_query.bind(from_version.as_i64());
        }
        if let Some(to_version) = query.to_version {
            sqlx_query = sqlx_query.bind(to_version.as_i64());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }
}

/// PostgreSQL-backed history store.
///
/// Buffered versions are kept as a JSONB array of events next to the
/// watermark, one row per object id.
#[derive(Clone)]
pub struct PostgresHistoryStore {
    pool: PgPool,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_history(row: PgRow) -> Result<ObjectHistory> {
        let versions_json: serde_json::Value = row.try_get("versions")?;
        let events: Vec<Event> = serde_json::from_value(versions_json)?;

        Ok(ObjectHistory {
            object_id: ObjectId::new(row.try_get::<String, _>("object_id")?),
            last_processed_version: Version::new(row.try_get("last_processed_version")?),
            versions: events
                .into_iter()
                .map(|e| (e.version, e))
                .collect::<BTreeMap<_, _>>(),
            revision: row.try_get("revision")?,
        })
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    #[tracing::instrument(skip(self, history), fields(object_id = %history.object_id))]
    async fn find_and_merge(&self, history: &ObjectHistory) -> Result<ObjectHistory> {
        let started = std::time::Instant::now();
        let versions: Vec<&Event> = history.versions.values().collect();
        let versions_json = serde_json::to_value(&versions)?;

        let row: Option<PgRow> = sqlx::query(
            r#"
            INSERT INTO object_histories (object_id, last_processed_version, versions, revision, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (object_id) DO UPDATE SET
                last_processed_version = EXCLUDED.last_processed_version,
                versions = EXCLUDED.versions,
                revision = EXCLUDED.revision,
                updated_at = EXCLUDED.updated_at
            WHERE object_histories.revision <= EXCLUDED.revision
            RETURNING object_id, last_processed_version, versions, revision
            "#,
        )
        .bind(history.object_id.as_str())
        .bind(history.last_processed_version.as_i64())
        .bind(versions_json)
        .bind(history.revision)
        .fetch_optional(&self.pool)
        .await?;

        metrics::histogram!("event_store_history_merge_seconds")
            .record(started.elapsed().as_secs_f64());

        match row {
            Some(row) => Self::row_to_history(row),
            None => {
                tracing::debug!(revision = history.revision, "ignoring older history copy");
                self.load(&history.object_id).await?.ok_or_else(|| {
                    EventStoreError::Unavailable(format!(
                        "history of object {} vanished during merge",
                        history.object_id
                    ))
                })
            }
        }
    }

    async fn load(&self, object_id: &ObjectId) -> Result<Option<ObjectHistory>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT object_id, last_processed_version, versions, revision
            FROM object_histories
            WHERE object_id = $1
            "#,
        )
        .bind(object_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_history).transpose()
    }

    async fn stream_all(&self) -> Result<HistoryStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT object_id, last_processed_version, versions, revision
            FROM object_histories
            ORDER BY object_id ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|result| match result {
            Ok(row) => Self::row_to_history(row),
            Err(e) => Err(EventStoreError::Database(e)),
        });

        Ok(Box::pin(stream))
    }
}
