//! Postgres record store.
//!
//! `find_one_and_update` is a single `UPDATE … WHERE id = (SELECT … FOR
//! UPDATE) RETURNING …` statement, so selection and modification happen
//! under one row lock. Claims add `SKIP LOCKED` so concurrent claimers
//! move on to the next candidate instead of queueing behind each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{Error, Result};
use crate::model::{NewRecord, Record, RecordId};
use crate::store::{Filter, RecordStore, Sort, Update};

const COLUMNS: &str = "id, payload, visible, ack, tries, deleted";

/// SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// One queue's records in the shared `queue_messages` table.
#[derive(Clone)]
pub struct Collection {
    pool: PgPool,
    name: String,
}

impl Collection {
    pub(crate) fn new(pool: PgPool, name: &str) -> Self {
        Self {
            pool,
            name: name.to_string(),
        }
    }
}

/// Append the SQL for `filter`, assuming a preceding `WHERE queue = $n`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {}
        Filter::Available { now } => {
            qb.push(" AND deleted IS NULL AND visible <= ");
            qb.push_bind(*now);
        }
        Filter::InFlight { now } => {
            qb.push(" AND deleted IS NULL AND ack IS NOT NULL AND visible > ");
            qb.push_bind(*now);
        }
        Filter::Lease { ack, now } => {
            qb.push(" AND deleted IS NULL AND ack = ");
            qb.push_bind(ack.clone());
            qb.push(" AND visible > ");
            qb.push_bind(*now);
        }
        Filter::Token { ack } => {
            qb.push(" AND deleted IS NULL AND ack = ");
            qb.push_bind(ack.clone());
        }
        Filter::Done => {
            qb.push(" AND deleted IS NOT NULL");
        }
    }
}

fn push_update(qb: &mut QueryBuilder<'_, Postgres>, update: &Update) {
    match update {
        Update::Claim { ack, visible } => {
            qb.push("ack = ");
            qb.push_bind(ack.clone());
            qb.push(", visible = ");
            qb.push_bind(*visible);
            qb.push(", tries = tries + 1");
        }
        Update::Extend { visible } => {
            qb.push("visible = ");
            qb.push_bind(*visible);
        }
        Update::Resolve { deleted } => {
            qb.push("deleted = ");
            qb.push_bind(*deleted);
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

#[async_trait]
impl RecordStore for Collection {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, record: NewRecord) -> Result<RecordId> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_messages (queue, payload, visible) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&self.name)
        .bind(&record.payload)
        .bind(record.visible)
        .fetch_one(&self.pool)
        .await?;
        Ok(RecordId(id))
    }

    async fn insert_many(&self, records: Vec<NewRecord>) -> Result<Vec<RecordId>> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO queue_messages (queue, payload, visible) VALUES ($1, $2, $3) RETURNING id",
            )
            .bind(&self.name)
            .bind(&record.payload)
            .bind(record.visible)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(RecordId(id));
        }
        tx.commit().await?;

        Ok(ids)
    }

    async fn find_one_and_update(
        &self,
        filter: Filter,
        update: Update,
        sort: Sort,
    ) -> Result<Option<Record>> {
        let mut qb = QueryBuilder::new("UPDATE queue_messages SET ");
        push_update(&mut qb, &update);
        qb.push(" WHERE id = (SELECT id FROM queue_messages WHERE queue = ");
        qb.push_bind(self.name.clone());
        push_filter(&mut qb, &filter);
        if sort == Sort::IdAscending {
            qb.push(" ORDER BY id ASC");
        }
        qb.push(" LIMIT 1 FOR UPDATE");
        if matches!(filter, Filter::Available { .. }) {
            qb.push(" SKIP LOCKED");
        }
        qb.push(") RETURNING ");
        qb.push(COLUMNS);

        let row: Option<RecordRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::DuplicateAck
                } else {
                    Error::Database(e)
                }
            })?;

        Ok(row.map(Record::from))
    }

    async fn count(&self, filter: Filter) -> Result<u64> {
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM queue_messages WHERE queue = ");
        qb.push_bind(self.name.clone());
        push_filter(&mut qb, &filter);

        let n: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(n as u64)
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM queue_messages WHERE queue = ");
        qb.push_bind(self.name.clone());
        push_filter(&mut qb, &filter);

        let done = qb.build().execute(&self.pool).await?;
        Ok(done.rows_affected())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS queue_messages_claim_idx
             ON queue_messages (queue, deleted, visible)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS queue_messages_ack_idx
             ON queue_messages (ack) WHERE ack IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    payload: serde_json::Value,
    visible: DateTime<Utc>,
    ack: Option<String>,
    tries: i32,
    deleted: Option<DateTime<Utc>>,
}

impl From<RecordRow> for Record {
    fn from(row: RecordRow) -> Self {
        Self {
            id: RecordId(row.id),
            payload: row.payload,
            visible: row.visible,
            ack: row.ack,
            tries: row.tries.max(0) as u32,
            deleted: row.deleted,
        }
    }
}
