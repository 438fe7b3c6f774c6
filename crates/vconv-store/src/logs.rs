//! Audit log repository.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, Postgres, QueryBuilder};
use vconv_models::{LogEntry, LogLevel};

use crate::{CatalogStore, Page, SortOrder, StoreResult, Tx};

const LOG_COLUMNS: &str = "id, task_id, log_time, level, message";

#[derive(Debug, FromRow)]
struct LogRow {
    id: i64,
    task_id: Option<i64>,
    log_time: DateTime<Utc>,
    level: i16,
    message: String,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = crate::StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        Ok(LogEntry {
            id: row.id,
            task_id: row.task_id,
            log_time: row.log_time,
            level: LogLevel::try_from(row.level)?,
            message: row.message,
        })
    }
}

/// Filters for `GET /logs`.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub levels: Vec<LogLevel>,
    pub task_id: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub order: SortOrder,
}

fn push_log_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &LogQuery) {
    builder.push(" WHERE TRUE");
    if !query.levels.is_empty() {
        let codes: Vec<i16> = query.levels.iter().map(|l| i16::from(*l)).collect();
        builder.push(" AND level = ANY(");
        builder.push_bind(codes);
        builder.push(")");
    }
    if let Some(task_id) = query.task_id {
        builder.push(" AND task_id = ");
        builder.push_bind(task_id);
    }
    if let Some(start) = query.start_time {
        builder.push(" AND log_time >= ");
        builder.push_bind(start);
    }
    if let Some(end) = query.end_time {
        builder.push(" AND log_time <= ");
        builder.push_bind(end);
    }
}

impl CatalogStore {
    /// Append an audit record inside an ongoing transaction.
    pub async fn append_log(
        &self,
        tx: &mut Tx,
        task_id: Option<i64>,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO task_logs (task_id, level, message) VALUES ($1, $2, $3)")
            .bind(task_id)
            .bind(i16::from(level))
            .bind(message)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Append an audit record outside any transaction (scan errors,
    /// worker-submitted log lines).
    pub async fn append_log_direct(
        &self,
        task_id: Option<i64>,
        level: LogLevel,
        message: &str,
    ) -> StoreResult<LogEntry> {
        let row = sqlx::query_as::<_, LogRow>(&format!(
            "INSERT INTO task_logs (task_id, level, message) VALUES ($1, $2, $3) \
             RETURNING {LOG_COLUMNS}"
        ))
        .bind(task_id)
        .bind(i16::from(level))
        .bind(message)
        .fetch_one(self.pool())
        .await?;
        LogEntry::try_from(row)
    }

    pub async fn list_logs(
        &self,
        query: &LogQuery,
        page: Page,
    ) -> StoreResult<(Vec<LogEntry>, i64)> {
        let mut count_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM task_logs");
        push_log_filters(&mut count_builder, query);
        let total: i64 = count_builder
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("SELECT {LOG_COLUMNS} FROM task_logs"));
        push_log_filters(&mut builder, query);
        builder.push(format!(" ORDER BY log_time {} LIMIT ", query.order.as_sql()));
        builder.push_bind(page.limit());
        builder.push(" OFFSET ");
        builder.push_bind(page.offset());

        let rows = builder
            .build_query_as::<LogRow>()
            .fetch_all(self.pool())
            .await?;
        let entries = rows
            .into_iter()
            .map(LogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((entries, total))
    }
}
