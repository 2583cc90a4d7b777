//! Task persistence.

use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::{batches, now_string, parse_time, SqliteStore};
use crate::order::{NewTask, StoreError, Task, TaskFilter, TaskStatus, TaskStore, TaskUpdate};
use crate::vendor::{ResponseType, MAX_COST_POINTS};

const TASK_COLUMNS: &str = "id, user_id, batch_id, external_task_id, site, asset_id, source_url, \
     status, cost_points, cost_amount, currency, title, preview_url, download_url, file_name, \
     latest_message, retry_count, response_type, ready_at, created_at, updated_at";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get(7)?;
    let status: TaskStatus = status_str
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;
    let response_type: String = row.get(17)?;
    let ready_at: Option<String> = row.get(18)?;
    let created_at: String = row.get(19)?;
    let updated_at: String = row.get(20)?;

    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        batch_id: row.get(2)?,
        external_task_id: row.get(3)?,
        site: row.get(4)?,
        asset_id: row.get(5)?,
        source_url: row.get(6)?,
        status,
        cost_points: row.get::<_, Option<u64>>(8)?,
        cost_amount: row.get(9)?,
        currency: row.get(10)?,
        title: row.get(11)?,
        preview_url: row.get(12)?,
        download_url: row.get(13)?,
        file_name: row.get(14)?,
        latest_message: row.get(15)?,
        retry_count: row.get::<_, i64>(16)?.max(0) as u32,
        response_type: ResponseType::parse_or_default(&response_type),
        ready_at: ready_at.as_deref().map(parse_time),
        created_at: parse_time(&created_at),
        updated_at: parse_time(&updated_at),
    })
}

pub(super) fn select_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
        params![id],
        row_to_task,
    )
    .optional()
    .map_err(|e| StoreError::Database(e.to_string()))
}

fn write_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE tasks SET batch_id = ?, external_task_id = ?, status = ?, download_url = ?, \
         file_name = ?, latest_message = ?, retry_count = ?, response_type = ?, ready_at = ?, \
         updated_at = ? WHERE id = ?",
        params![
            task.batch_id,
            task.external_task_id,
            task.status.as_str(),
            task.download_url,
            task.file_name,
            task.latest_message,
            task.retry_count as i64,
            task.response_type.as_str(),
            task.ready_at.map(now_string),
            now_string(task.updated_at),
            task.id,
        ],
    )
    .map_err(|e| StoreError::Database(e.to_string()))?;
    Ok(())
}

/// Move a pending task to `processing` inside a commit transaction.
pub(super) fn attach_and_start(
    conn: &Connection,
    mut task: Task,
    batch_id: &str,
) -> Result<Task, StoreError> {
    task.status = TaskStatus::Processing;
    task.batch_id = Some(batch_id.to_string());
    task.updated_at = Utc::now();
    write_task(conn, &task)?;
    Ok(task)
}

fn apply_update(mut task: Task, update: TaskUpdate) -> Result<Task, StoreError> {
    if let Some(next) = update.status {
        if next != task.status {
            if !task.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    task_id: task.id,
                    current: task.status,
                    requested: next,
                });
            }
            if task.ready_at.is_none()
                && matches!(
                    next,
                    TaskStatus::Ready | TaskStatus::Downloading | TaskStatus::Completed
                )
            {
                task.ready_at = Some(Utc::now());
            }
            task.status = next;
        }
    }

    if let Some(id) = update.external_task_id {
        task.external_task_id = Some(id);
    }
    if let Some(url) = update.download_url {
        task.download_url = Some(url);
        task.file_name = update.file_name;
    }
    if let Some(message) = update.latest_message {
        task.latest_message = Some(message);
    }
    if let Some(response_type) = update.response_type {
        task.response_type = response_type;
    }
    task.updated_at = Utc::now();
    Ok(task)
}

impl TaskStore for SqliteStore {
    fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        if let Some(cost) = new.cost_points.filter(|c| *c > MAX_COST_POINTS) {
            return Err(StoreError::InvalidValue(format!(
                "cost of {} points is out of range",
                cost
            )));
        }

        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let task = Task {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: new.user_id,
            batch_id: None,
            external_task_id: None,
            site: new.site,
            asset_id: new.asset_id,
            source_url: new.source_url,
            status: new.status,
            cost_points: new.cost_points,
            cost_amount: new.cost_amount,
            currency: new.currency,
            title: new.title,
            preview_url: new.preview_url,
            download_url: None,
            file_name: None,
            latest_message: new.latest_message,
            retry_count: 0,
            response_type: new.response_type,
            ready_at: None,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            &format!(
                "INSERT INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ),
            params![
                task.id,
                task.user_id,
                task.batch_id,
                task.external_task_id,
                task.site,
                task.asset_id,
                task.source_url,
                task.status.as_str(),
                task.cost_points.map(|c| c as i64),
                task.cost_amount,
                task.currency,
                task.title,
                task.preview_url,
                task.download_url,
                task.file_name,
                task.latest_message,
                task.retry_count as i64,
                task.response_type.as_str(),
                task.ready_at.map(now_string),
                now_string(task.created_at),
                now_string(task.updated_at),
            ],
        )
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(task)
    }

    fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();
        select_task(&conn, id)
    }

    fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id.clone()));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }
        if let Some(ref batch_id) = filter.batch_id {
            conditions.push("batch_id = ?");
            params.push(Box::new(batch_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT {} FROM tasks {} ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
            TASK_COLUMNS, where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_task)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let current = select_task(&tx, id)?.ok_or_else(|| StoreError::task_not_found(id))?;
        let task = apply_update(current, update)?;
        write_task(&tx, &task)?;

        if let Some(ref batch_id) = task.batch_id {
            batches::recompute_in(&tx, batch_id)?;
        }

        tx.commit()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(task)
    }

    fn increment_retry_count(
        &self,
        id: &str,
        max_attempts: u32,
    ) -> Result<Option<Task>, StoreError> {
        let conn = self.conn.lock().unwrap();

        let updated = conn
            .execute(
                "UPDATE tasks SET retry_count = retry_count + 1, updated_at = ?1 \
                 WHERE id = ?2 AND retry_count < ?3",
                params![now_string(Utc::now()), id, max_attempts as i64],
            )
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let task = select_task(&conn, id)?.ok_or_else(|| StoreError::task_not_found(id))?;
        Ok((updated > 0).then_some(task))
    }

    fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row.map_err(|e| StoreError::Database(e.to_string()))?;
            let status = status
                .parse::<TaskStatus>()
                .map_err(|e| StoreError::Database(format!("bad task status: {}", e)))?;
            counts.push((status, count));
        }
        Ok(counts)
    }
}
