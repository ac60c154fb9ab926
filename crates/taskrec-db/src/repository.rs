use crate::paging::PagingQueryBuilder;
use crate::{Dialect, Error, ExecutionIncrementer, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use taskrec_core::{Page, PageRequest, SortKey, TaskExecution};

/// Select list for execution rows; row decoding is by ordinal, so the
/// order here is load-bearing.
const EXECUTION_COLUMNS: &str = "EXECUTION_ID, TASK_NAME, START_TIME, END_TIME, EXIT_CODE, \
     EXIT_MESSAGE, ERROR_MESSAGE, EXTERNAL_EXECUTION_ID, PARENT_EXECUTION_ID";

/// Columns callers may sort on. Both repository variants reject anything
/// else before touching the store.
const SORTABLE_COLUMNS: &[&str] = &[
    "EXECUTION_ID",
    "TASK_NAME",
    "START_TIME",
    "END_TIME",
    "EXIT_CODE",
    "EXTERNAL_EXECUTION_ID",
    "PARENT_EXECUTION_ID",
];

/// Store for task execution records. The in-memory and persistent
/// implementations behave identically; only the persistent one survives a
/// process restart.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Persist a new execution with a freshly assigned unique id. The id is
    /// consumed even if the caller discards the returned record.
    async fn create(
        &self,
        task_name: &str,
        start_time: DateTime<Utc>,
        arguments: Vec<String>,
        external_execution_id: Option<String>,
        parent_execution_id: Option<i64>,
    ) -> Result<TaskExecution>;

    /// Apply the completion update. Idempotent for identical values.
    async fn complete(
        &self,
        execution_id: i64,
        end_time: DateTime<Utc>,
        exit_code: i64,
        exit_message: Option<String>,
        error_message: Option<String>,
    ) -> Result<()>;

    async fn get(&self, execution_id: i64) -> Result<TaskExecution>;

    /// Page over all executions, newest first.
    async fn find_all(&self, page: PageRequest) -> Result<Page<TaskExecution>>;

    /// Page over executions of one task. An empty key slice selects the
    /// default order (start time, then id, both descending).
    async fn find_by_name(
        &self,
        task_name: &str,
        page: PageRequest,
        sort_keys: &[SortKey],
    ) -> Result<Page<TaskExecution>>;

    /// Distinct task names, sorted.
    async fn task_names(&self) -> Result<Vec<String>>;

    async fn count_all(&self) -> Result<i64>;

    async fn count_by_name(&self, task_name: &str) -> Result<i64>;

    /// Executions that have not completed yet.
    async fn count_running(&self) -> Result<i64>;
}

pub(crate) fn default_sort_keys() -> Vec<SortKey> {
    vec![SortKey::desc("START_TIME"), SortKey::desc("EXECUTION_ID")]
}

pub(crate) fn ensure_pageable(page: &PageRequest) -> Result<()> {
    if page.size == 0 {
        return Err(Error::QueryBuild("page size must be positive".to_string()));
    }
    Ok(())
}

pub(crate) fn ensure_sortable(sort_keys: &[SortKey]) -> Result<()> {
    for key in sort_keys {
        let known = SORTABLE_COLUMNS
            .iter()
            .any(|column| column.eq_ignore_ascii_case(&key.column));
        if !known {
            return Err(Error::QueryBuild(format!(
                "unknown sort column: {}",
                key.column
            )));
        }
    }
    Ok(())
}

/// Timestamps persist as fixed-width RFC 3339 UTC text so that string
/// order equals time order on every dialect.
pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|err| Error::Corrupted(format!("timestamp {:?}: {}", value, err)))
}

/// Store-backed repository. Every operation borrows a pooled connection
/// for its own duration; multi-statement writes share one transaction.
#[derive(Clone)]
pub struct DbExecutionRepository {
    pool: AnyPool,
    dialect: Dialect,
    table_prefix: String,
    incrementer: ExecutionIncrementer,
}

impl DbExecutionRepository {
    pub fn new(
        pool: AnyPool,
        dialect: Dialect,
        table_prefix: impl Into<String>,
        incrementer: ExecutionIncrementer,
    ) -> Self {
        Self {
            pool,
            dialect,
            table_prefix: table_prefix.into(),
            incrementer,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn incrementer(&self) -> &ExecutionIncrementer {
        &self.incrementer
    }

    fn execution_table(&self) -> String {
        format!("{}EXECUTION", self.table_prefix)
    }

    fn args_table(&self) -> String {
        format!("{}EXECUTION_ARGS", self.table_prefix)
    }

    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|position| self.dialect.placeholder(position))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn fetch_arguments(&self, execution_id: i64) -> Result<Vec<String>> {
        let select = format!(
            "SELECT ARG_VALUE FROM {} WHERE EXECUTION_ID = {} ORDER BY ARG_ORDER",
            self.args_table(),
            self.dialect.placeholder(1)
        );

        let arguments: Vec<String> = sqlx::query_scalar(&select)
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(arguments)
    }

    async fn fetch_page(
        &self,
        task_name: Option<&str>,
        page: PageRequest,
        sort_keys: &[SortKey],
    ) -> Result<Page<TaskExecution>> {
        ensure_pageable(&page)?;

        let keys = if sort_keys.is_empty() {
            default_sort_keys()
        } else {
            sort_keys.to_vec()
        };
        ensure_sortable(&keys)?;

        let mut builder = PagingQueryBuilder::new(self.dialect)
            .select(EXECUTION_COLUMNS)
            .from(self.execution_table())
            .sort_keys(&keys)
            .tie_breaker("EXECUTION_ID");
        if task_name.is_some() {
            builder = builder.filter(format!("TASK_NAME = {}", self.dialect.placeholder(1)));
        }
        let sql = builder.build()?.page_query(&page);

        let mut query = sqlx::query(&sql);
        if let Some(name) = task_name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut execution = row_to_execution(row)?;
            execution.arguments = self.fetch_arguments(execution.execution_id).await?;
            items.push(execution);
        }

        let total = match task_name {
            Some(name) => self.count_by_name(name).await?,
            None => self.count_all().await?,
        };

        Ok(Page::new(items, page, total))
    }
}

#[async_trait]
impl ExecutionRepository for DbExecutionRepository {
    // ========================================================================
    // Writes
    // ========================================================================

    async fn create(
        &self,
        task_name: &str,
        start_time: DateTime<Utc>,
        arguments: Vec<String>,
        external_execution_id: Option<String>,
        parent_execution_id: Option<i64>,
    ) -> Result<TaskExecution> {
        let execution_id = self.incrementer.next_id(&self.pool).await?;
        let execution = TaskExecution::new(
            execution_id,
            task_name.to_string(),
            start_time,
            arguments,
            external_execution_id,
            parent_execution_id,
        );

        let mut tx = self.pool.begin().await?;

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.execution_table(),
            EXECUTION_COLUMNS,
            self.placeholders(9)
        );
        sqlx::query(&insert)
            .bind(execution.execution_id)
            .bind(execution.task_name.as_str())
            .bind(format_time(&execution.start_time))
            .bind(Option::<String>::None)
            .bind(Option::<i64>::None)
            .bind(Option::<String>::None)
            .bind(Option::<String>::None)
            .bind(execution.external_execution_id.clone())
            .bind(execution.parent_execution_id)
            .execute(&mut *tx)
            .await?;

        let insert_arg = format!(
            "INSERT INTO {} (EXECUTION_ID, ARG_ORDER, ARG_VALUE) VALUES ({})",
            self.args_table(),
            self.placeholders(3)
        );
        for (position, argument) in execution.arguments.iter().enumerate() {
            sqlx::query(&insert_arg)
                .bind(execution.execution_id)
                .bind(position as i64)
                .bind(argument.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::info!(
            "Created execution {} for task {}",
            execution.execution_id,
            execution.task_name
        );

        Ok(execution)
    }

    async fn complete(
        &self,
        execution_id: i64,
        end_time: DateTime<Utc>,
        exit_code: i64,
        exit_message: Option<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        let probe = format!(
            "SELECT COUNT(*) FROM {} WHERE EXECUTION_ID = {}",
            self.execution_table(),
            self.dialect.placeholder(1)
        );
        let found: i64 = sqlx::query_scalar(&probe)
            .bind(execution_id)
            .fetch_one(&self.pool)
            .await?;
        if found == 0 {
            return Err(Error::ExecutionNotFound(execution_id));
        }

        let update = format!(
            "UPDATE {} SET END_TIME = {}, EXIT_CODE = {}, EXIT_MESSAGE = {}, \
             ERROR_MESSAGE = {} WHERE EXECUTION_ID = {}",
            self.execution_table(),
            self.dialect.placeholder(1),
            self.dialect.placeholder(2),
            self.dialect.placeholder(3),
            self.dialect.placeholder(4),
            self.dialect.placeholder(5)
        );
        sqlx::query(&update)
            .bind(format_time(&end_time))
            .bind(exit_code)
            .bind(exit_message)
            .bind(error_message)
            .bind(execution_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(
            "Completed execution {} with exit code {}",
            execution_id,
            exit_code
        );

        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    async fn get(&self, execution_id: i64) -> Result<TaskExecution> {
        let select = format!(
            "SELECT {} FROM {} WHERE EXECUTION_ID = {}",
            EXECUTION_COLUMNS,
            self.execution_table(),
            self.dialect.placeholder(1)
        );

        let row = sqlx::query(&select)
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::ExecutionNotFound(execution_id))?;

        let mut execution = row_to_execution(&row)?;
        execution.arguments = self.fetch_arguments(execution_id).await?;

        Ok(execution)
    }

    async fn find_all(&self, page: PageRequest) -> Result<Page<TaskExecution>> {
        self.fetch_page(None, page, &[]).await
    }

    async fn find_by_name(
        &self,
        task_name: &str,
        page: PageRequest,
        sort_keys: &[SortKey],
    ) -> Result<Page<TaskExecution>> {
        self.fetch_page(Some(task_name), page, sort_keys).await
    }

    async fn task_names(&self) -> Result<Vec<String>> {
        let select = format!(
            "SELECT DISTINCT TASK_NAME FROM {} ORDER BY TASK_NAME",
            self.execution_table()
        );

        let names: Vec<String> = sqlx::query_scalar(&select).fetch_all(&self.pool).await?;
        Ok(names)
    }

    // ========================================================================
    // Counts
    // ========================================================================

    async fn count_all(&self) -> Result<i64> {
        let select = format!("SELECT COUNT(*) FROM {}", self.execution_table());

        let count: i64 = sqlx::query_scalar(&select).fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn count_by_name(&self, task_name: &str) -> Result<i64> {
        let select = format!(
            "SELECT COUNT(*) FROM {} WHERE TASK_NAME = {}",
            self.execution_table(),
            self.dialect.placeholder(1)
        );

        let count: i64 = sqlx::query_scalar(&select)
            .bind(task_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_running(&self) -> Result<i64> {
        let select = format!(
            "SELECT COUNT(*) FROM {} WHERE END_TIME IS NULL",
            self.execution_table()
        );

        let count: i64 = sqlx::query_scalar(&select).fetch_one(&self.pool).await?;
        Ok(count)
    }
}

fn row_to_execution(row: &AnyRow) -> Result<TaskExecution> {
    let start_time: String = row.try_get(2)?;
    let end_time: Option<String> = row.try_get(3)?;

    Ok(TaskExecution {
        execution_id: row.try_get(0)?,
        task_name: row.try_get(1)?,
        start_time: parse_time(&start_time)?,
        end_time: end_time.as_deref().map(parse_time).transpose()?,
        exit_code: row.try_get(4)?,
        exit_message: row.try_get(5)?,
        error_message: row.try_get(6)?,
        external_execution_id: row.try_get(7)?,
        parent_execution_id: row.try_get(8)?,
        arguments: Vec::new(),
    })
}
