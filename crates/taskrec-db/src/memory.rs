use crate::repository::{default_sort_keys, ensure_pageable, ensure_sortable, ExecutionRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use taskrec_core::{Order, Page, PageRequest, SortKey, TaskExecution};
use tokio::sync::RwLock;

/// Process-lifetime repository double. Not durable; intended only for
/// testing. Id assignment is serialized through an atomic counter so
/// concurrent callers never share a value.
#[derive(Clone)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<i64, TaskExecution>>>,
    next_id: Arc<AtomicI64>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self {
            executions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    async fn page_of(
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

        let executions = self.executions.read().await;
        let mut matches: Vec<TaskExecution> = executions
            .values()
            .filter(|execution| task_name.map_or(true, |name| execution.task_name == name))
            .cloned()
            .collect();
        drop(executions);

        sort_executions(&mut matches, &keys);

        let total = matches.len() as i64;
        let items = matches
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect();

        Ok(Page::new(items, page, total))
    }
}

impl Default for InMemoryExecutionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(
        &self,
        task_name: &str,
        start_time: DateTime<Utc>,
        arguments: Vec<String>,
        external_execution_id: Option<String>,
        parent_execution_id: Option<i64>,
    ) -> Result<TaskExecution> {
        let execution_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let execution = TaskExecution::new(
            execution_id,
            task_name.to_string(),
            start_time,
            arguments,
            external_execution_id,
            parent_execution_id,
        );

        let mut executions = self.executions.write().await;
        executions.insert(execution_id, execution.clone());

        tracing::debug!("Created execution {} for task {}", execution_id, task_name);

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
        let mut executions = self.executions.write().await;

        let execution = executions
            .get_mut(&execution_id)
            .ok_or(Error::ExecutionNotFound(execution_id))?;
        execution.complete(end_time, exit_code, exit_message, error_message);

        Ok(())
    }

    async fn get(&self, execution_id: i64) -> Result<TaskExecution> {
        let executions = self.executions.read().await;

        executions
            .get(&execution_id)
            .cloned()
            .ok_or(Error::ExecutionNotFound(execution_id))
    }

    async fn find_all(&self, page: PageRequest) -> Result<Page<TaskExecution>> {
        self.page_of(None, page, &[]).await
    }

    async fn find_by_name(
        &self,
        task_name: &str,
        page: PageRequest,
        sort_keys: &[SortKey],
    ) -> Result<Page<TaskExecution>> {
        self.page_of(Some(task_name), page, sort_keys).await
    }

    async fn task_names(&self) -> Result<Vec<String>> {
        let executions = self.executions.read().await;

        let mut names: Vec<String> = executions
            .values()
            .map(|execution| execution.task_name.clone())
            .collect();
        names.sort();
        names.dedup();

        Ok(names)
    }

    async fn count_all(&self) -> Result<i64> {
        let executions = self.executions.read().await;
        Ok(executions.len() as i64)
    }

    async fn count_by_name(&self, task_name: &str) -> Result<i64> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|execution| execution.task_name == task_name)
            .count() as i64)
    }

    async fn count_running(&self) -> Result<i64> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|execution| execution.is_running())
            .count() as i64)
    }
}

/// Order records the way the paging query builder orders rows, including
/// the implicit id tie-breaker.
fn sort_executions(executions: &mut [TaskExecution], sort_keys: &[SortKey]) {
    let mut keys = sort_keys.to_vec();
    let has_id = keys
        .iter()
        .any(|key| key.column.eq_ignore_ascii_case("EXECUTION_ID"));
    if !has_id {
        keys.push(SortKey::asc("EXECUTION_ID"));
    }

    executions.sort_by(|left, right| {
        for key in &keys {
            let ordering = compare_column(left, right, &key.column);
            let ordering = match key.order {
                Order::Ascending => ordering,
                Order::Descending => ordering.reverse(),
            };
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        CmpOrdering::Equal
    });
}

fn compare_column(left: &TaskExecution, right: &TaskExecution, column: &str) -> CmpOrdering {
    match column.to_uppercase().as_str() {
        "EXECUTION_ID" => left.execution_id.cmp(&right.execution_id),
        "TASK_NAME" => left.task_name.cmp(&right.task_name),
        "START_TIME" => left.start_time.cmp(&right.start_time),
        "END_TIME" => left.end_time.cmp(&right.end_time),
        "EXIT_CODE" => left.exit_code.cmp(&right.exit_code),
        "EXTERNAL_EXECUTION_ID" => left.external_execution_id.cmp(&right.external_execution_id),
        "PARENT_EXECUTION_ID" => left.parent_execution_id.cmp(&right.parent_execution_id),
        _ => CmpOrdering::Equal,
    }
}
