use crate::{ExecutionRepository, Result};
use std::sync::Arc;
use taskrec_core::{Page, PageRequest, SortKey, TaskExecution};

/// Read-only facade over the repository for historical queries. Holds no
/// state of its own.
#[derive(Clone)]
pub struct ExecutionExplorer {
    repository: Arc<dyn ExecutionRepository>,
}

impl ExecutionExplorer {
    pub fn new(repository: Arc<dyn ExecutionRepository>) -> Self {
        Self { repository }
    }

    pub async fn get(&self, execution_id: i64) -> Result<TaskExecution> {
        self.repository.get(execution_id).await
    }

    pub async fn find_all(&self, page: PageRequest) -> Result<Page<TaskExecution>> {
        self.repository.find_all(page).await
    }

    pub async fn find_by_name(
        &self,
        task_name: &str,
        page: PageRequest,
        sort_keys: &[SortKey],
    ) -> Result<Page<TaskExecution>> {
        self.repository.find_by_name(task_name, page, sort_keys).await
    }

    pub async fn task_names(&self) -> Result<Vec<String>> {
        self.repository.task_names().await
    }

    pub async fn count_all(&self) -> Result<i64> {
        self.repository.count_all().await
    }

    pub async fn count_by_name(&self, task_name: &str) -> Result<i64> {
        self.repository.count_by_name(task_name).await
    }

    pub async fn count_running(&self) -> Result<i64> {
        self.repository.count_running().await
    }
}
