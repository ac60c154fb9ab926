use chrono::Utc;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use std::sync::Arc;
use taskrec_core::{Order, PageRequest, SortKey};
use taskrec_db::{
    install_drivers, schema, Dialect, Error, ExecutionExplorer, ExecutionIncrementer,
    ExecutionRepository, IncrementerStrategy, PagingQueryBuilder, RepositoryFactory, StoreConfig,
};
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn sqlite_url(dir: &TempDir) -> String {
    format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("taskrec.db").display()
    )
}

async fn sqlite_pool(url: &str) -> AnyPool {
    install_drivers();
    AnyPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .unwrap()
}

async fn prepared_factory(dir: &TempDir) -> RepositoryFactory {
    init_logging();
    let url = sqlite_url(dir);
    let pool = sqlite_pool(&url).await;
    schema::initialize(&pool, Dialect::Sqlite, "TASK_").await.unwrap();
    pool.close().await;

    RepositoryFactory::new(StoreConfig::with_url(url)).unwrap()
}

// ============================================================================
// Repository round trips
// ============================================================================

#[tokio::test]
async fn test_create_then_get_preserves_fields_and_argument_order() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let start = Utc::now();
    let external_id = uuid::Uuid::new_v4().to_string();
    let created = repository
        .create(
            "import-orders",
            start,
            vec!["--source=s3".to_string(), "--retries=3".to_string()],
            Some(external_id.clone()),
            None,
        )
        .await
        .unwrap();

    let fetched = repository.get(created.execution_id).await.unwrap();

    assert_eq!(fetched.task_name, "import-orders");
    assert_eq!(fetched.start_time, start);
    assert_eq!(fetched.arguments, vec!["--source=s3", "--retries=3"]);
    assert_eq!(fetched.external_execution_id, Some(external_id));
    assert!(fetched.is_running());
}

#[tokio::test]
async fn test_parent_execution_is_a_weak_reference() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    // The parent id never has to resolve to a live record.
    let child = repository
        .create("partition-worker", Utc::now(), Vec::new(), None, Some(424242))
        .await
        .unwrap();

    let fetched = repository.get(child.execution_id).await.unwrap();
    assert_eq!(fetched.parent_execution_id, Some(424242));
}

#[tokio::test]
async fn test_complete_sets_final_state_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let created = repository
        .create("flaky-task", Utc::now(), Vec::new(), None, None)
        .await
        .unwrap();

    let end = Utc::now();
    repository
        .complete(
            created.execution_id,
            end,
            1,
            Some("exited".to_string()),
            Some("timeout".to_string()),
        )
        .await
        .unwrap();
    let first = repository.get(created.execution_id).await.unwrap();

    repository
        .complete(
            created.execution_id,
            end,
            1,
            Some("exited".to_string()),
            Some("timeout".to_string()),
        )
        .await
        .unwrap();
    let second = repository.get(created.execution_id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.end_time, Some(end));
    assert_eq!(second.exit_code, Some(1));
    assert_eq!(second.error_message.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_complete_unknown_id_fails_with_not_found() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let result = repository.complete(999, Utc::now(), 0, None, None).await;

    assert!(matches!(result, Err(Error::ExecutionNotFound(999))));
}

#[tokio::test]
async fn test_get_unknown_id_fails_with_not_found() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    assert!(matches!(
        repository.get(7).await,
        Err(Error::ExecutionNotFound(7))
    ));
}

// ============================================================================
// Paging and counts
// ============================================================================

#[tokio::test]
async fn test_find_by_name_pages_cover_the_result_exactly_once() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    for _ in 0..5 {
        repository
            .create("pager", Utc::now(), Vec::new(), None, None)
            .await
            .unwrap();
    }
    repository
        .create("other", Utc::now(), Vec::new(), None, None)
        .await
        .unwrap();

    let keys = vec![SortKey::asc("EXECUTION_ID")];
    let mut ids = Vec::new();
    for number in 0..3 {
        let page = repository
            .find_by_name("pager", PageRequest::of(number, 2), &keys)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        ids.extend(page.items.iter().map(|e| e.execution_id));
    }

    assert_eq!(ids.len(), 5);
    let mut deduped = ids.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 5);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_count_by_name_matches_page_totals() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    for name in ["a", "b", "a", "a"] {
        repository
            .create(name, Utc::now(), Vec::new(), None, None)
            .await
            .unwrap();
    }

    for name in ["a", "b", "missing"] {
        let count = repository.count_by_name(name).await.unwrap();
        let page = repository
            .find_by_name(name, PageRequest::of(0, 10), &[])
            .await
            .unwrap();
        assert_eq!(count, page.total);
        assert_eq!(count, page.items.len() as i64);
    }
}

#[tokio::test]
async fn test_count_running_reflects_completions() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let execution = repository
            .create("lifecycle", Utc::now(), Vec::new(), None, None)
            .await
            .unwrap();
        ids.push(execution.execution_id);
    }
    assert_eq!(repository.count_running().await.unwrap(), 3);

    repository
        .complete(ids[0], Utc::now(), 0, None, None)
        .await
        .unwrap();

    assert_eq!(repository.count_running().await.unwrap(), 2);
    assert_eq!(repository.count_all().await.unwrap(), 3);
}

#[tokio::test]
async fn test_invalid_page_requests_fail_before_the_store() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let zero_size = repository.find_all(PageRequest::of(0, 0)).await;
    assert!(matches!(zero_size, Err(Error::QueryBuild(_))));

    let bad_column = repository
        .find_by_name("x", PageRequest::of(0, 5), &[SortKey::asc("NOPE")])
        .await;
    assert!(matches!(bad_column, Err(Error::QueryBuild(_))));
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_creates_assign_unique_ids() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let repository = Arc::clone(&repository);
        handles.push(tokio::spawn(async move {
            repository
                .create("burst", Utc::now(), Vec::new(), None, None)
                .await
                .unwrap()
                .execution_id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), 16);
    assert_eq!(repository.count_all().await.unwrap(), 16);
}

// ============================================================================
// Incrementer strategies
// ============================================================================

#[tokio::test]
async fn test_sqlite_resolves_the_identity_strategy() {
    let dir = TempDir::new().unwrap();
    init_logging();
    let url = sqlite_url(&dir);
    let pool = sqlite_pool(&url).await;
    schema::initialize(&pool, Dialect::Sqlite, "TASK_").await.unwrap();

    let incrementer = ExecutionIncrementer::resolve(&pool, Dialect::Sqlite, "TASK_SEQ")
        .await
        .unwrap();

    assert_eq!(incrementer.strategy(), IncrementerStrategy::Identity);
}

#[tokio::test]
async fn test_identity_ids_strictly_increase_over_many_calls() {
    let dir = TempDir::new().unwrap();
    init_logging();
    let url = sqlite_url(&dir);
    let pool = sqlite_pool(&url).await;
    schema::initialize(&pool, Dialect::Sqlite, "TASK_").await.unwrap();

    let incrementer = ExecutionIncrementer::resolve(&pool, Dialect::Sqlite, "TASK_SEQ")
        .await
        .unwrap();

    let mut previous = 0;
    for _ in 0..1000 {
        let id = incrementer.next_id(&pool).await.unwrap();
        assert!(id > previous);
        previous = id;
    }
}

#[tokio::test]
async fn test_generic_dialect_falls_back_to_the_counter_table() {
    let dir = TempDir::new().unwrap();
    init_logging();
    let url = sqlite_url(&dir);
    let pool = sqlite_pool(&url).await;

    let incrementer = ExecutionIncrementer::resolve(&pool, Dialect::Generic, "EMU_SEQ")
        .await
        .unwrap();

    assert_eq!(incrementer.strategy(), IncrementerStrategy::CounterTable);

    let mut previous = 0;
    for _ in 0..1000 {
        let id = incrementer.next_id(&pool).await.unwrap();
        assert!(id > previous);
        previous = id;
    }
}

// ============================================================================
// Paging query equivalence across dialect shapes
// ============================================================================

async fn seeded_test_table(pool: &AnyPool, rows: &[(i64, &str)]) {
    sqlx::query("CREATE TABLE TEST_TABLE (ID BIGINT NOT NULL, STRING VARCHAR(10) NOT NULL)")
        .execute(pool)
        .await
        .unwrap();
    for (id, value) in rows {
        sqlx::query("INSERT INTO TEST_TABLE (ID, STRING) VALUES (?, ?)")
            .bind(*id)
            .bind(*value)
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn page_strings(pool: &AnyPool, dialect: Dialect, page: PageRequest) -> Vec<String> {
    let sql = PagingQueryBuilder::new(dialect)
        .select("STRING")
        .from("TEST_TABLE")
        .sort_key("ID", Order::Ascending)
        .build()
        .unwrap()
        .page_query(&page);

    sqlx::query_scalar(&sql).fetch_all(pool).await.unwrap()
}

#[tokio::test]
async fn test_page_shapes_agree_on_the_seed_rows() {
    let dir = TempDir::new().unwrap();
    init_logging();
    let url = sqlite_url(&dir);
    let pool = sqlite_pool(&url).await;
    seeded_test_table(&pool, &[(1, "Spring"), (2, "Cloud"), (3, "Task")]).await;

    // SQLite executes both its own LIMIT/OFFSET shape and the windowed
    // row-numbering shape, so the two can be compared on live rows.
    for dialect in [Dialect::Sqlite, Dialect::SqlServer] {
        let first = page_strings(&pool, dialect, PageRequest::of(0, 2)).await;
        assert_eq!(first, vec!["Spring", "Cloud"], "dialect {}", dialect);

        let second = page_strings(&pool, dialect, PageRequest::of(1, 2)).await;
        assert_eq!(second, vec!["Task"], "dialect {}", dialect);
    }
}

#[tokio::test]
async fn test_page_concatenation_reproduces_the_full_ordered_set() {
    let dir = TempDir::new().unwrap();
    init_logging();
    let url = sqlite_url(&dir);
    let pool = sqlite_pool(&url).await;

    let rows: Vec<(i64, String)> = (1..=10).map(|id| (id, format!("row-{:02}", id))).collect();
    let borrowed: Vec<(i64, &str)> = rows.iter().map(|(id, s)| (*id, s.as_str())).collect();
    seeded_test_table(&pool, &borrowed).await;

    let expected: Vec<String> = rows.iter().map(|(_, s)| s.clone()).collect();

    for dialect in [Dialect::Sqlite, Dialect::SqlServer] {
        for size in 1..=5u32 {
            let mut collected = Vec::new();
            let pages = (10 + size - 1) / size;
            for number in 0..pages {
                let chunk = page_strings(&pool, dialect, PageRequest::of(number, size)).await;
                assert!(chunk.len() <= size as usize);
                collected.extend(chunk);
            }
            assert_eq!(collected, expected, "dialect {} size {}", dialect, size);
        }
    }
}

// ============================================================================
// Factory and explorer
// ============================================================================

#[tokio::test]
async fn test_factory_caches_the_repository_instance() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;

    let first = factory.repository().await.unwrap();
    let second = factory.repository().await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_explorer_composes_repository_queries() {
    let dir = TempDir::new().unwrap();
    let factory = prepared_factory(&dir).await;
    let repository = factory.repository().await.unwrap();

    for name in ["extract", "transform", "extract"] {
        repository
            .create(name, Utc::now(), Vec::new(), None, None)
            .await
            .unwrap();
    }

    let explorer = ExecutionExplorer::new(repository);

    let page = explorer.find_all(PageRequest::of(0, 2)).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);

    assert_eq!(explorer.count_all().await.unwrap(), 3);
    assert_eq!(explorer.count_by_name("extract").await.unwrap(), 2);
    assert_eq!(
        explorer.task_names().await.unwrap(),
        vec!["extract", "transform"]
    );
}
