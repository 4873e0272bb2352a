//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the GraphQL search endpoint and
//! run full worker cycles end-to-end into a SQLite file.

use chrono::Utc;
use serde_json::{json, Value};
use star_sweep::api::GitHubClient;
use star_sweep::config::{
    ApiConfig, Config, CrawlConfig, OutputConfig, PartitionStrategy, RateLimitConfig, RetryConfig,
};
use star_sweep::crawler::{Coordinator, WorkerAssignment};
use star_sweep::storage::{PartitionCount, RunStatus, SqliteStorage, UpsertSink};
use star_sweep::SweepError;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing at the mock server
fn create_test_config(
    endpoint: String,
    strategy: PartitionStrategy,
    boundaries: Vec<u64>,
    db_path: &Path,
) -> Config {
    Config {
        api: ApiConfig {
            endpoint,
            page_size: 2,
            window_cap: 1000,
            timeout_secs: 5,
            ..ApiConfig::default()
        },
        crawl: CrawlConfig {
            strategy,
            boundaries,
            batch_size: 10,
            ..CrawlConfig::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10, // Very short for testing
            max_delay_ms: 50,
            jitter_ms: 0,
        },
        rate_limit: RateLimitConfig::default(),
        output: OutputConfig {
            database_path: db_path.to_string_lossy().into_owned(),
        },
    }
}

fn repo_node(id: i64, owner: &str, name: &str, stars: u64) -> Value {
    json!({
        "databaseId": id,
        "name": name,
        "url": format!("https://github.com/{}/{}", owner, name),
        "createdAt": "2020-01-01T00:00:00Z",
        "stargazerCount": stars,
        "owner": { "login": owner }
    })
}

fn search_body(nodes: Vec<Value>, has_next_page: bool, end_cursor: Option<&str>, total: u64) -> Value {
    json!({
        "data": {
            "search": {
                "repositoryCount": total,
                "pageInfo": { "endCursor": end_cursor, "hasNextPage": has_next_page },
                "nodes": nodes
            },
            "rateLimit": { "remaining": 4999, "resetAt": "2030-01-01T00:00:00Z" }
        }
    })
}

async fn mount_viewer(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("viewer"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "viewer": { "login": "tester" },
                "rateLimit": { "remaining": 5000, "resetAt": "2030-01-01T00:00:00Z" }
            }
        })))
        .mount(server)
        .await;
}

fn coordinator(
    config: Config,
    assignment: WorkerAssignment,
    storage: Arc<Mutex<SqliteStorage>>,
) -> Coordinator<GitHubClient, SqliteStorage> {
    let client = GitHubClient::new(&config.api, "test-token".to_string())
        .expect("Failed to build client");
    Coordinator::new(config, assignment, client, storage, "test-hash")
        .expect("Failed to create coordinator")
}

fn open_storage(path: &Path) -> Arc<Mutex<SqliteStorage>> {
    Arc::new(Mutex::new(
        SqliteStorage::new(path).expect("Failed to open storage"),
    ))
}

#[tokio::test]
async fn test_full_run_paginates_into_database() {
    let mock_server = MockServer::start().await;
    mount_viewer(&mock_server).await;

    // First page is requested without a cursor
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":null"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![
                repo_node(101, "alice", "alpha", 42),
                repo_node(102, "bob", "beta", 7),
            ],
            true,
            Some("cursor-1"),
            3,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("\"after\":\"cursor-1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![repo_node(103, "alice", "gamma", 1)],
            false,
            Some("cursor-2"),
            3,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(
        format!("{}/graphql", mock_server.uri()),
        PartitionStrategy::Ordinal,
        vec![0],
        &db_path,
    );
    let storage = open_storage(&db_path);
    let assignment = WorkerAssignment::new(0, 1, 3).unwrap();

    let report = coordinator(config, assignment, storage.clone())
        .run()
        .await
        .expect("Run failed");

    assert_eq!(report.collected, 3);
    assert_eq!(report.pages, 2);
    assert_eq!(report.unique_owners, 2);
    assert_eq!(report.total_stars, 50);
    assert!(report.succeeded(0.9));

    // Reopen the file to check what was persisted
    drop(storage);
    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_entities().unwrap(), 3);
    assert_eq!(storage.count_samples().unwrap(), 3);

    let alpha = storage.get_entity(101).unwrap().expect("entity 101 stored");
    assert_eq!(alpha.canonical_name, "alice/alpha");
    assert_eq!(alpha.partition_tag, "worker_0");
    assert_eq!(
        storage
            .get_sample_value(101, Utc::now().date_naive())
            .unwrap(),
        Some(42)
    );

    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.collected, 3);
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let mock_server = MockServer::start().await;
    mount_viewer(&mock_server).await;

    // Two 503s, mounted first so they are served before the success
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("searchQuery"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("searchQuery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![repo_node(1, "carol", "one", 3), repo_node(2, "carol", "two", 4)],
            false,
            None,
            2,
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(
        format!("{}/graphql", mock_server.uri()),
        PartitionStrategy::Ordinal,
        vec![0],
        &db_path,
    );
    let storage = open_storage(&db_path);
    let assignment = WorkerAssignment::new(0, 1, 2).unwrap();

    let report = coordinator(config, assignment, storage.clone())
        .run()
        .await
        .expect("Run failed");

    assert_eq!(report.collected, 2);
    assert_eq!(report.slices_completed, 1);
    assert_eq!(report.slices_partial, 0);
    assert_eq!(storage.lock().unwrap().count_entities().unwrap(), 2);
}

#[tokio::test]
async fn test_rejected_token_stops_before_searching() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Bad credentials" })),
        )
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(
        format!("{}/graphql", mock_server.uri()),
        PartitionStrategy::Ordinal,
        vec![0],
        &db_path,
    );
    let storage = open_storage(&db_path);
    let assignment = WorkerAssignment::new(0, 1, 10).unwrap();

    let result = coordinator(config, assignment, storage.clone()).run().await;

    assert!(matches!(result, Err(SweepError::Authentication(_))));

    // Only the credential check went out, and no run was recorded
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(storage.lock().unwrap().get_latest_run().unwrap().is_none());
}

#[tokio::test]
async fn test_secondary_rate_limit_honours_retry_after() {
    let mock_server = MockServer::start().await;
    mount_viewer(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("searchQuery"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("retry-after", "1")
                .set_body_string("You have exceeded a secondary rate limit."),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("searchQuery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![repo_node(5, "dave", "five", 5)],
            false,
            None,
            1,
        )))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");
    let config = create_test_config(
        format!("{}/graphql", mock_server.uri()),
        PartitionStrategy::Ordinal,
        vec![0],
        &db_path,
    );
    let storage = open_storage(&db_path);
    let assignment = WorkerAssignment::new(0, 1, 1).unwrap();

    let started = std::time::Instant::now();
    let report = coordinator(config, assignment, storage)
        .run()
        .await
        .expect("Run failed");

    assert_eq!(report.collected, 1);
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_two_workers_share_one_database() {
    let mock_server = MockServer::start().await;
    mount_viewer(&mock_server).await;

    // Repository 7 shows up in both buckets after gaining stars mid-sweep
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("stars:0..9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![repo_node(7, "erin", "seven", 9), repo_node(8, "erin", "eight", 2)],
            false,
            None,
            2,
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("stars:>=10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![repo_node(7, "erin", "seven", 11), repo_node(9, "frank", "nine", 30)],
            false,
            None,
            2,
        )))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");

    for index in 0..2 {
        let config = create_test_config(
            format!("{}/graphql", mock_server.uri()),
            PartitionStrategy::Predicate,
            vec![0, 10],
            &db_path,
        );
        let assignment = WorkerAssignment::new(index, 2, 4).unwrap();
        let report = coordinator(config, assignment, open_storage(&db_path))
            .run()
            .await
            .expect("Run failed");
        assert_eq!(report.quota, 2);
        assert_eq!(report.collected, 2);
    }

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.count_entities().unwrap(), 3);
    assert_eq!(
        storage.counts_by_partition().unwrap(),
        vec![
            PartitionCount {
                partition_tag: "worker_0".to_string(),
                entities: 2
            },
            PartitionCount {
                partition_tag: "worker_1".to_string(),
                entities: 1
            },
        ]
    );

    // The later observation of the same day wins
    assert_eq!(
        storage
            .get_sample_value(7, Utc::now().date_naive())
            .unwrap(),
        Some(11)
    );
}

#[tokio::test]
async fn test_rerun_leaves_entities_unchanged() {
    let mock_server = MockServer::start().await;
    mount_viewer(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("searchQuery"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(
            vec![
                repo_node(21, "gina", "one", 4),
                repo_node(22, "gina", "two", 8),
                repo_node(23, "hank", "three", 15),
            ],
            false,
            None,
            3,
        )))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stars.db");
    let mut snapshots = Vec::new();

    for _ in 0..2 {
        let config = create_test_config(
            format!("{}/graphql", mock_server.uri()),
            PartitionStrategy::Ordinal,
            vec![0],
            &db_path,
        );
        let assignment = WorkerAssignment::new(0, 1, 3).unwrap();
        let report = coordinator(config, assignment, open_storage(&db_path))
            .run()
            .await
            .expect("Run failed");
        assert_eq!(report.collected, 3);

        let storage = SqliteStorage::new(&db_path).unwrap();
        let entities: Vec<_> = [21, 22, 23]
            .iter()
            .map(|&id| storage.get_entity(id).unwrap().expect("entity stored"))
            .collect();
        snapshots.push((
            storage.count_entities().unwrap(),
            storage.count_samples().unwrap(),
            entities,
        ));
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[1].0, 3);
    assert_eq!(snapshots[1].1, 3);

    let storage = SqliteStorage::new(&db_path).unwrap();
    let run = storage.get_latest_run().unwrap().unwrap();
    assert_eq!(run.id, 2);
    assert_eq!(run.status, RunStatus::Completed);
}
