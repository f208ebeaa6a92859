//! End-to-end tests: worker, dispatcher, SQLite stores and a mock remote warmer

mod common;

use std::sync::Arc;

use prewarm::config::{HttpConfig, WorkerConfig};
use prewarm::queue::{Hook, JobQueue, SqliteJobQueue};
use prewarm::storage::{SqliteConfigStore, SqliteVisitLog, VisitLog};
use prewarm::utils::now_timestamp;
use prewarm::utils::retry::RetryConfig;
use prewarm::warmer::{record_request_args, HeaderList, WarmRequestArgs};
use prewarm::worker::{Dispatcher, Worker};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Env {
    _dir: TempDir,
    store: Arc<SqliteConfigStore>,
    queue: Arc<SqliteJobQueue>,
    log: Arc<SqliteVisitLog>,
    worker: Worker,
    dispatcher: Arc<Dispatcher>,
}

fn env() -> Env {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prewarm.db");
    let store = Arc::new(SqliteConfigStore::new(&path).unwrap());
    let queue = Arc::new(SqliteJobQueue::new(&path).unwrap());
    let log = Arc::new(SqliteVisitLog::new(&path).unwrap());

    let http = HttpConfig {
        request_timeout_secs: 5,
        user_agent: "prewarm-test".to_string(),
        local_rate_limit: 50,
    };
    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), queue.clone(), log.clone(), &http).unwrap(),
    );
    let worker = Worker::new(
        queue.clone(),
        dispatcher.clone(),
        WorkerConfig {
            poll_interval_secs: 1,
            batch_size: 20,
            max_concurrent_jobs: 4,
            retry: RetryConfig::new(3),
        },
    );

    Env {
        _dir: dir,
        store,
        queue,
        log,
        worker,
        dispatcher,
    }
}

fn pending_for(queue: &SqliteJobQueue, hook: Hook) -> Vec<prewarm::queue::QueuedJob> {
    queue
        .pending_jobs()
        .unwrap()
        .into_iter()
        .filter(|j| j.hook == hook.as_str())
        .collect()
}

#[tokio::test]
async fn test_external_interval_dispatches_chunks_to_remote_warmer() {
    let mock_server = MockServer::start().await;
    let records: Vec<_> = (0..12)
        .map(|_| json!({"status": "processed", "time": 0.25, "headers": ["HTTP/1.1 200 OK"]}))
        .collect();
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .expect(2)
        .mount(&mock_server)
        .await;

    let env = env();
    common::configure_site(env.store.as_ref(), "https://example.com", &["/"], 0);
    common::license_domain(env.store.as_ref(), "example.com", &[mock_server.uri()], 1);
    for url in common::urls(12) {
        record_request_args(
            env.store.as_ref(),
            "example.com",
            WarmRequestArgs {
                urls: vec![url],
                headers: HeaderList::from_pairs([("User-Agent", "prewarm-test")]),
            },
        )
        .unwrap();
    }

    let base = now_timestamp();
    env.dispatcher.registry().fix_missing_intervals(base).unwrap();
    assert_eq!(
        pending_for(&env.queue, Hook::ProcessExternalWarmer)[0].run_at,
        base + 3600
    );

    // Due: chunks are enqueued and the interval re-armed on its phase
    let summary = env.worker.run_once(base + 3650).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(pending_for(&env.queue, Hook::WarmUrlsChunk).len(), 2);
    assert_eq!(
        pending_for(&env.queue, Hook::ProcessExternalWarmer)[0].run_at,
        base + 7200
    );

    // Chunk jobs are due immediately
    let summary = env.worker.run_once(base + 3700).await.unwrap();
    assert_eq!(summary.completed, 2);

    let stats = env.log.stats().unwrap();
    assert_eq!(stats.total, 12);
    assert_eq!(stats.success, 12);

    let recent = env.log.recent(1).unwrap();
    assert!(recent[0].outcome.subject().starts_with("127 https://example.com/page-"));
}

#[tokio::test]
async fn test_remote_failure_does_not_fail_the_job() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let env = env();
    common::license_domain(env.store.as_ref(), "example.com", &[mock_server.uri()], 1);
    let chunk = common::chunk(&common::urls(3));
    env.queue
        .enqueue_at(100, Hook::WarmUrlsChunk, &[serde_json::to_value(&chunk).unwrap()])
        .unwrap();

    let summary = env.worker.run_once(100).await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(env.log.stats().unwrap().failed, 3);
    assert_eq!(env.queue.stats().unwrap().failed, 0);
}

#[tokio::test]
async fn test_malformed_job_is_failed_without_retry() {
    let env = env();
    env.queue
        .enqueue_at(100, Hook::WarmUrlsChunk, &[json!("not a chunk")])
        .unwrap();

    let summary = env.worker.run_once(100).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(env.queue.pending_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn test_stop_job_then_start_job() {
    let env = env();
    env.queue.enqueue_at(100, Hook::StopWarmUp, &[]).unwrap();
    env.queue.enqueue_at(101, Hook::StartWarmUp, &[]).unwrap();

    let summary = env.worker.run_once(200).await.unwrap();
    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(env.queue.stats().unwrap().complete, 2);
}
