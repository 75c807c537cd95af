//! Integration tests for the harvester
//!
//! These tests use wiremock to serve a fake MediaWiki `api.php` and exercise
//! the HTTP source and the full harvest cycle end-to-end.

use snpedia_harvest::config::{Config, SourceConfig, StorageConfig, TimingConfig, UserAgentConfig};
use snpedia_harvest::engine::{Engine, JobOutcome};
use snpedia_harvest::storage::{read_count, SqliteStore, Store};
use snpedia_harvest::{ContentSource, CrawlJob, MediaWikiSource, SilentObserver, SourceError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Matches listing requests that carry no continuation token
struct NoCursor;

impl Match for NoCursor {
    fn matches(&self, request: &Request) -> bool {
        !request.url.query_pairs().any(|(key, _)| key == "cmcontinue")
    }
}

fn create_test_user_agent() -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: "TestHarvester".to_string(),
        crawler_version: "1.0".to_string(),
        contact_url: "https://example.com/about".to_string(),
        contact_email: "admin@example.com".to_string(),
    }
}

fn source_config(server: &MockServer) -> SourceConfig {
    SourceConfig {
        api_url: format!("{}/api.php", server.uri()),
        page_limit: 500,
        timeout_secs: 5,
    }
}

fn create_source(server: &MockServer) -> MediaWikiSource {
    MediaWikiSource::new(&source_config(server), &create_test_user_agent())
        .expect("Failed to build source")
}

/// Creates a test configuration pointing at the mock server
fn create_test_config(server: &MockServer, dir: &Path) -> Config {
    Config {
        storage: StorageConfig {
            database_path: dir.join("snpedia.db").display().to_string(),
            error_log_path: dir.join("errors.log").display().to_string(),
        },
        source: source_config(server),
        user_agent: create_test_user_agent(),
        timing: TimingConfig {
            retry_backoff_ms: 10,
            chunk_delay_ms: 0,
            poll_interval_ms: 5,
            max_list_retries: Some(3),
            max_page_attempts: 3,
            skip_completed: true,
        },
        jobs: vec![CrawlJob {
            expected_total: 5,
            batch_size: 2,
            ..CrawlJob::snps()
        }],
    }
}

fn json(body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

#[tokio::test]
async fn test_list_first_page_normalizes_titles() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .and(query_param("list", "categorymembers"))
        .and(query_param("cmtitle", "Category:Is_a_snp"))
        .and(query_param("cmlimit", "500"))
        .and(NoCursor)
        .and(header(
            "user-agent",
            "TestHarvester/1.0 (+https://example.com/about; admin@example.com)",
        ))
        .respond_with(json(serde_json::json!({
            "batchcomplete": "",
            "continue": { "cmcontinue": "page|52533|1234", "continue": "-||" },
            "query": { "categorymembers": [
                { "pageid": 1, "ns": 0, "title": "Rs53576" },
                { "pageid": 2, "ns": 0, "title": "I 3000001" }
            ]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let page = source
        .list_category_members("Category:Is_a_snp", None)
        .await
        .unwrap();

    assert_eq!(page.members, vec!["Rs53576", "I_3000001"]);
    assert_eq!(page.next_cursor.as_deref(), Some("page|52533|1234"));
}

#[tokio::test]
async fn test_list_last_page_has_no_cursor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .and(query_param("cmcontinue", "page|52533|1234"))
        .respond_with(json(serde_json::json!({
            "batchcomplete": "",
            "query": { "categorymembers": [ { "pageid": 3, "ns": 0, "title": "Rs99" } ] }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let page = source
        .list_category_members("Category:Is_a_snp", Some("page|52533|1234"))
        .await
        .unwrap();

    assert_eq!(page.members, vec!["Rs99"]);
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn test_fetch_batch_maps_normalized_and_missing_titles() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .and(query_param("prop", "revisions"))
        .and(query_param("rvprop", "content"))
        .and(query_param("titles", "rs53576|I_3000001|Rs999"))
        .respond_with(json(serde_json::json!({
            "query": {
                "normalized": [
                    { "from": "rs53576", "to": "Rs53576" },
                    { "from": "I_3000001", "to": "I 3000001" }
                ],
                "pages": {
                    "11": { "pageid": 11, "title": "Rs53576",
                            "revisions": [ { "*": "{{Rsnum|rsid=53576}}" } ] },
                    "12": { "pageid": 12, "title": "I 3000001",
                            "revisions": [ { "slots": { "main": { "*": "{{Rsnum|rsid=3000001}}" } } } ] },
                    "-1": { "ns": 0, "title": "Rs999", "missing": "" }
                }
            }
        })))
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let ids = vec![
        "rs53576".to_string(),
        "I_3000001".to_string(),
        "Rs999".to_string(),
    ];
    let contents = source.fetch_content_batch(&ids).await.unwrap();

    assert_eq!(contents.len(), 3);
    assert_eq!(
        contents["rs53576"].as_deref(),
        Some("{{Rsnum|rsid=53576}}")
    );
    assert_eq!(
        contents["I_3000001"].as_deref(),
        Some("{{Rsnum|rsid=3000001}}")
    );
    assert_eq!(contents["Rs999"], None);
}

#[tokio::test]
async fn test_overloaded_status_is_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let err = source
        .list_category_members("Category:Is_a_snp", None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert!(err.is_overloaded());
}

#[tokio::test]
async fn test_api_error_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .respond_with(json(serde_json::json!({
            "error": { "code": "maxlag", "info": "Waiting for db: 7 seconds lagged" }
        })))
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let err = source
        .fetch_content_batch(&["Rs1".to_string()])
        .await
        .unwrap_err();

    match &err {
        SourceError::Api { code, .. } => assert_eq!(code, "maxlag"),
        other => panic!("expected API error, got {:?}", other),
    }
    assert!(err.is_overloaded());
}

#[tokio::test]
async fn test_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let source = create_source(&mock_server);
    let err = source
        .list_category_members("Category:Is_a_snp", None)
        .await
        .unwrap_err();

    assert!(matches!(err, SourceError::Malformed(_)));
    assert!(!err.is_overloaded());
}

async fn mount_small_wiki(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("list", "categorymembers"))
        .and(NoCursor)
        .respond_with(json(serde_json::json!({
            "continue": { "cmcontinue": "page2", "continue": "-||" },
            "query": { "categorymembers": [
                { "title": "Rs1" }, { "title": "Rs2" }, { "title": "Rs3" }
            ]}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("list", "categorymembers"))
        .and(query_param("cmcontinue", "page2"))
        .respond_with(json(serde_json::json!({
            "query": { "categorymembers": [ { "title": "Rs4" } ] }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("titles", "Rs1|Rs2"))
        .respond_with(json(serde_json::json!({
            "query": { "pages": {
                "1": { "title": "Rs1", "revisions": [ { "*": "one" } ] },
                "2": { "title": "Rs2", "revisions": [ { "*": "two" } ] }
            }}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("titles", "Rs3"))
        .respond_with(json(serde_json::json!({
            "query": { "pages": {
                "3": { "title": "Rs3", "revisions": [ { "*": "three" } ] }
            }}
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("titles", "Rs4"))
        .respond_with(json(serde_json::json!({
            "query": { "pages": { "-1": { "title": "Rs4", "missing": "" } } }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_harvest_then_restart() {
    let mock_server = MockServer::start().await;
    mount_small_wiki(&mock_server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server, dir.path());

    let engine = Engine::from_config(&config, Arc::new(SilentObserver)).unwrap();
    engine.start().unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(10), engine.wait())
        .await
        .expect("harvest timed out")
        .expect("worker failed");

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, JobOutcome::Exhausted);
    assert_eq!(reports[0].count, 3);
    assert_eq!(engine.current_progress("SNP").unwrap(), (3, 5));

    let requests_after_first_run = mock_server.received_requests().await.unwrap().len();
    // Two listings and three content lookups
    assert_eq!(requests_after_first_run, 5);

    {
        let mut store = SqliteStore::open(Path::new(&config.storage.database_path)).unwrap();
        assert_eq!(store.count_records("snps").unwrap(), 3);
        assert_eq!(read_count(&mut store, "snp_count").unwrap(), 3);
        assert_eq!(
            store.read_checkpoint("cmcontinue_snp").unwrap().as_deref(),
            Some("page2")
        );
        assert_eq!(
            store.read_checkpoint("cmcontinue_snp_done").unwrap().as_deref(),
            Some("1")
        );
        store.close();
    }

    // A fresh process skips the completed category without touching the API
    let engine = Engine::from_config(&config, Arc::new(SilentObserver)).unwrap();
    engine.start().unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(10), engine.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reports[0].outcome, JobOutcome::Skipped);
    assert_eq!(
        mock_server.received_requests().await.unwrap().len(),
        requests_after_first_run
    );

    // The journal exists and holds only its header
    let journal = std::fs::read_to_string(&config.storage.error_log_path).unwrap();
    assert!(journal.starts_with("# SNPedia Scraper Error Log"));
    assert!(!journal.contains("_ERROR |"));
}

#[tokio::test]
async fn test_harvest_gives_up_after_listing_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server, dir.path());

    let engine = Engine::from_config(&config, Arc::new(SilentObserver)).unwrap();
    engine.start().unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(10), engine.wait())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reports[0].outcome, JobOutcome::Interrupted);
    // First attempt plus three retries
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 4);

    let journal = std::fs::read_to_string(&config.storage.error_log_path).unwrap();
    assert_eq!(journal.matches("| Category:Is_a_snp | 502_ERROR |").count(), 4);
}

#[tokio::test]
async fn test_stop_interrupts_slow_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            json(serde_json::json!({ "query": { "categorymembers": [] } }))
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(&mock_server, dir.path());

    let engine = Engine::from_config(&config, Arc::new(SilentObserver)).unwrap();
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped_at = std::time::Instant::now();
    engine.stop().unwrap();
    let reports = tokio::time::timeout(Duration::from_secs(10), engine.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(stopped_at.elapsed() < Duration::from_millis(500));
    assert_eq!(reports[0].outcome, JobOutcome::Interrupted);
    assert_eq!(engine.combined_progress().unwrap(), (0, 5));
}

#[test]
fn test_unusable_store_path_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        storage: StorageConfig {
            database_path: dir
                .path()
                .join("missing")
                .join("snpedia.db")
                .display()
                .to_string(),
            error_log_path: dir.path().join("errors.log").display().to_string(),
        },
        ..Config::default()
    };

    assert!(Engine::from_config(&config, Arc::new(SilentObserver)).is_err());
}
