//! Integration tests against the transport's cache, retry, and concurrency
//! behavior, exercised through a live HTTP client via `wiremock`.

use cs_tools_core::{ApiClient, ClientConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(mock_server: &MockServer, cache_directory: Option<std::path::PathBuf>) -> ClientConfig {
    let mut config = ClientConfig::new(mock_server.uri());
    config.cache_directory = cache_directory;
    config.concurrency = 5;
    config
}

#[tokio::test]
async fn cache_hit_skips_the_network_entirely() {
    let mock_server = MockServer::start().await;
    let hit_count = Arc::new(AtomicUsize::new(0));

    {
        let hit_count = hit_count.clone();
        Mock::given(method("GET"))
            .and(path("/api/rest/2.0/system"))
            .respond_with(move |_req: &wiremock::Request| {
                hit_count.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"release_version": "10.3.0"}))
            })
            .mount(&mock_server)
            .await;
    }

    let tempdir = tempfile::tempdir().unwrap();
    let config = config_for(&mock_server, Some(tempdir.path().to_path_buf()));
    let client = ApiClient::new(&config).unwrap();

    client.system_info().await.unwrap();
    client.system_info().await.unwrap();

    assert_eq!(hit_count.load(Ordering::SeqCst), 1, "second call should be served entirely from cache");
}

#[tokio::test]
async fn cache_miss_without_a_cache_directory_always_hits_network() {
    let mock_server = MockServer::start().await;
    let hit_count = Arc::new(AtomicUsize::new(0));

    {
        let hit_count = hit_count.clone();
        Mock::given(method("GET"))
            .and(path("/api/rest/2.0/system"))
            .respond_with(move |_req: &wiremock::Request| {
                hit_count.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({}))
            })
            .mount(&mock_server)
            .await;
    }

    let config = config_for(&mock_server, None);
    let client = ApiClient::new(&config).unwrap();

    client.system_info().await.unwrap();
    client.system_info().await.unwrap();

    assert_eq!(hit_count.load(Ordering::SeqCst), 2, "with no cache directory, every call hits the network");
}

#[tokio::test(start_paused = true)]
async fn retries_with_exact_spec_backoff_then_succeeds() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/tml/import"))
        .respond_with(ResponseTemplate::new(504))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/tml/import"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;

    let config = config_for(&mock_server, None);
    let client = ApiClient::new(&config).unwrap();

    let started = tokio::time::Instant::now();
    let result = client
        .metadata_tml_import(&[], cs_tools_core::TmlImportPolicy::Partial)
        .await;
    let elapsed = started.elapsed();

    assert!(result.is_ok(), "should eventually succeed after two retries");
    // Paused virtual clock: two sleeps of 60s and 240s elapse exactly.
    assert_eq!(elapsed, std::time::Duration::from_secs(300));
}

#[tokio::test]
async fn non_whitelisted_path_does_not_retry_on_server_pressure() {
    let mock_server = MockServer::start().await;
    let hit_count = Arc::new(AtomicUsize::new(0));

    {
        let hit_count = hit_count.clone();
        Mock::given(method("POST"))
            .and(path("/api/rest/2.0/metadata/search"))
            .respond_with(move |_req: &wiremock::Request| {
                hit_count.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(504)
            })
            .mount(&mock_server)
            .await;
    }

    let config = config_for(&mock_server, None);
    let client = ApiClient::new(&config).unwrap();

    let result = client.metadata_search(None, serde_json::json!({})).await;

    assert!(result.is_err());
    assert_eq!(hit_count.load(Ordering::SeqCst), 1, "a single 504 outside the retry whitelist should not be retried");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fan_out_never_exceeds_five_concurrent_permission_requests() {
    let mock_server = MockServer::start().await;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        Mock::given(method("POST"))
            .and(path("/api/rest/2.0/security/metadata/fetch-permissions"))
            .respond_with(move |_req: &wiremock::Request| {
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(20));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({}))
            })
            .mount(&mock_server)
            .await;
    }

    let mut config = config_for(&mock_server, None);
    config.concurrency = 50; // transport itself shouldn't be the bottleneck here
    let client = Arc::new(ApiClient::new(&config).unwrap());

    let session = cs_tools_core::SessionContext {
        cluster_id: "c1".into(),
        base_url: mock_server.uri(),
        version: semver::Version::parse("10.5.0").unwrap(),
        timezone: "UTC".into(),
        is_cloud: false,
        orgs_enabled: false,
        user: cs_tools_core::SessionUser {
            guid: cs_tools_core::Guid::from("admin"),
            username: "admin".into(),
            privileges: vec![],
        },
    };

    let mut typed_guids: cs_tools_core::TypedGuids = std::collections::HashMap::new();
    typed_guids.insert(
        "LIVEBOARD".to_string(),
        (0..20).map(|i| cs_tools_core::Guid::from(format!("guid-{i}"))).collect(),
    );

    cs_tools_core::workflows::permissions::permissions_fetch(client, &session, &typed_guids).await;

    assert!(peak.load(Ordering::SeqCst) <= 5, "permission fan-out must stay at or below 5 in flight");
}
