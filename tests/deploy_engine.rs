//! Integration tests for the checkpoint -> deploy guid-mapping round trip.

use cs_tools_core::{ApiClient, CheckpointFilters, ClientConfig, DeployType, TmlImportPolicy};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn export_response(guid: &str) -> serde_json::Value {
    json!([{
        "info": {
            "name": format!("Object {guid}"),
            "type": "LIVEBOARD",
            "status": {"status_code": "OK"},
        },
        "edoc": format!("guid: {guid}\nname: Object {guid}\n"),
    }])
}

fn import_response(new_guid: &str, name: &str) -> serde_json::Value {
    json!([{
        "response": {
            "status": {"status_code": "OK"},
            "header": {"id_guid": new_guid, "name": name, "type": "LIVEBOARD"},
        }
    }])
}

async fn mount_search_and_export(mock_server: &MockServer, guid: &str) {
    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"metadata_id": guid, "metadata_name": "Object", "metadata_type": "LIVEBOARD"}
        ])))
        .mount(mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/tml/export"))
        .respond_with(ResponseTemplate::new(200).set_body_json(export_response(guid)))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn checkpoint_then_deploy_resolves_the_guid_mapping() {
    let mock_server = MockServer::start().await;
    let source_guid = "11111111-1111-1111-1111-111111111111";
    let target_guid = "22222222-2222-2222-2222-222222222222";

    mount_search_and_export(&mock_server, source_guid).await;

    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/tml/import"))
        .respond_with(ResponseTemplate::new(200).set_body_json(import_response(target_guid, "Object")))
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri());
    config.cache_directory = None;
    let client = Arc::new(ApiClient::new(&config).unwrap());

    let workdir = tempfile::tempdir().unwrap();
    let filters = CheckpointFilters { object_types: vec!["LIVEBOARD".into()], tags: vec![] };

    let source_mapping =
        cs_tools_core::checkpoint(client.clone(), workdir.path(), "dev", &filters, false).await.unwrap();
    assert_eq!(source_mapping.mapping.len(), 1);

    let target_mapping = cs_tools_core::deploy_tml(
        client,
        workdir.path(),
        "dev",
        "prod",
        TmlImportPolicy::AllOrNone,
        DeployType::All,
    )
    .await
    .unwrap();

    let resolved = target_mapping.mapping.get(&cs_tools_core::Guid::from(source_guid)).unwrap();
    assert_eq!(resolved, &Some(cs_tools_core::Guid::from(target_guid)));

    assert!(target_mapping
        .history
        .iter()
        .any(|h| h.mode == cs_tools_core::HistoryMode::Import));
}

#[tokio::test]
async fn delta_deploy_with_nothing_new_imports_nothing() {
    let mock_server = MockServer::start().await;
    let source_guid = "33333333-3333-3333-3333-333333333333";
    let target_guid = "44444444-4444-4444-4444-444444444444";

    mount_search_and_export(&mock_server, source_guid).await;

    let import_hits = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    {
        let import_hits = import_hits.clone();
        Mock::given(method("POST"))
            .and(path("/api/rest/2.0/metadata/tml/import"))
            .respond_with(move |_req: &wiremock::Request| {
                import_hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                ResponseTemplate::new(200).set_body_json(import_response(target_guid, "Object"))
            })
            .mount(&mock_server)
            .await;
    }

    let mut config = ClientConfig::new(mock_server.uri());
    config.cache_directory = None;
    let client = Arc::new(ApiClient::new(&config).unwrap());

    let workdir = tempfile::tempdir().unwrap();
    let filters = CheckpointFilters { object_types: vec!["LIVEBOARD".into()], tags: vec![] };

    cs_tools_core::checkpoint(client.clone(), workdir.path(), "dev", &filters, false).await.unwrap();

    // First deploy: imports the one exported file and records an IMPORT history entry.
    cs_tools_core::deploy_tml(
        client.clone(),
        workdir.path(),
        "dev",
        "prod",
        TmlImportPolicy::AllOrNone,
        DeployType::All,
    )
    .await
    .unwrap();
    assert_eq!(import_hits.load(std::sync::atomic::Ordering::SeqCst), 1);

    // Second deploy, DELTA mode: the exported file predates the IMPORT history
    // entry just recorded, so nothing new should be sent to import.
    let second = cs_tools_core::deploy_tml(
        client,
        workdir.path(),
        "dev",
        "prod",
        TmlImportPolicy::AllOrNone,
        DeployType::Delta,
    )
    .await
    .unwrap();

    assert_eq!(import_hits.load(std::sync::atomic::Ordering::SeqCst), 1, "delta deploy should not re-import unchanged files");
    assert_eq!(
        second.mapping.get(&cs_tools_core::Guid::from(source_guid)).unwrap(),
        &Some(cs_tools_core::Guid::from(target_guid))
    );
}
