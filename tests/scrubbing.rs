//! Confirms the null-sentinel scrub is actually applied to outgoing request
//! bodies, not just to the pure function in isolation.

use cs_tools_core::{ApiClient, ClientConfig};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn null_fields_are_stripped_before_the_request_is_sent() {
    let mock_server = MockServer::start().await;

    // The matcher only succeeds if the body it receives has no `tag_identifiers`
    // key at all -- if the client forwarded the `null` literally this mock
    // would not match and the call would fail with a 404 from wiremock.
    Mock::given(method("POST"))
        .and(path("/api/rest/2.0/metadata/search"))
        .and(body_json(json!({
            "metadata": [{"identifier": "abc-123"}],
            "include_headers": true,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let mut config = ClientConfig::new(mock_server.uri());
    config.cache_directory = None;
    let client = ApiClient::new(&config).unwrap();

    let options = json!({"tag_identifiers": null});
    let result = client.metadata_search(Some(&cs_tools_core::Guid::from("abc-123")), options).await;

    assert!(result.is_ok(), "request with a null field should still reach and match the mock: {result:?}");
}
