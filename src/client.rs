//! Typed facade over the analytics platform's REST surface.
//!
//! Generalizes `UnifiedLLMClient` (factory + delegation shape) and
//! `original_source/cs_tools/api/client.py`'s `RESTAPIClient` (endpoint
//! surface, auth, heartbeat, request/response hooks).

use crate::cache::{CacheStore, CACHE_BUSTING_HEADER, CACHE_CONTROL_HEADER};
use crate::config::ClientConfig;
use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::{log_debug, log_warn};
use crate::transport::{PreparedRequest, Transport};
use crate::types::{ApiObjectType, ApiResult, Guid, TmlImportPolicy};
use chrono::{DateTime, Utc};
use reqwest::{Method, Url};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

const PRODUCT_NAME: &str = "CS Tools";
const PRODUCT_VERSION: &str = env!("CARGO_PKG_VERSION");
const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const V1_PERMISSIONS_BATCH_SIZE: usize = 25;

/// Strip any key/value pair whose value is JSON `null`, recursively. Matches
/// `cs_tools/api/utils.py::scrub_undefined_sentinel`, run over request bodies
/// so omitted parameters never reach the wire as an explicit `null`.
pub fn scrub_undefined_sentinel(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, scrub_undefined_sentinel(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(scrub_undefined_sentinel)
                .collect(),
        ),
        other => other,
    }
}

pub struct ApiClient {
    transport: Transport,
    base_url: Url,
    dataservice_base_url: Url,
    auth_header: RwLock<Option<String>>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    heartbeat_base: Url,
    dataservice_redirects: Mutex<HashMap<String, (String, u16)>>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> CsToolsResult<Self> {
        config.validate()?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| CsToolsError::configuration_error(format!("invalid base_url: {e}")))?;

        let mut dataservice_base_url = base_url.clone();
        dataservice_base_url
            .set_port(Some(8442))
            .map_err(|_| CsToolsError::configuration_error("could not derive dataservice URL"))?;

        let cache = match &config.cache_directory {
            Some(dir) => Some(CacheStore::open(dir)?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.request_timeout)
            .user_agent(format!("{PRODUCT_NAME}/{PRODUCT_VERSION}"))
            .build()
            .map_err(|e| CsToolsError::configuration_error(format!("could not build HTTP client: {e}")))?;

        let transport = Transport::new(client, cache, config.concurrency, config.retry_policy);

        Ok(Self {
            transport,
            heartbeat_base: base_url.clone(),
            base_url,
            dataservice_base_url,
            auth_header: RwLock::new(None),
            heartbeat: Mutex::new(None),
            dataservice_redirects: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, base: &Url, path: &str) -> CsToolsResult<Url> {
        base.join(path)
            .map_err(|e| CsToolsError::configuration_error(format!("invalid path '{path}': {e}")))
    }

    /// Resolves the dataservice host for a dataload cycle, honoring any
    /// server-issued node redirect recorded by the data-load workflow.
    pub async fn dataservice_url(&self, cycle_id: &str, path: &str) -> CsToolsResult<Url> {
        let redirects = self.dataservice_redirects.lock().await;
        let mut url = match redirects.get(cycle_id) {
            Some((host, port)) => {
                let mut u = self.dataservice_base_url.clone();
                u.set_host(Some(host))
                    .map_err(|_| CsToolsError::configuration_error("invalid redirect host"))?;
                u.set_port(Some(*port))
                    .map_err(|_| CsToolsError::configuration_error("invalid redirect port"))?;
                u
            }
            None => self.dataservice_base_url.clone(),
        };
        drop(redirects);
        url = url
            .join(path)
            .map_err(|e| CsToolsError::configuration_error(format!("invalid path '{path}': {e}")))?;
        Ok(url)
    }

    pub async fn record_dataservice_redirect(&self, cycle_id: impl Into<String>, host: impl Into<String>, port: u16) {
        self.dataservice_redirects.lock().await.insert(cycle_id.into(), (host.into(), port));
    }

    async fn before_request(&self, request_id: Uuid, method: &Method, path: &str, body: &serde_json::Value, is_multipart: bool) {
        if is_multipart {
            log_debug!(%request_id, method = %method, path, "dispatching request (multipart body omitted from log)");
        } else {
            log_debug!(%request_id, method = %method, path, body = %body, "dispatching request");
        }
    }

    async fn after_response(&self, request_id: Uuid, method: &Method, path: &str, status: u16, elapsed_ms: i64, cache_hit: bool, body: &[u8]) {
        if status >= 400 {
            log_warn!(
                %request_id,
                method = %method,
                path,
                status,
                elapsed_ms,
                cache_hit,
                body = %String::from_utf8_lossy(body),
                "request returned an error status"
            );
        } else {
            log_debug!(%request_id, method = %method, path, status, elapsed_ms, cache_hit, "response received");
        }
    }

    async fn send(
        &self,
        method: Method,
        base: &Url,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<serde_json::Value>,
        cacheable: bool,
        bust_cache: bool,
    ) -> CsToolsResult<ApiResult> {
        let mut url = self.url(base, path)?;
        if let Some(pairs) = query {
            let mut qp = url.query_pairs_mut();
            for (k, v) in pairs {
                qp.append_pair(k, v);
            }
            drop(qp);
        }

        let scrubbed_body = body.map(scrub_undefined_sentinel).unwrap_or_else(|| json!({}));
        let request_id = Uuid::new_v4();

        self.before_request(request_id, &method, path, &scrubbed_body, false).await;

        let mut prepared = PreparedRequest::new(method.clone(), url.clone());
        if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
            prepared = prepared.with_json_body(&scrubbed_body)?;
        }
        prepared.headers.push(("x-requested-by".into(), PRODUCT_NAME.into()));
        if cacheable {
            prepared.headers.push((CACHE_CONTROL_HEADER.into(), "true".into()));
            prepared = prepared.cacheable();
        }
        if bust_cache {
            prepared.headers.push((CACHE_BUSTING_HEADER.into(), "true".into()));
            prepared = prepared.bust_cache();
        }
        if let Some(auth) = self.auth_header.read().await.as_ref() {
            prepared.headers.push(("authorization".into(), auth.clone()));
        }

        let dispatched_at = Utc::now();
        let response = self.transport.send(prepared).await?;
        let elapsed_ms = (Utc::now() - dispatched_at).num_milliseconds();

        self.after_response(request_id, &method, path, response.status, elapsed_ms, response.cache_hit, &response.body)
            .await;

        if response.status == 401 || response.status == 403 {
            return Err(CsToolsError::authentication_failed(format!(
                "{} returned {}",
                path, response.status
            )));
        }

        if response.status >= 400 {
            return Err(CsToolsError::bad_request(
                response.status,
                String::from_utf8_lossy(&response.body).into_owned(),
            ));
        }

        if response.body.is_empty() {
            return Ok(json!({}));
        }

        serde_json::from_slice(&response.body)
            .map_err(|e| CsToolsError::response_parsing_error(format!("{path}: {e}")))
    }

    async fn get(&self, path: &str, query: Option<&[(&str, &str)]>, cacheable: bool) -> CsToolsResult<ApiResult> {
        let base = self.base_url.clone();
        self.send(Method::GET, &base, path, query, None, cacheable, false).await
    }

    async fn post(&self, path: &str, body: serde_json::Value, cacheable: bool) -> CsToolsResult<ApiResult> {
        let base = self.base_url.clone();
        self.send(Method::POST, &base, path, None, Some(body), cacheable, false).await
    }

    // ============================================================
    // AUTHENTICATION
    // ============================================================

    pub async fn login(&self, username: &str, password: &str, org_id: Option<i64>) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/auth/session/login",
            json!({
                "username": username,
                "password": password,
                "org_identifier": org_id,
                "remember_me": true,
            }),
            false,
        )
        .await
    }

    pub async fn full_access_token(&self, username: &str, token_validity_secs: i64, org_id: Option<i64>, password_or_secret: &str) -> CsToolsResult<String> {
        let result = self.post(
            "api/rest/2.0/auth/token/full",
            json!({
                "username": username,
                "validity_time_in_sec": token_validity_secs,
                "org_id": org_id,
                "password": password_or_secret,
            }),
            false,
        )
        .await?;

        let token = result
            .as_str()
            .map(str::to_string)
            .or_else(|| result.get("token").and_then(|v| v.as_str()).map(str::to_string))
            .ok_or_else(|| CsToolsError::response_parsing_error("token response had no token field"))?;

        *self.auth_header.write().await = Some(format!("Bearer {token}"));
        self.restart_heartbeat().await;

        Ok(token)
    }

    pub async fn v1_trusted_authentication(&self, username: &str, secret_key: &Guid, org_id: Option<i64>) -> CsToolsResult<ApiResult> {
        let token_response = self.post(
            "callosum/v1/tspublic/v1/session/auth/token",
            json!({
                "secret_key": secret_key.as_str(),
                "orgid": org_id,
                "username": username,
                "access_level": "FULL",
            }),
            false,
        )
        .await?;

        let auth_token = token_response
            .as_str()
            .ok_or_else(|| CsToolsError::response_parsing_error("v1 auth token response was not a string"))?;

        let login_response = self.post(
            "callosum/v1/tspublic/v1/session/login/token",
            json!({
                "auth_token": auth_token,
                "username": username,
                "no_url_redirection": true,
            }),
            false,
        )
        .await?;

        self.restart_heartbeat().await;

        Ok(login_response)
    }

    pub async fn logout(&self) -> CsToolsResult<ApiResult> {
        *self.auth_header.write().await = None;
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
        self.post("api/rest/2.0/auth/session/logout", json!({}), false).await
    }

    pub async fn session_info(&self) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/auth/session/user", None, false).await
    }

    /// Cancels any previous heartbeat and starts a new one; the old task is
    /// never left running alongside the new one.
    async fn restart_heartbeat(&self) {
        let mut guard = self.heartbeat.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }

        let base = self.heartbeat_base.clone();
        let handle = tokio::spawn(async move {
            let client = reqwest::Client::new();
            loop {
                let url = base.join("callosum/v1/session/isactive");
                if let Ok(url) = url {
                    if let Err(e) = client.get(url).send().await {
                        log_debug!(error = %e, "heartbeat ping failed");
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(HEARTBEAT_INTERVAL_SECS)).await;
            }
        });
        *guard = Some(handle);
    }

    // ============================================================
    // SYSTEM / ORGS / ROLES
    // ============================================================

    pub async fn system_info(&self) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/system", None, true).await
    }

    pub async fn system_config_overrides(&self) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/system/config-overrides", None, true).await
    }

    pub async fn orgs_search(&self, options: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/orgs/search", options, true).await
    }

    pub async fn roles_search(&self, options: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/roles/search", options, true).await
    }

    pub async fn logs_fetch(&self, utc_start: DateTime<Utc>, utc_end: DateTime<Utc>) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/logs/fetch",
            json!({
                "log_type": "SECURITY_AUDIT",
                "start_epoch_time_in_millis": utc_start.timestamp_millis(),
                "end_epoch_time_in_millis": utc_end.timestamp_millis(),
                "get_all_logs": true,
            }),
            false,
        )
        .await
    }

    // ============================================================
    // USERS / GROUPS / TAGS  (near-identical CRUD surfaces)
    // ============================================================

    pub async fn users_search(&self, options: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/users/search", options, true).await
    }

    pub async fn groups_search(&self, options: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/groups/search", options, true).await
    }

    pub async fn tags_search(&self, options: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/tags/search", options, true).await
    }

    // ============================================================
    // METADATA
    // ============================================================

    pub async fn metadata_search(&self, guid: Option<&Guid>, mut options: serde_json::Value) -> CsToolsResult<ApiResult> {
        if let Some(obj) = options.as_object_mut() {
            if !obj.contains_key("metadata") {
                if let Some(guid) = guid {
                    obj.insert("metadata".into(), json!([{"identifier": guid.as_str()}]));
                }
            }
            obj.insert("include_headers".into(), json!(true));
        }
        self.post("api/rest/2.0/metadata/search", options, true).await
    }

    pub async fn metadata_delete(&self, guid: &Guid) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/metadata/delete",
            json!({"metadata": [{"identifier": guid.as_str()}]}),
            false,
        )
        .await
    }

    pub async fn metadata_tml_export(&self, guid: &Guid, export_fqn: bool) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/metadata/tml/export",
            json!({"metadata": [{"identifier": guid.as_str()}], "export_fqn": export_fqn}),
            true,
        )
        .await
    }

    pub async fn metadata_tml_import(&self, tmls: &[String], policy: TmlImportPolicy) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/metadata/tml/import",
            json!({"metadata_tmls": tmls, "import_policy": policy}),
            true,
        )
        .await
    }

    pub async fn metadata_tml_async_import(&self, tmls: &[String], policy: TmlImportPolicy) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/metadata/tml/async/import",
            json!({"metadata_tmls": tmls, "import_policy": policy}),
            true,
        )
        .await
    }

    pub async fn metadata_tml_async_status(&self, task_id: &str) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/metadata/tml/async/status",
            json!({"task_ids": [task_id], "include_import_response": true}),
            true,
        )
        .await
    }

    pub async fn connection_search(&self, guid: &Guid) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/connection/search",
            json!({"connections": [{"identifier": guid.as_str()}], "include_details": true}),
            true,
        )
        .await
    }

    // ============================================================
    // SECURITY / PERMISSIONS
    // ============================================================

    /// V2 permission fetch. See [`Self::v1_security_metadata_permissions`] for
    /// the batched V1 equivalent used below the compatibility cutoff.
    pub async fn security_metadata_permissions(&self, object_type: &ApiObjectType, guids: &[Guid]) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/security/metadata/fetch-permissions",
            json!({
                "metadata": guids.iter().map(|g| json!({"identifier": g.as_str()})).collect::<Vec<_>>(),
                "type": object_type,
            }),
            false,
        )
        .await
    }

    /// Batches request-URI-length-sensitive identifiers into chunks of
    /// [`V1_PERMISSIONS_BATCH_SIZE`] and recombines the responses.
    pub async fn v1_security_metadata_permissions(&self, object_type: &ApiObjectType, guids: &[Guid]) -> CsToolsResult<Vec<ApiResult>> {
        let mut combined = Vec::new();
        for chunk in guids.chunks(V1_PERMISSIONS_BATCH_SIZE) {
            let ids: Vec<&str> = chunk.iter().map(Guid::as_str).collect();
            let result = self.post(
                "callosum/v1/tspublic/v1/security/metadata/permissions",
                json!({"type": object_type, "id": ids}),
                false,
            )
            .await?;
            combined.push(result);
        }
        Ok(combined)
    }

    pub async fn security_metadata_share(&self, body: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/security/metadata/share", body, false).await
    }

    pub async fn security_metadata_assign(&self, body: serde_json::Value) -> CsToolsResult<ApiResult> {
        self.post("api/rest/2.0/security/metadata/assign", body, false).await
    }

    // ============================================================
    // VERSION CONTROL
    // ============================================================

    pub async fn vcs_git_config(&self) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/vcs/git/config", None, false).await
    }

    pub async fn vcs_git_branches(&self) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/vcs/git/branches", None, false).await
    }

    pub async fn vcs_git_commits(&self, branch_name: &str) -> CsToolsResult<ApiResult> {
        self.get("api/rest/2.0/vcs/git/commits", Some(&[("branch_name", branch_name)]), false).await
    }

    // ============================================================
    // DATA
    // ============================================================

    pub async fn search_data(&self, logical_table_identifier: &Guid, query_string: &str, record_offset: usize, record_size: usize) -> CsToolsResult<ApiResult> {
        self.post(
            "api/rest/2.0/searchdata",
            json!({
                "logical_table_identifier": logical_table_identifier.as_str(),
                "query_string": query_string,
                "data_format": "COMPACT",
                "record_offset": record_offset,
                "record_size": record_size,
            }),
            false,
        )
        .await
    }

    // ============================================================
    // DATA LOAD (ts_dataservice, sibling port)
    // ============================================================

    pub async fn v1_dataservice_dataload_session(&self, username: &str, password: &str) -> CsToolsResult<ApiResult> {
        let url = self.dataservice_url("_session", "ts_dataservice/v1/public/session").await?;
        self.send(Method::POST, &url, "", None, Some(json!({"username": username, "password": password})), false, false)
            .await
    }

    pub async fn v1_dataservice_dataload_initialize(&self, flags: serde_json::Value) -> CsToolsResult<ApiResult> {
        let url = self.dataservice_url("_init", "ts_dataservice/v1/public/loads").await?;
        self.send(Method::POST, &url, "", None, Some(flags), false, false).await
    }

    /// Multipart upload of the data file for an in-progress load cycle. Logged
    /// without its body — file contents have no business in the logs.
    pub async fn v1_dataservice_dataload_start(&self, cycle_id: &str, filename: &str, file_bytes: Vec<u8>) -> CsToolsResult<ApiResult> {
        let path = format!("ts_dataservice/v1/public/loads/{cycle_id}");
        let url = self.dataservice_url(cycle_id, &path).await?;

        let request_id = Uuid::new_v4();
        self.before_request(request_id, &Method::POST, &path, &json!({}), true).await;

        let part = reqwest::multipart::Part::bytes(file_bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut headers = vec![("x-requested-by".to_string(), PRODUCT_NAME.to_string())];
        if let Some(auth) = self.auth_header.read().await.as_ref() {
            headers.push(("authorization".to_string(), auth.clone()));
        }

        let dispatched_at = Utc::now();
        let response = self.transport.send_multipart(url, headers, form).await?;
        let elapsed_ms = (Utc::now() - dispatched_at).num_milliseconds();

        self.after_response(request_id, &Method::POST, &path, response.status, elapsed_ms, false, &response.body).await;

        if response.status >= 400 {
            return Err(CsToolsError::bad_request(response.status, String::from_utf8_lossy(&response.body).into_owned()));
        }

        if response.body.is_empty() {
            return Ok(json!({}));
        }

        serde_json::from_slice(&response.body).map_err(|e| CsToolsError::response_parsing_error(format!("{path}: {e}")))
    }

    pub async fn v1_dataservice_dataload_commit(&self, cycle_id: &str) -> CsToolsResult<ApiResult> {
        let path = format!("ts_dataservice/v1/public/loads/{cycle_id}/commit");
        let url = self.dataservice_url(cycle_id, &path).await?;
        self.send(Method::POST, &url, "", None, Some(json!({})), false, false).await
    }

    pub async fn v1_dataservice_dataload_status(&self, cycle_id: &str) -> CsToolsResult<ApiResult> {
        let path = format!("ts_dataservice/v1/public/loads/{cycle_id}");
        let url = self.dataservice_url(cycle_id, &path).await?;
        self.send(Method::GET, &url, "", None, None, false, false).await
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

/// Shared handle convenience, matching how workflows take `Arc<ApiClient>` to
/// fan out across a bounded task group without cloning the transport.
pub type SharedApiClient = Arc<ApiClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubbing_removes_nulls_at_any_depth() {
        let input = json!({
            "a": 1,
            "b": null,
            "c": {"d": null, "e": 2},
            "f": [1, null, 2],
        });

        let scrubbed = scrub_undefined_sentinel(input);

        assert_eq!(scrubbed["a"], json!(1));
        assert!(scrubbed.get("b").is_none());
        assert_eq!(scrubbed["c"]["e"], json!(2));
        assert!(scrubbed["c"].get("d").is_none());
        assert_eq!(scrubbed["f"], json!([1, 2]));
    }

    #[test]
    fn v1_permissions_batch_size_matches_spec_constant() {
        assert_eq!(V1_PERMISSIONS_BATCH_SIZE, 25);
    }
}
