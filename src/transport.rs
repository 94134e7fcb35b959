//! Rate-limited, cached, retrying HTTP transport.
//!
//! Generalizes `CachedRetryTransport.handle_async_request` from
//! `original_source/cs_tools/api/_transport.py`: caching happens before the
//! concurrency slot is acquired, retry happens inside it.

use crate::cache::{self, CacheStore, RequestFingerprint};
use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::{log_debug, log_warn};
use crate::retry::{self, RetryPolicy};
use chrono::{DateTime, Utc};
use reqwest::{Method, Url};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A fully-composed HTTP request, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cache_enabled: bool,
    pub cache_bypass: bool,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
            cache_enabled: false,
            cache_bypass: false,
        }
    }

    pub fn with_json_body(mut self, body: &serde_json::Value) -> CsToolsResult<Self> {
        self.body = serde_json::to_vec(body)
            .map_err(|e| CsToolsError::configuration_error(format!("could not serialize request body: {e}")))?;
        self.headers.push(("content-type".into(), "application/json".into()));
        Ok(self)
    }

    pub fn cacheable(mut self) -> Self {
        self.cache_enabled = true;
        self
    }

    pub fn bust_cache(mut self) -> Self {
        self.cache_bypass = true;
        self
    }

    fn fingerprint(&self) -> RequestFingerprint {
        let host = self.url.host_str().unwrap_or_default();
        RequestFingerprint::new(
            self.method.as_str(),
            host,
            self.url.port(),
            self.url.path(),
            self.url.query().unwrap_or_default(),
            &self.body,
        )
    }
}

/// Response from [`Transport::send`], whether served from cache or the network.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cache_hit: bool,
    pub dispatch_time_utc: DateTime<Utc>,
    pub receive_time_utc: DateTime<Utc>,
}

pub struct Transport {
    client: reqwest::Client,
    cache: Option<CacheStore>,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
}

impl Transport {
    pub fn new(client: reqwest::Client, cache: Option<CacheStore>, max_concurrent_requests: usize, retry_policy: RetryPolicy) -> Self {
        Self {
            client,
            cache,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests)),
            retry_policy,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Send a multipart file upload directly, bypassing cache and retry.
    /// Used only by the data-load workflow's upload step, which is neither
    /// cacheable nor on the TML-import retry whitelist.
    pub async fn send_multipart(&self, url: Url, headers: Vec<(String, String)>, form: reqwest::multipart::Form) -> CsToolsResult<TransportResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("transport semaphore is never closed while the transport is alive");

        let dispatch_time_utc = Utc::now();

        let mut builder = self.client.post(url).multipart(form);
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CsToolsError::timeout(DEFAULT_NETWORK_TIMEOUT_SECS)
            } else {
                CsToolsError::request_failed(e.to_string(), Some(Box::new(e)))
            }
        })?;

        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CsToolsError::request_failed(format!("could not read response body: {e}"), Some(Box::new(e))))?
            .to_vec();

        let receive_time_utc = Utc::now();

        Ok(TransportResponse {
            status,
            headers: response_headers,
            body,
            cache_hit: false,
            dispatch_time_utc,
            receive_time_utc,
        })
    }

    /// Builds the request, checks the cache, dispatches with retry, stores
    /// the result in the cache, and returns it.
    pub async fn send(&self, request: PreparedRequest) -> CsToolsResult<TransportResponse> {
        let fingerprint = request.fingerprint();
        let mut dispatch_time_utc = Utc::now();

        if request.cache_bypass {
            if let Some(cache) = &self.cache {
                cache.expire(&fingerprint).await;
            }
        }

        if request.cache_enabled && !request.cache_bypass {
            if let Some(cache) = &self.cache {
                if let Some(cached) = cache.check(&fingerprint).await {
                    let receive_time_utc = Utc::now();
                    log_debug!(path = request.url.path(), "served from cache, skipping concurrency slot");
                    let mut headers = cached.headers;
                    headers.push((cache::CACHE_FETCHED_HEADER.to_string(), "true".to_string()));
                    return Ok(TransportResponse {
                        status: cached.status,
                        headers,
                        body: cached.body,
                        cache_hit: true,
                        dispatch_time_utc,
                        receive_time_utc,
                    });
                }
            }
        }

        // Cache hits bypass the rate limit; only an actual network send queues here.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("transport semaphore is never closed while the transport is alive");

        // We may have waited for a permit; re-stamp so the header reflects the effective send.
        dispatch_time_utc = Utc::now();

        let raw = self.send_with_retry(&request).await?;

        let receive_time_utc = Utc::now();

        if request.cache_enabled && cache::should_cache(raw.status) {
            if let Some(cache) = &self.cache {
                cache.store(&fingerprint, raw.status, &raw.headers, &raw.body).await;
            }
        }

        Ok(TransportResponse {
            status: raw.status,
            headers: raw.headers,
            body: raw.body,
            cache_hit: false,
            dispatch_time_utc,
            receive_time_utc,
        })
    }

    async fn send_with_retry(&self, request: &PreparedRequest) -> CsToolsResult<RawResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.send_once(request).await {
                Ok(raw) if retry::is_server_pressure(raw.status) => {
                    match retry::classify(&self.retry_policy, request.url.path(), retry::Outcome::HttpStatus(raw.status), attempt) {
                        retry::RetryDecision::Continue(delay) => {
                            log_warn!(
                                path = request.url.path(),
                                status = raw.status,
                                attempt,
                                delay_secs = delay.as_secs_f64(),
                                "server under pressure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        retry::RetryDecision::Give(_) => return Ok(raw),
                    }
                }
                Ok(raw) => return Ok(raw),
                Err(network_error) => {
                    match retry::classify(&self.retry_policy, request.url.path(), retry::Outcome::NetworkError, attempt) {
                        retry::RetryDecision::Continue(delay) => {
                            log_warn!(
                                path = request.url.path(),
                                error = %network_error,
                                attempt,
                                delay_secs = delay.as_secs_f64(),
                                "network error on whitelisted path, retrying"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        retry::RetryDecision::Give(_) => return Err(network_error),
                    }
                }
            }
        }
    }

    async fn send_once(&self, request: &PreparedRequest) -> CsToolsResult<RawResponse> {
        let mut builder = self.client.request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CsToolsError::timeout(DEFAULT_NETWORK_TIMEOUT_SECS)
            } else {
                CsToolsError::request_failed(e.to_string(), Some(Box::new(e)))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CsToolsError::request_failed(format!("could not read response body: {e}"), Some(Box::new(e))))?
            .to_vec();

        Ok(RawResponse { status, headers, body })
    }
}

const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 300;

struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}
