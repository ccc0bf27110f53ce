use std::{
    future::Future,
    time::{Duration, Instant},
};

use derive_more::Debug;
use primitives::retries::{RetryPolicy, retry_with_backoff_if};
use prometheus::HistogramVec;
use reqwest::{Client, Method, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::ProviderError;

/// Timeout and retry behaviour of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Per-attempt timeout, `None` for long-lived streams
    pub timeout: Option<Duration>,
    /// Per-host retries
    pub retry: RetryPolicy,
}

impl RequestPolicy {
    /// Policy with a timeout and `retries` attempts after the first one.
    pub fn new(timeout: Duration, retries: usize, backoff: Duration) -> Self {
        Self { timeout: Some(timeout), retry: RetryPolicy::new(retries, backoff) }
    }

    /// Same retries, no timeout.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }
}

/// Predicate over the errors collected so far. Returns the index of an error
/// that must be raised at once instead of trying the remaining hosts.
pub type ForceRaise<'a> = &'a (dyn Fn(&[ProviderError]) -> Option<usize> + Send + Sync);

/// Predicate rejecting an otherwise successful response so the next host is tried.
pub type ForceUseFallback<'a, T> = &'a (dyn Fn(&T) -> bool + Send + Sync);

/// Per-call overrides of a [`HttpProvider`] request.
#[derive(Debug)]
pub struct RequestOptions<'a, T> {
    /// Query parameters
    pub query: &'a [(&'a str, &'a str)],
    /// Policy replacing the provider default
    pub policy: Option<&'a RequestPolicy>,
    /// Raise-immediately predicate
    #[debug(skip)]
    pub force_raise: Option<ForceRaise<'a>>,
    /// Fallback predicate
    #[debug(skip)]
    pub force_use_fallback: Option<ForceUseFallback<'a, T>>,
}

impl<T> Default for RequestOptions<'_, T> {
    fn default() -> Self {
        Self { query: &[], policy: None, force_raise: None, force_use_fallback: None }
    }
}

/// HTTP client over an ordered list of hosts.
///
/// Every request is tried against each host in order, retrying a host per the
/// active [`RequestPolicy`] before falling back to the next one. When all
/// hosts fail the error of the last one is returned.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    name: &'static str,
    hosts: Vec<Url>,
    client: Client,
    policy: RequestPolicy,
    #[debug(skip)]
    metrics: Option<HistogramVec>,
}

impl HttpProvider {
    /// Create a provider. `name` identifies it in logs.
    pub fn new(
        name: &'static str,
        hosts: Vec<Url>,
        policy: RequestPolicy,
        metrics: Option<HistogramVec>,
    ) -> Result<Self, ProviderError> {
        if hosts.is_empty() {
            return Err(ProviderError::NoHosts(name));
        }
        Ok(Self { name, hosts, client: Client::new(), policy, metrics })
    }

    /// Configured hosts.
    pub fn hosts(&self) -> &[Url] {
        &self.hosts
    }

    /// Default request policy.
    pub const fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    /// GET `path` and decode the JSON body.
    ///
    /// `endpoint` is the path template used as the metrics label.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        options: RequestOptions<'_, T>,
    ) -> Result<T, ProviderError> {
        let RequestOptions { query, policy, force_raise, force_use_fallback } = options;
        let policy = policy.unwrap_or(&self.policy);

        self.with_fallbacks(force_raise, |host| async move {
            let response = self.send(host, Method::GET, endpoint, path, query, None, policy).await?;
            let value = decode(path, response).await?;
            if force_use_fallback.is_some_and(|rejects| rejects(&value)) {
                return Err(ProviderError::ForceUseFallback { endpoint: path.to_owned() });
            }
            Ok(value)
        })
        .await
    }

    /// GET `path` and hand back the response for the caller to stream.
    pub async fn get_stream(
        &self,
        endpoint: &str,
        path: &str,
        query: &[(&str, &str)],
        policy: Option<&RequestPolicy>,
        force_raise: Option<ForceRaise<'_>>,
    ) -> Result<Response, ProviderError> {
        let policy = policy.unwrap_or(&self.policy);
        self.with_fallbacks(force_raise, |host| {
            self.send(host, Method::GET, endpoint, path, query, None, policy)
        })
        .await
    }

    /// POST a JSON body to `path`. The response body is discarded.
    pub async fn post_json(
        &self,
        endpoint: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<(), ProviderError> {
        self.with_fallbacks(None, |host| async move {
            self.send(host, Method::POST, endpoint, path, &[], Some(body), &self.policy).await?;
            Ok(())
        })
        .await
    }

    async fn with_fallbacks<'a, T, F, Fut>(
        &'a self,
        force_raise: Option<ForceRaise<'_>>,
        mut attempt: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut(&'a Url) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut errors = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            match attempt(host).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    errors.push(error);
                    if let Some(index) = force_raise.and_then(|raise| raise(&errors)) {
                        return Err(errors.swap_remove(index));
                    }
                    if let Some(error) = errors.last() {
                        warn!(
                            provider = self.name,
                            host = %domain(host),
                            %error,
                            "Host responded with error"
                        );
                    }
                }
            }
        }
        Err(errors.pop().unwrap_or(ProviderError::NoHosts(self.name)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn send(
        &self,
        host: &Url,
        method: Method,
        endpoint: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        policy: &RequestPolicy,
    ) -> Result<Response, ProviderError> {
        let url = join(host, path)?;
        retry_with_backoff_if(
            &policy.retry,
            || self.send_once(&url, method.clone(), endpoint, path, query, body, policy),
            |error: &ProviderError| is_retryable(error, &policy.retry),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_once(
        &self,
        url: &Url,
        method: Method,
        endpoint: &str,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
        policy: &RequestPolicy,
    ) -> Result<Response, ProviderError> {
        let mut request = self.client.request(method, url.clone());
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(timeout) = policy.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let result = request.send().await;
        let code = result.as_ref().map_or(0, |response| response.status().as_u16());
        self.observe(endpoint, code, url, started.elapsed());

        let response = result.map_err(|source| {
            debug!(provider = self.name, error = %source, "Request failed");
            ProviderError::Transport { endpoint: path.to_owned(), source }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(provider = self.name, endpoint = path, status = status.as_u16(), "Not ok response");
            return Err(ProviderError::NotOk { endpoint: path.to_owned(), status: status.as_u16(), text });
        }
        Ok(response)
    }

    fn observe(&self, endpoint: &str, code: u16, url: &Url, elapsed: Duration) {
        if let Some(histogram) = &self.metrics {
            histogram
                .with_label_values(&[endpoint, &code.to_string(), &domain(url)])
                .observe(elapsed.as_secs_f64());
        }
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, ProviderError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|source| ProviderError::Transport { endpoint: path.to_owned(), source })?;
    serde_json::from_slice(&bytes)
        .map_err(|source| ProviderError::Decode { endpoint: path.to_owned(), source })
}

fn is_retryable(error: &ProviderError, policy: &RetryPolicy) -> bool {
    match error {
        ProviderError::Transport { source, .. } => {
            source.is_connect() || source.is_timeout() || source.is_request()
        }
        ProviderError::NotOk { status, .. } => policy.retries_status(*status),
        _ => false,
    }
}

/// Host with port, used as the `domain` metrics label and in logs.
pub fn domain(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_owned(),
        _ => url.as_str().to_owned(),
    }
}

/// Join a relative `path` onto `host`, keeping any base path of the host.
fn join(host: &Url, path: &str) -> Result<Url, ProviderError> {
    let mut base = host.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}
