use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::error::FailureReason;
use crate::signing::build_signature_headers;
use crate::telemetry::{metric_inc, metric_inc_target};
use crate::types::{now_secs, DeliveryResult, HttpMethod, Settings, Target};

/// Longest response body snippet kept in a delivery result.
pub const BODY_SNIPPET_CHARS: usize = 300;

/// Retry schedule applied to every delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Delay before the first retry; doubles for each following one.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    /// Sleep before retry number `retry_index` (0 for the first retry).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_index).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

impl From<&Settings> for RetryPolicy {
    fn from(settings: &Settings) -> Self {
        Self::new(settings.forward_retries, settings.forward_retry_backoff)
    }
}

/// Delivers payloads to targets.
///
/// Every HTTP attempt, retries included, first takes a permit from one
/// limiter shared by all targets and all dispatches. The permit is dropped
/// as soon as the attempt finishes, so backoff sleeps never hold capacity.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    limiter: Arc<Semaphore>,
    policy: RetryPolicy,
}

/// A response that arrived, successful or not.
struct Reply {
    status: u16,
    body: String,
}

impl Forwarder {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &Settings) -> Self {
        Self {
            client,
            limiter: Arc::new(Semaphore::new(settings.forward_concurrency)),
            policy: RetryPolicy::from(settings),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Permits currently free in the shared limiter.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }

    /// One HTTP attempt, without retry and without taking a limiter permit.
    pub async fn attempt(&self, target: &Target, payload: &Value) -> DeliveryResult {
        match self.send_once(target, payload).await {
            Ok(reply) => DeliveryResult::responded(target.name.clone(), reply.status, reply.body),
            Err(reason) => failure_result(target, &reason, 1),
        }
    }

    /// Deliver with the configured retry policy.
    pub async fn deliver(&self, target: &Target, payload: &Value) -> DeliveryResult {
        self.deliver_with_policy(target, payload, self.policy).await
    }

    /// Deliver with an explicit retry policy. Never fails: exhausted
    /// retries come back as a result with `ok == false` carrying the last
    /// failure.
    pub async fn deliver_with_policy(
        &self,
        target: &Target,
        payload: &Value,
        policy: RetryPolicy,
    ) -> DeliveryResult {
        if let HttpMethod::Unsupported(method) = &target.method {
            metric_inc_target("bridge.delivery.unsupported_method", &target.name);
            tracing::warn!(target_name = %target.name, method = %method, "unsupported method, not sending");
            return failure_result(target, &FailureReason::UnsupportedMethod(method.clone()), 0);
        }

        let mut retry_index = 0u32;
        loop {
            let attempts = retry_index + 1;

            // Acquire a permit per attempt
            let outcome = match self.limiter.acquire().await {
                Ok(_permit) => self.send_once(target, payload).await,
                Err(_) => Err(FailureReason::Aborted),
            };
            // permit released here, before any backoff

            let (result, reason) = match outcome {
                Ok(reply) if (200..300).contains(&reply.status) => {
                    metric_inc("bridge.delivery.success");
                    tracing::debug!(target_name = %target.name, status = reply.status, attempts, "delivered");
                    let mut result =
                        DeliveryResult::responded(target.name.clone(), reply.status, reply.body);
                    result.attempts = attempts;
                    return result;
                }
                Ok(reply) => {
                    let reason = FailureReason::RemoteStatus(reply.status);
                    let mut result =
                        DeliveryResult::responded(target.name.clone(), reply.status, reply.body);
                    result.attempts = attempts;
                    (result, reason)
                }
                Err(reason) => (failure_result(target, &reason, attempts), reason),
            };

            metric_inc_target("bridge.delivery.attempt_failed", &target.name);

            if !reason.is_retryable() || retry_index >= policy.retries {
                metric_inc("bridge.delivery.failed");
                tracing::warn!(
                    target_name = %target.name,
                    attempts,
                    error = %reason,
                    "delivery failed"
                );
                return result;
            }

            let delay = policy.delay_for(retry_index);
            tracing::debug!(
                target_name = %target.name,
                attempts,
                error = %reason,
                delay_ms = delay.as_millis() as u64,
                "attempt failed, retrying"
            );
            metric_inc("bridge.delivery.retry_scheduled");
            sleep(delay).await;
            retry_index += 1;
        }
    }

    async fn send_once(&self, target: &Target, payload: &Value) -> Result<Reply, FailureReason> {
        let mut headers = HeaderMap::new();
        let (request, signed_bytes) = match &target.method {
            HttpMethod::Post | HttpMethod::Put => {
                let method = if target.method == HttpMethod::Post {
                    Method::POST
                } else {
                    Method::PUT
                };
                let body = serde_json::to_vec(payload)
                    .map_err(|e| FailureReason::InvalidRequest(e.to_string()))?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                let request = self.client.request(method, &target.url).body(body.clone());
                (request, body)
            }
            HttpMethod::Get => {
                let url = url_with_query(&target.url, payload)?;
                let signed = url.query().unwrap_or_default().as_bytes().to_vec();
                (self.client.get(url), signed)
            }
            HttpMethod::Unsupported(method) => {
                return Err(FailureReason::UnsupportedMethod(method.clone()));
            }
        };

        // Configured headers replace defaults of the same name.
        for (name, value) in &target.headers {
            let (name, value) = header_pair(name, value)?;
            headers.insert(name, value);
        }
        if let Some(signature) = build_signature_headers(target, &signed_bytes, now_secs()) {
            for (name, value) in [signature.signature, signature.timestamp] {
                let (name, value) = header_pair(&name, &value)?;
                headers.insert(name, value);
            }
        }

        let response = request
            .timeout(target.timeout)
            .headers(headers)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(Reply {
            status,
            body: snippet(&body),
        })
    }
}

fn failure_result(target: &Target, reason: &FailureReason, attempts: u32) -> DeliveryResult {
    let mut result = DeliveryResult::failed(target.name.clone(), reason.to_string());
    result.attempts = attempts;
    result
}

/// Append top-level payload fields to `base` as query parameters.
fn url_with_query(base: &str, payload: &Value) -> Result<Url, FailureReason> {
    let mut url = Url::parse(base).map_err(|e| FailureReason::InvalidRequest(e.to_string()))?;
    let pairs = query_pairs(payload);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}

/// Flatten the top level of a payload into key/value strings.
///
/// Scalars are rendered plainly, nested values as compact JSON and nulls
/// as empty strings. A non-object payload becomes a single `payload` pair.
pub(crate) fn query_pairs(payload: &Value) -> Vec<(String, String)> {
    match payload {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), query_value(v)))
            .collect(),
        Value::Null => Vec::new(),
        other => vec![("payload".to_string(), query_value(other))],
    }
}

fn query_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        nested => nested.to_string(),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), FailureReason> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| FailureReason::InvalidRequest(format!("header '{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| FailureReason::InvalidRequest(format!("header '{name}': {e}")))?;
    Ok((header_name, header_value))
}
